//! Relation entity - 多对多关系表
//!
//! 表名: sys_relation
//!
//! 所有多对多关联 (用户-角色、部门-规则、角色-菜单等) 统一保存为
//! (relation, owner_id, target_id) 三元组。

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 关联类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// 用户 -> 角色
    UserRoles,
    /// 用户 -> 数据权限
    UserRules,
    /// 部门 -> 角色
    DeptRoles,
    /// 部门 -> 数据权限
    DeptRules,
    /// 角色 -> 菜单
    RoleMenus,
    /// 数据权限 -> 作用菜单
    RuleMenus,
    /// 字段权限 -> 模型字段
    FieldPermissionFields,
}

impl RelationKind {
    pub const ALL: [RelationKind; 7] = [
        RelationKind::UserRoles,
        RelationKind::UserRules,
        RelationKind::DeptRoles,
        RelationKind::DeptRules,
        RelationKind::RoleMenus,
        RelationKind::RuleMenus,
        RelationKind::FieldPermissionFields,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RelationKind::UserRoles => "user_roles",
            RelationKind::UserRules => "user_rules",
            RelationKind::DeptRoles => "dept_roles",
            RelationKind::DeptRules => "dept_rules",
            RelationKind::RoleMenus => "role_menus",
            RelationKind::RuleMenus => "rule_menus",
            RelationKind::FieldPermissionFields => "field_permission_fields",
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sys_relation")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// 关联类型, 见 RelationKind::as_str
    #[sea_orm(column_type = "String(Some(32))")]
    pub relation: String,

    /// 关联发起方ID
    pub owner_id: i64,

    /// 关联目标ID
    pub target_id: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
