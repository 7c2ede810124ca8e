//! UserInfo entity - 用户表
//!
//! 表名: sys_userinfo

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::ModeType;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sys_userinfo")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// 用户名 (唯一)
    #[sea_orm(column_type = "String(Some(64))", unique)]
    pub username: String,

    /// 密码 (bcrypt 哈希)
    #[sea_orm(column_type = "String(Some(128))")]
    #[serde(skip_serializing, default)]
    pub password: String,

    /// 昵称
    #[sea_orm(column_type = "String(Some(64))")]
    pub nickname: String,

    /// 是否启用
    pub is_active: bool,

    /// 超级管理员 (跳过菜单与字段权限检查)
    pub is_superuser: bool,

    /// 部门ID (0 表示无部门)
    pub dept_id: i64,

    /// 数据权限组合模式: 0=OR, 1=AND
    pub mode_type: i32,

    /// 最后登录时间 (Unix 时间戳)
    pub last_login: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

// 角色、数据权限等多对多关系保存在 sys_relation 表中

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn mode(&self) -> ModeType {
        ModeType::from(self.mode_type)
    }

    pub fn has_dept(&self) -> bool {
        self.dept_id != 0
    }
}

/// 参与权限计算的用户字段
///
/// 保存用户时由调用方标明变更的字段, 只有这些字段会触发缓存失效。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserField {
    Roles,
    Rules,
    Dept,
    ModeType,
    IsActive,
    IsSuperuser,
    Profile,
}

impl UserField {
    /// Fields whose change alters the user's derived permission data
    pub fn affects_permission(self) -> bool {
        matches!(
            self,
            UserField::Roles | UserField::Rules | UserField::Dept | UserField::ModeType
        )
    }
}

/// 用户响应 (不含密码)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub nickname: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub dept_id: i64,
    pub mode_type: i32,
    pub last_login: i64,
}

impl From<Model> for UserResponse {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            username: model.username,
            nickname: model.nickname,
            is_active: model.is_active,
            is_superuser: model.is_superuser,
            dept_id: model.dept_id,
            mode_type: model.mode_type,
            last_login: model.last_login,
        }
    }
}
