//! DataPermission entity - 数据权限规则表
//!
//! 表名: sys_datapermission
//!
//! rules 保存 JSON 规则列表, 限制用户可见的数据行。

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::ModeType;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sys_datapermission")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// 规则名称 (唯一)
    #[sea_orm(column_type = "String(Some(255))", unique)]
    pub name: String,

    /// 规则组合模式: 0=OR, 1=AND
    pub mode_type: i32,

    /// 规则内容
    #[sea_orm(column_type = "Json")]
    pub rules: Json,

    /// 是否启用
    pub is_active: bool,

    /// 描述
    #[sea_orm(column_type = "String(Some(256))")]
    pub description: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

// 作用菜单保存在 sys_relation (rule_menus) 中, 为空时对所有菜单生效

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn mode(&self) -> ModeType {
        ModeType::from(self.mode_type)
    }
}
