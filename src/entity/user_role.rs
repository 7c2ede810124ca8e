//! UserRole entity - 角色表
//!
//! 表名: sys_userrole

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sys_userrole")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// 角色名称
    #[sea_orm(column_type = "String(Some(128))")]
    pub name: String,

    /// 角色编码 (唯一)
    #[sea_orm(column_type = "String(Some(128))", unique)]
    pub code: String,

    /// 是否启用
    pub is_active: bool,

    /// 描述
    #[sea_orm(column_type = "String(Some(256))")]
    pub description: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

// 菜单授权保存在 sys_relation (role_menus) 中

impl ActiveModelBehavior for ActiveModel {}
