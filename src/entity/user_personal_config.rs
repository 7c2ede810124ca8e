//! UserPersonalConfig entity - 用户个人配置表
//!
//! 表名: sys_userpersonalconfig, (owner_id, key) 唯一

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sys_userpersonalconfig")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// 所属用户ID
    pub owner_id: i64,

    /// 配置名称
    #[sea_orm(column_type = "String(Some(255))")]
    pub key: String,

    /// 配置值 (JSON 文本)
    #[sea_orm(column_type = "Text")]
    pub value: String,

    /// 是否启用
    pub is_active: bool,

    /// 是否允许访问
    pub access: bool,

    /// 描述
    #[sea_orm(column_type = "String(Some(256))")]
    pub description: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
