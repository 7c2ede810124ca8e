//! ModelLabelField entity - 模型及字段目录表
//!
//! 表名: sys_modellabelfield
//!
//! 模型节点 parent_id 为 0, 字段节点指向所属模型。

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 目录节点类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// 模型
    Model = 0,
    /// 字段
    Field = 1,
}

impl From<i32> for FieldType {
    fn from(value: i32) -> Self {
        match value {
            0 => FieldType::Model,
            _ => FieldType::Field,
        }
    }
}

impl From<FieldType> for i32 {
    fn from(value: FieldType) -> Self {
        value as i32
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sys_modellabelfield")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// 节点类型: 0=模型, 1=字段
    pub field_type: i32,

    /// 模型标签或字段名
    #[sea_orm(column_type = "String(Some(128))")]
    pub name: String,

    /// 显示名称
    #[sea_orm(column_type = "String(Some(255))")]
    pub label: String,

    /// 所属模型ID (0 表示模型节点)
    pub parent_id: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn kind(&self) -> FieldType {
        FieldType::from(self.field_type)
    }
}
