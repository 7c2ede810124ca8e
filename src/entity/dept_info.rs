//! DeptInfo entity - 部门表
//!
//! 表名: sys_deptinfo

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::ModeType;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sys_deptinfo")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// 部门名称
    #[sea_orm(column_type = "String(Some(128))")]
    pub name: String,

    /// 部门编码 (唯一)
    #[sea_orm(column_type = "String(Some(128))", unique)]
    pub code: String,

    /// 父部门ID (0 表示顶级部门)
    pub parent_id: i64,

    /// 排序
    pub rank: i32,

    /// 是否启用
    pub is_active: bool,

    /// 数据权限组合模式: 0=OR, 1=AND
    pub mode_type: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

// 自引用通过 parent_id 手动查询处理

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn mode(&self) -> ModeType {
        ModeType::from(self.mode_type)
    }
}
