//! FieldPermission entity - 字段权限表
//!
//! 表名: sys_fieldpermission, (role_id, menu_id) 唯一

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sys_fieldpermission")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// 角色ID
    pub role_id: i64,

    /// 菜单ID
    pub menu_id: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

// 可见字段保存在 sys_relation (field_permission_fields) 中

impl ActiveModelBehavior for ActiveModel {}
