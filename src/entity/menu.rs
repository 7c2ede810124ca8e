//! Menu entity - 菜单表
//!
//! 表名: sys_menu
//!
//! 目录与菜单用于前端路由, 权限类型节点绑定 HTTP 方法与接口路径。

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 菜单类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MenuType {
    /// 目录
    Directory = 0,
    /// 菜单
    Menu = 1,
    /// 权限 (接口)
    Permission = 2,
}

impl From<i32> for MenuType {
    fn from(value: i32) -> Self {
        match value {
            0 => MenuType::Directory,
            2 => MenuType::Permission,
            _ => MenuType::Menu,
        }
    }
}

impl From<MenuType> for i32 {
    fn from(value: MenuType) -> Self {
        value as i32
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sys_menu")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// 路由名称/权限编码 (唯一)
    #[sea_orm(column_type = "String(Some(128))", unique)]
    pub name: String,

    /// 父菜单ID (0 表示顶级)
    pub parent_id: i64,

    /// 菜单类型: 0=目录, 1=菜单, 2=权限
    pub menu_type: i32,

    /// 路由地址或接口路径
    #[sea_orm(column_type = "String(Some(255))")]
    pub path: String,

    /// 前端组件
    #[sea_orm(column_type = "String(Some(255))")]
    pub component: String,

    /// 接口请求方法 (仅权限类型)
    #[sea_orm(column_type = "String(Some(10))")]
    pub method: String,

    /// 绑定的模型标签, 例如 "system.userinfo"
    #[sea_orm(column_type = "String(Some(128))", nullable)]
    pub model: Option<String>,

    /// 排序
    pub rank: i32,

    /// 是否启用
    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn kind(&self) -> MenuType {
        MenuType::from(self.menu_type)
    }

    pub fn is_permission(&self) -> bool {
        self.kind() == MenuType::Permission
    }
}
