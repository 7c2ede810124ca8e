//! MenuMeta entity - 菜单元数据表
//!
//! 表名: sys_menumeta, 与 sys_menu 一对一

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sys_menumeta")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// 所属菜单ID (唯一)
    #[sea_orm(unique)]
    pub menu_id: i64,

    /// 菜单标题
    #[sea_orm(column_type = "String(Some(255))")]
    pub title: String,

    /// 图标
    #[sea_orm(column_type = "String(Some(255))")]
    pub icon: String,

    /// 是否在菜单中显示
    pub is_show_menu: bool,

    /// 是否显示父级菜单
    pub is_show_parent: bool,

    /// 是否缓存页面
    pub is_keepalive: bool,

    /// 内嵌 iframe 地址
    #[sea_orm(column_type = "String(Some(255))", nullable)]
    pub frame_url: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Default meta used when a menu has no meta row
    pub fn placeholder(menu_id: i64, title: &str) -> Self {
        Self {
            id: 0,
            menu_id,
            title: title.to_string(),
            icon: String::new(),
            is_show_menu: true,
            is_show_parent: false,
            is_keepalive: false,
            frame_url: None,
        }
    }
}
