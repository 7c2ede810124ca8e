//! Entity module - SeaORM 实体定义
//!
//! 包含权限、菜单、部门与配置相关的数据库表

use serde::{Deserialize, Serialize};

pub mod data_permission;
pub mod dept_info;
pub mod field_permission;
pub mod menu;
pub mod menu_meta;
pub mod model_label_field;
pub mod relation;
pub mod system_config;
pub mod user_info;
pub mod user_personal_config;
pub mod user_role;

/// 规则组合模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeType {
    /// 或
    Or = 0,
    /// 与
    And = 1,
}

impl From<i32> for ModeType {
    fn from(value: i32) -> Self {
        match value {
            1 => ModeType::And,
            _ => ModeType::Or,
        }
    }
}

impl From<ModeType> for i32 {
    fn from(mode: ModeType) -> Self {
        mode as i32
    }
}
