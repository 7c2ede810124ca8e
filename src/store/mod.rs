//! Persistence seam
//!
//! `PermissionStore` covers every read the permission engine and config cache
//! perform and every write the admin service issues. `DbStore` talks to the
//! database through sea-orm; `MemoryStore` keeps the same tables in process.

use async_trait::async_trait;
use std::sync::Arc;

use crate::entity::relation::RelationKind;
use crate::entity::{
    data_permission, dept_info, field_permission, menu, menu_meta, model_label_field,
    system_config, user_info, user_personal_config, user_role,
};
use crate::error::AppResult;

pub mod db;
pub mod memory;

pub use db::DbStore;
pub use memory::MemoryStore;

pub type SharedStore = Arc<dyn PermissionStore>;

/// Which end of a relation row a deleted record occupies
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Owner,
    Target,
}

/// Relation rows removed together with a user
pub const USER_LINKS: &[(RelationKind, Side)] = &[
    (RelationKind::UserRoles, Side::Owner),
    (RelationKind::UserRules, Side::Owner),
];
pub const ROLE_LINKS: &[(RelationKind, Side)] = &[
    (RelationKind::UserRoles, Side::Target),
    (RelationKind::DeptRoles, Side::Target),
    (RelationKind::RoleMenus, Side::Owner),
];
pub const DEPT_LINKS: &[(RelationKind, Side)] = &[
    (RelationKind::DeptRoles, Side::Owner),
    (RelationKind::DeptRules, Side::Owner),
];
pub const MENU_LINKS: &[(RelationKind, Side)] = &[
    (RelationKind::RoleMenus, Side::Target),
    (RelationKind::RuleMenus, Side::Target),
];
pub const RULE_LINKS: &[(RelationKind, Side)] = &[
    (RelationKind::UserRules, Side::Target),
    (RelationKind::DeptRules, Side::Target),
    (RelationKind::RuleMenus, Side::Owner),
];
pub const FIELD_PERMISSION_LINKS: &[(RelationKind, Side)] =
    &[(RelationKind::FieldPermissionFields, Side::Owner)];

/// Storage of users, roles, departments, menus, rules and configuration.
///
/// `save_*` inserts when the model's `id` is 0 and updates otherwise, and
/// returns the stored row. Menus are always returned in `(rank, id)` order.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    // 用户
    async fn user(&self, id: i64) -> AppResult<Option<user_info::Model>>;
    async fn user_by_username(&self, username: &str) -> AppResult<Option<user_info::Model>>;
    /// Ids of users belonging to any of `dept_ids`
    async fn users_in_depts(&self, dept_ids: &[i64]) -> AppResult<Vec<i64>>;
    async fn superusers(&self) -> AppResult<Vec<i64>>;
    async fn save_user(&self, user: user_info::Model) -> AppResult<user_info::Model>;
    async fn delete_user(&self, id: i64) -> AppResult<()>;

    // 角色
    async fn roles(&self, ids: &[i64]) -> AppResult<Vec<user_role::Model>>;
    async fn save_role(&self, role: user_role::Model) -> AppResult<user_role::Model>;
    async fn delete_role(&self, id: i64) -> AppResult<()>;

    // 部门
    async fn dept(&self, id: i64) -> AppResult<Option<dept_info::Model>>;
    async fn dept_children(&self, id: i64) -> AppResult<Vec<i64>>;
    async fn save_dept(&self, dept: dept_info::Model) -> AppResult<dept_info::Model>;
    /// Deletes the department and detaches its users
    async fn delete_dept(&self, id: i64) -> AppResult<()>;

    // 菜单
    async fn menus(&self, ids: &[i64]) -> AppResult<Vec<menu::Model>>;
    async fn all_menus(&self) -> AppResult<Vec<menu::Model>>;
    async fn menu_children(&self, id: i64) -> AppResult<Vec<i64>>;
    async fn menu_metas(&self, menu_ids: &[i64]) -> AppResult<Vec<menu_meta::Model>>;
    async fn save_menu(&self, menu: menu::Model) -> AppResult<menu::Model>;
    /// Inserts or replaces the meta row of `meta.menu_id`
    async fn save_menu_meta(&self, meta: menu_meta::Model) -> AppResult<menu_meta::Model>;
    /// Deletes the menu with its meta row and field permissions
    async fn delete_menu(&self, id: i64) -> AppResult<()>;

    // 数据权限
    async fn rules(&self, ids: &[i64]) -> AppResult<Vec<data_permission::Model>>;
    async fn save_rule(&self, rule: data_permission::Model) -> AppResult<data_permission::Model>;
    async fn delete_rule(&self, id: i64) -> AppResult<()>;

    // 字段权限
    async fn field_permission(&self, id: i64) -> AppResult<Option<field_permission::Model>>;
    async fn field_permissions(
        &self,
        role_ids: &[i64],
        menu_id: i64,
    ) -> AppResult<Vec<field_permission::Model>>;
    /// Fails with `Conflict` when another row has the same (role, menu)
    async fn save_field_permission(
        &self,
        perm: field_permission::Model,
    ) -> AppResult<field_permission::Model>;
    async fn delete_field_permission(&self, id: i64) -> AppResult<()>;
    async fn model_fields(&self, ids: &[i64]) -> AppResult<Vec<model_label_field::Model>>;
    async fn model_field(
        &self,
        field_type: i32,
        name: &str,
        parent_id: i64,
    ) -> AppResult<Option<model_label_field::Model>>;
    async fn save_model_field(
        &self,
        field: model_label_field::Model,
    ) -> AppResult<model_label_field::Model>;

    // 多对多关系
    async fn related(&self, kind: RelationKind, owner_id: i64) -> AppResult<Vec<i64>>;
    /// Owners linked to any of `target_ids`
    async fn owners(&self, kind: RelationKind, target_ids: &[i64]) -> AppResult<Vec<i64>>;
    async fn add_related(&self, kind: RelationKind, owner_id: i64, target_ids: &[i64]) -> AppResult<()>;
    async fn remove_related(
        &self,
        kind: RelationKind,
        owner_id: i64,
        target_ids: &[i64],
    ) -> AppResult<()>;

    // 配置
    async fn system_config(&self, key: &str) -> AppResult<Option<system_config::Model>>;
    async fn system_configs(&self) -> AppResult<Vec<system_config::Model>>;
    /// Fails with `Conflict` when another row has the same key
    async fn save_system_config(
        &self,
        config: system_config::Model,
    ) -> AppResult<system_config::Model>;
    async fn delete_system_config(&self, key: &str) -> AppResult<bool>;
    async fn user_config(
        &self,
        owner_id: i64,
        key: &str,
    ) -> AppResult<Option<user_personal_config::Model>>;
    /// Users holding a personal row for `key`
    /// Fails with `Conflict` when another row has the same (owner, key)
    async fn save_user_config(
        &self,
        config: user_personal_config::Model,
    ) -> AppResult<user_personal_config::Model>;
    async fn delete_user_config(&self, owner_id: i64, key: &str) -> AppResult<bool>;
}

/// Sort menus into registration order
pub(crate) fn sort_menus(menus: &mut [menu::Model]) {
    menus.sort_by_key(|m| (m.rank, m.id));
}
