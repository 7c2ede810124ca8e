//! Administrative writes
//!
//! Every mutation of a record that permission or config data is derived from
//! goes through `AdminService`, which writes through the store and dispatches
//! the matching `ChangeEvent`. Deletes and relation removals resolve their
//! fan-out while the rows still exist and invalidate once the write is done,
//! so a read racing the write cannot cache the old rows again.

use std::collections::BTreeSet;
use std::future::Future;

use crate::entity::relation::RelationKind;
use crate::entity::user_info::UserField;
use crate::entity::{
    data_permission, dept_info, field_permission, menu, menu_meta, system_config, user_info,
    user_personal_config, user_role,
};
use crate::error::{AppError, AppResult, OptionExt};
use crate::invalidation::{ChangeEvent, InvalidationReport, Invalidator, M2mPhase};
use crate::store::SharedStore;

#[derive(Clone)]
pub struct AdminService {
    store: SharedStore,
    invalidator: Invalidator,
    password_cost: u32,
}

impl AdminService {
    pub fn new(store: SharedStore, invalidator: Invalidator) -> Self {
        Self {
            store,
            invalidator,
            password_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// bcrypt cost used for new passwords
    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.password_cost = cost;
        self
    }

    async fn emit(&self, event: ChangeEvent) -> InvalidationReport {
        self.invalidator.dispatch(&event).await
    }

    /// Plan `event` against the current rows, run `write`, then invalidate
    async fn emit_around<T>(
        &self,
        event: ChangeEvent,
        write: impl Future<Output = AppResult<T>>,
    ) -> AppResult<T> {
        let plan = self.invalidator.plan(&event).await;
        let written = write.await?;
        self.invalidator.apply(plan).await;
        Ok(written)
    }

    // ---- users ----

    /// Create a user, hashing `password` with bcrypt
    pub async fn create_user(
        &self,
        user: user_info::Model,
        password: &str,
    ) -> AppResult<user_info::Model> {
        if user.id != 0 {
            return Err(AppError::BadRequest("New user must not carry an id".to_string()));
        }
        if password.is_empty() {
            return Err(AppError::Validation("Password is required".to_string()));
        }
        let hashed = bcrypt::hash(password, self.password_cost)
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
        let saved = self
            .store
            .save_user(user_info::Model {
                password: hashed,
                ..user
            })
            .await?;
        tracing::info!("User created: {} (id={})", saved.username, saved.id);
        self.emit(ChangeEvent::UserSaved {
            id: saved.id,
            changed: Vec::new(),
        })
        .await;
        Ok(saved)
    }

    /// Update a user; only the fields that differ from the stored row are
    /// reported to the invalidation graph
    pub async fn update_user(&self, user: user_info::Model) -> AppResult<user_info::Model> {
        let current = self
            .store
            .user(user.id)
            .await?
            .ok_or_not_found(format!("User {} not found", user.id))?;
        let changed = changed_user_fields(&current, &user);
        let saved = self.store.save_user(user).await?;
        self.emit(ChangeEvent::UserSaved {
            id: saved.id,
            changed,
        })
        .await;
        Ok(saved)
    }

    pub async fn set_password(&self, id: i64, password: &str) -> AppResult<()> {
        let current = self
            .store
            .user(id)
            .await?
            .ok_or_not_found(format!("User {} not found", id))?;
        let hashed = bcrypt::hash(password, self.password_cost)
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
        self.store
            .save_user(user_info::Model {
                password: hashed,
                ..current
            })
            .await?;
        Ok(())
    }

    pub async fn delete_user(&self, id: i64) -> AppResult<()> {
        self.emit_around(ChangeEvent::UserDeleted { id }, self.store.delete_user(id))
            .await?;
        tracing::info!("User deleted: id={}", id);
        Ok(())
    }

    // ---- roles ----

    pub async fn save_role(&self, role: user_role::Model) -> AppResult<user_role::Model> {
        let saved = self.store.save_role(role).await?;
        self.emit(ChangeEvent::RoleSaved { id: saved.id }).await;
        Ok(saved)
    }

    pub async fn delete_role(&self, id: i64) -> AppResult<()> {
        self.emit_around(ChangeEvent::RoleDeleted { id }, self.store.delete_role(id))
            .await
    }

    // ---- departments ----

    /// Save a department, rejecting a parent chain that loops back to it
    pub async fn save_dept(&self, dept: dept_info::Model) -> AppResult<dept_info::Model> {
        self.check_dept_parent(&dept).await?;
        let saved = self.store.save_dept(dept).await?;
        self.emit(ChangeEvent::DeptSaved { id: saved.id }).await;
        Ok(saved)
    }

    async fn check_dept_parent(&self, dept: &dept_info::Model) -> AppResult<()> {
        let mut visited = BTreeSet::new();
        let mut current = dept.parent_id;
        while current != 0 {
            if (dept.id != 0 && current == dept.id) || !visited.insert(current) {
                return Err(AppError::BadRequest(
                    "Department parent chain contains a cycle".to_string(),
                ));
            }
            let parent = self
                .store
                .dept(current)
                .await?
                .ok_or_not_found(format!("Department {} not found", current))?;
            current = parent.parent_id;
        }
        Ok(())
    }

    pub async fn delete_dept(&self, id: i64) -> AppResult<()> {
        if !self.store.dept_children(id).await?.is_empty() {
            return Err(AppError::Protected(format!(
                "Department {} still has child departments",
                id
            )));
        }
        self.emit_around(ChangeEvent::DeptDeleted { id }, self.store.delete_dept(id))
            .await
    }

    // ---- menus ----

    pub async fn save_menu(&self, menu: menu::Model) -> AppResult<menu::Model> {
        if menu.id != 0 && menu.parent_id == menu.id {
            return Err(AppError::BadRequest("Menu cannot be its own parent".to_string()));
        }
        let saved = self.store.save_menu(menu).await?;
        self.emit(ChangeEvent::MenuSaved { id: saved.id }).await;
        Ok(saved)
    }

    pub async fn save_menu_meta(&self, meta: menu_meta::Model) -> AppResult<menu_meta::Model> {
        let saved = self.store.save_menu_meta(meta).await?;
        self.emit(ChangeEvent::MenuSaved { id: saved.menu_id }).await;
        Ok(saved)
    }

    pub async fn delete_menu(&self, id: i64) -> AppResult<()> {
        if !self.store.menu_children(id).await?.is_empty() {
            return Err(AppError::Protected(format!("Menu {} still has children", id)));
        }
        self.emit_around(ChangeEvent::MenuDeleted { id }, self.store.delete_menu(id))
            .await
    }

    // ---- data permissions ----

    pub async fn save_rule(
        &self,
        rule: data_permission::Model,
    ) -> AppResult<data_permission::Model> {
        if !rule.rules.is_array() {
            return Err(AppError::Validation("Rules must be a JSON array".to_string()));
        }
        let saved = self.store.save_rule(rule).await?;
        self.emit(ChangeEvent::RuleSaved { id: saved.id }).await;
        Ok(saved)
    }

    pub async fn delete_rule(&self, id: i64) -> AppResult<()> {
        self.emit_around(ChangeEvent::RuleDeleted { id }, self.store.delete_rule(id))
            .await
    }

    // ---- field permissions ----

    pub async fn save_field_permission(
        &self,
        perm: field_permission::Model,
    ) -> AppResult<field_permission::Model> {
        let previous = match perm.id {
            0 => None,
            id => self.store.field_permission(id).await?,
        };
        let saved = self.store.save_field_permission(perm).await?;
        if let Some(previous) = previous.filter(|p| p.menu_id != saved.menu_id) {
            self.emit(ChangeEvent::FieldPermissionSaved {
                id: saved.id,
                menu_id: previous.menu_id,
            })
            .await;
        }
        self.emit(ChangeEvent::FieldPermissionSaved {
            id: saved.id,
            menu_id: saved.menu_id,
        })
        .await;
        Ok(saved)
    }

    pub async fn delete_field_permission(&self, id: i64) -> AppResult<()> {
        let perm = self
            .store
            .field_permission(id)
            .await?
            .ok_or_not_found(format!("Field permission {} not found", id))?;
        self.emit_around(
            ChangeEvent::FieldPermissionDeleted {
                id,
                menu_id: perm.menu_id,
            },
            self.store.delete_field_permission(id),
        )
        .await
    }

    // ---- relations ----

    /// Link `targets` to `owner`, emitting the add phases around the write
    pub async fn add_related(
        &self,
        kind: RelationKind,
        owner_id: i64,
        targets: &[i64],
    ) -> AppResult<()> {
        if targets.is_empty() {
            return Ok(());
        }
        self.emit(m2m(kind, M2mPhase::PreAdd, owner_id, targets)).await;
        self.store.add_related(kind, owner_id, targets).await?;
        self.emit(m2m(kind, M2mPhase::PostAdd, owner_id, targets)).await;
        Ok(())
    }

    /// Unlink `targets` from `owner`, emitting the remove phases around the write
    pub async fn remove_related(
        &self,
        kind: RelationKind,
        owner_id: i64,
        targets: &[i64],
    ) -> AppResult<()> {
        if targets.is_empty() {
            return Ok(());
        }
        self.emit_around(
            m2m(kind, M2mPhase::PreRemove, owner_id, targets),
            self.store.remove_related(kind, owner_id, targets),
        )
        .await?;
        self.emit(m2m(kind, M2mPhase::PostRemove, owner_id, targets)).await;
        Ok(())
    }

    /// Replace the targets of `owner` with exactly `targets`
    pub async fn set_related(
        &self,
        kind: RelationKind,
        owner_id: i64,
        targets: &[i64],
    ) -> AppResult<()> {
        let current: BTreeSet<i64> = self.store.related(kind, owner_id).await?.into_iter().collect();
        let wanted: BTreeSet<i64> = targets.iter().copied().collect();
        let removed: Vec<i64> = current.difference(&wanted).copied().collect();
        let added: Vec<i64> = wanted.difference(&current).copied().collect();
        self.remove_related(kind, owner_id, &removed).await?;
        self.add_related(kind, owner_id, &added).await
    }

    // ---- configuration ----

    pub async fn save_system_config(
        &self,
        config: system_config::Model,
    ) -> AppResult<system_config::Model> {
        let previous = match config.id {
            0 => None,
            id => self
                .store
                .system_configs()
                .await?
                .into_iter()
                .find(|c| c.id == id),
        };
        let saved = self.store.save_system_config(config).await?;
        if let Some(previous) = previous.filter(|p| p.key != saved.key) {
            self.emit(ChangeEvent::SystemConfigSaved { key: previous.key })
                .await;
        }
        self.emit(ChangeEvent::SystemConfigSaved {
            key: saved.key.clone(),
        })
        .await;
        Ok(saved)
    }

    pub async fn delete_system_config(&self, key: &str) -> AppResult<bool> {
        let deleted = self.store.delete_system_config(key).await?;
        self.emit(ChangeEvent::SystemConfigDeleted {
            key: key.to_string(),
        })
        .await;
        Ok(deleted)
    }

    pub async fn save_user_config(
        &self,
        config: user_personal_config::Model,
    ) -> AppResult<user_personal_config::Model> {
        let saved = self.store.save_user_config(config).await?;
        self.emit(ChangeEvent::UserConfigSaved {
            owner_id: saved.owner_id,
            key: saved.key.clone(),
        })
        .await;
        Ok(saved)
    }

    pub async fn delete_user_config(&self, owner_id: i64, key: &str) -> AppResult<bool> {
        let deleted = self.store.delete_user_config(owner_id, key).await?;
        self.emit(ChangeEvent::UserConfigDeleted {
            owner_id,
            key: key.to_string(),
        })
        .await;
        Ok(deleted)
    }
}

fn m2m(kind: RelationKind, phase: M2mPhase, owner_id: i64, targets: &[i64]) -> ChangeEvent {
    ChangeEvent::M2m {
        kind,
        phase,
        owner_id,
        targets: targets.to_vec(),
    }
}

fn changed_user_fields(old: &user_info::Model, new: &user_info::Model) -> Vec<UserField> {
    let mut changed = Vec::new();
    if old.dept_id != new.dept_id {
        changed.push(UserField::Dept);
    }
    if old.mode_type != new.mode_type {
        changed.push(UserField::ModeType);
    }
    if old.is_active != new.is_active {
        changed.push(UserField::IsActive);
    }
    if old.is_superuser != new.is_superuser {
        changed.push(UserField::IsSuperuser);
    }
    if old.username != new.username || old.nickname != new.nickname || old.password != new.password
    {
        changed.push(UserField::Profile);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PermissionStore;
    use crate::test_support::{
        new_config, new_dept, new_menu, new_permission, new_role, new_user, Fixture,
    };
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_create_user_hashes_password() {
        let fx = Fixture::new();
        let user = assert_ok!(fx.admin.create_user(new_user("carol"), "secret").await);
        assert_ne!(user.password, "secret");
        assert!(bcrypt::verify("secret", &user.password).unwrap());

        let empty = assert_err!(fx.admin.create_user(new_user("dave"), "").await);
        assert!(matches!(empty, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_role_menu_grant_reaches_cached_permissions() {
        let fx = Fixture::new();
        let user = fx.user("alice").await;
        let role = fx.admin.save_role(new_role("editor")).await.unwrap();
        fx.admin
            .add_related(RelationKind::UserRoles, user.id, &[role.id])
            .await
            .unwrap();
        assert!(fx.resolver.get_user_permission(&user, "GET").await.unwrap().is_empty());

        let menu = fx
            .admin
            .save_menu(new_permission("book_list", "GET", "/api/book"))
            .await
            .unwrap();
        fx.admin
            .add_related(RelationKind::RoleMenus, role.id, &[menu.id])
            .await
            .unwrap();
        let map = fx.resolver.get_user_permission(&user, "GET").await.unwrap();
        assert_eq!(map.get("/api/book").map(|e| e.menu_id), Some(menu.id));
    }

    #[tokio::test]
    async fn test_removing_role_clears_permissions() {
        let fx = Fixture::new();
        let user = fx.user("alice").await;
        let role = fx.admin.save_role(new_role("editor")).await.unwrap();
        let menu = fx
            .admin
            .save_menu(new_permission("book_list", "GET", "/api/book"))
            .await
            .unwrap();
        fx.admin.add_related(RelationKind::RoleMenus, role.id, &[menu.id]).await.unwrap();
        fx.admin.add_related(RelationKind::UserRoles, user.id, &[role.id]).await.unwrap();
        assert_eq!(fx.resolver.get_user_permission(&user, "GET").await.unwrap().len(), 1);

        fx.admin.set_related(RelationKind::UserRoles, user.id, &[]).await.unwrap();
        assert!(fx.resolver.get_user_permission(&user, "GET").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dept_cycle_is_rejected() {
        let fx = Fixture::new();
        let root = fx.admin.save_dept(new_dept("root")).await.unwrap();
        let child = fx
            .admin
            .save_dept(dept_info::Model { parent_id: root.id, ..new_dept("child") })
            .await
            .unwrap();
        let looped = fx
            .admin
            .save_dept(dept_info::Model { parent_id: child.id, ..root.clone() })
            .await;
        assert!(matches!(looped, Err(AppError::BadRequest(_))));

        let protected = fx.admin.delete_dept(root.id).await;
        assert!(matches!(protected, Err(AppError::Protected(_))));
        assert_ok!(fx.admin.delete_dept(child.id).await);
        assert_ok!(fx.admin.delete_dept(root.id).await);
    }

    #[tokio::test]
    async fn test_menu_with_children_is_protected() {
        let fx = Fixture::new();
        let parent = fx.admin.save_menu(new_menu("system", "/system")).await.unwrap();
        fx.admin
            .save_menu(menu::Model { parent_id: parent.id, ..new_menu("users", "/system/user") })
            .await
            .unwrap();
        let result = fx.admin.delete_menu(parent.id).await;
        assert!(matches!(result, Err(AppError::Protected(_))));
    }

    #[tokio::test]
    async fn test_deactivating_user_drops_route_cache() {
        let fx = Fixture::new();
        let user = fx.user("alice").await;
        let key = format!("magic_cache_response_UserRoutesView_get_{}_-", user.id);
        fx.cache_set(&key).await;

        fx.admin
            .update_user(user_info::Model { nickname: "Al".into(), ..user.clone() })
            .await
            .unwrap();
        assert!(fx.cache_get(&key).await.is_some());

        fx.admin
            .update_user(user_info::Model { is_active: false, ..user })
            .await
            .unwrap();
        assert!(fx.cache_get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_system_config_save_refreshes_value() {
        let fx = Fixture::new();
        let saved = fx
            .admin
            .save_system_config(new_config("FILE_UPLOAD_SIZE", "5242880"))
            .await
            .unwrap();
        let size: i64 = fx.sys_config.get(crate::sysconfig::ConfigKey::FileUploadSize).await;
        assert_eq!(size, 5242880);

        fx.admin
            .save_system_config(system_config::Model { value: "10485760".into(), ..saved })
            .await
            .unwrap();
        let size: i64 = fx.sys_config.get(crate::sysconfig::ConfigKey::FileUploadSize).await;
        assert_eq!(size, 10485760);

        assert!(fx.admin.delete_system_config("FILE_UPLOAD_SIZE").await.unwrap());
        let size: i64 = fx.sys_config.get(crate::sysconfig::ConfigKey::FileUploadSize).await;
        assert_eq!(size, 5_242_880);
    }

    #[tokio::test]
    async fn test_user_config_change_reaches_owner() {
        let fx = Fixture::new();
        let user = fx.user("alice").await;
        assert_eq!(
            fx.user_config.get_value(user.id, "THEME", serde_json::json!("dark")).await,
            "dark"
        );
        fx.admin
            .save_user_config(user_personal_config::Model {
                id: 0,
                owner_id: user.id,
                key: "THEME".into(),
                value: "\"light\"".into(),
                is_active: true,
                access: true,
                description: String::new(),
            })
            .await
            .unwrap();
        assert_eq!(
            fx.user_config.get_value(user.id, "THEME", serde_json::json!("dark")).await,
            "light"
        );
        assert!(fx.store.user_config(user.id, "THEME").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dept_delete_clears_member_caches() {
        let fx = Fixture::new();
        let dept = fx.admin.save_dept(new_dept("ops")).await.unwrap();
        let member = fx.user_in_dept("bob", dept.id).await;
        let role = fx.admin.save_role(new_role("ops")).await.unwrap();
        let menu = fx
            .admin
            .save_menu(new_permission("book_list", "GET", "/api/book"))
            .await
            .unwrap();
        fx.admin.add_related(RelationKind::RoleMenus, role.id, &[menu.id]).await.unwrap();
        fx.admin.add_related(RelationKind::DeptRoles, dept.id, &[role.id]).await.unwrap();
        assert_eq!(fx.resolver.get_user_permission(&member, "GET").await.unwrap().len(), 1);

        let permission = format!("magic_cache_data_get_user_permission_{}_GET", member.id);
        let routes = format!("magic_cache_response_UserRoutesView_get_{}_-", member.id);
        fx.cache_set(&routes).await;
        assert!(fx.cache_get(&permission).await.is_some());

        assert_ok!(fx.admin.delete_dept(dept.id).await);
        assert!(fx.cache_get(&permission).await.is_none());
        assert!(fx.cache_get(&routes).await.is_none());

        let member = fx.store.user(member.id).await.unwrap().unwrap();
        assert!(fx.resolver.get_user_permission(&member, "GET").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dept_role_unlink_reaches_members() {
        let fx = Fixture::new();
        let dept = fx.admin.save_dept(new_dept("ops")).await.unwrap();
        let member = fx.user_in_dept("bob", dept.id).await;
        let role = fx.admin.save_role(new_role("ops")).await.unwrap();
        let menu = fx
            .admin
            .save_menu(new_permission("book_list", "GET", "/api/book"))
            .await
            .unwrap();
        fx.admin.add_related(RelationKind::RoleMenus, role.id, &[menu.id]).await.unwrap();
        fx.admin.add_related(RelationKind::DeptRoles, dept.id, &[role.id]).await.unwrap();
        assert_eq!(fx.resolver.get_user_permission(&member, "GET").await.unwrap().len(), 1);

        fx.admin.remove_related(RelationKind::DeptRoles, dept.id, &[role.id]).await.unwrap();
        assert!(fx.resolver.get_user_permission(&member, "GET").await.unwrap().is_empty());
    }
}
