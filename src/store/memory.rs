//! In-process store
//!
//! Keeps every table in a `BTreeMap` behind one `RwLock`. Used by tests and by
//! `[database] type = "memory"` for local runs without Postgres.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

use super::{
    sort_menus, PermissionStore, Side, DEPT_LINKS, FIELD_PERMISSION_LINKS, MENU_LINKS,
    ROLE_LINKS, RULE_LINKS, USER_LINKS,
};
use crate::entity::relation::RelationKind;
use crate::entity::{
    data_permission, dept_info, field_permission, menu, menu_meta, model_label_field,
    system_config, user_info, user_personal_config, user_role,
};
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, user_info::Model>,
    roles: BTreeMap<i64, user_role::Model>,
    depts: BTreeMap<i64, dept_info::Model>,
    menus: BTreeMap<i64, menu::Model>,
    metas: BTreeMap<i64, menu_meta::Model>,
    rules: BTreeMap<i64, data_permission::Model>,
    field_perms: BTreeMap<i64, field_permission::Model>,
    model_fields: BTreeMap<i64, model_label_field::Model>,
    system_configs: BTreeMap<i64, system_config::Model>,
    user_configs: BTreeMap<i64, user_personal_config::Model>,
    relations: BTreeSet<(RelationKind, i64, i64)>,
}

impl Tables {
    fn assign_id(&mut self, id: i64) -> i64 {
        if id != 0 {
            self.next_id = self.next_id.max(id);
            return id;
        }
        self.next_id += 1;
        self.next_id
    }

    fn unlink(&mut self, links: &[(RelationKind, Side)], id: i64) {
        self.relations.retain(|(kind, owner, target)| {
            !links.iter().any(|(k, side)| {
                k == kind
                    && match side {
                        Side::Owner => *owner == id,
                        Side::Target => *target == id,
                    }
            })
        });
    }
}

fn pick<M: Clone>(table: &BTreeMap<i64, M>, ids: &[i64]) -> Vec<M> {
    ids.iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter_map(|id| table.get(id).cloned())
        .collect()
}

fn require<M>(table: &BTreeMap<i64, M>, id: i64, what: &str) -> AppResult<()> {
    if id != 0 && !table.contains_key(&id) {
        return Err(AppError::NotFound(format!("{} {} not found", what, id)));
    }
    Ok(())
}

/// `BTreeMap`-backed `PermissionStore`
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn user(&self, id: i64) -> AppResult<Option<user_info::Model>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn user_by_username(&self, username: &str) -> AppResult<Option<user_info::Model>> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.username == username).cloned())
    }

    async fn users_in_depts(&self, dept_ids: &[i64]) -> AppResult<Vec<i64>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .filter(|u| u.has_dept() && dept_ids.contains(&u.dept_id))
            .map(|u| u.id)
            .collect())
    }

    async fn superusers(&self) -> AppResult<Vec<i64>> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().filter(|u| u.is_superuser).map(|u| u.id).collect())
    }

    async fn save_user(&self, mut user: user_info::Model) -> AppResult<user_info::Model> {
        let mut tables = self.tables.write().await;
        require(&tables.users, user.id, "User")?;
        if tables
            .users
            .values()
            .any(|u| u.username == user.username && u.id != user.id)
        {
            return Err(AppError::Conflict(format!("Username {} already exists", user.username)));
        }
        user.id = tables.assign_id(user.id);
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn delete_user(&self, id: i64) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        tables.users.remove(&id);
        tables.user_configs.retain(|_, c| c.owner_id != id);
        tables.unlink(USER_LINKS, id);
        Ok(())
    }

    async fn roles(&self, ids: &[i64]) -> AppResult<Vec<user_role::Model>> {
        Ok(pick(&self.tables.read().await.roles, ids))
    }

    async fn save_role(&self, mut role: user_role::Model) -> AppResult<user_role::Model> {
        let mut tables = self.tables.write().await;
        require(&tables.roles, role.id, "Role")?;
        if tables.roles.values().any(|r| r.code == role.code && r.id != role.id) {
            return Err(AppError::Conflict(format!("Role code {} already exists", role.code)));
        }
        role.id = tables.assign_id(role.id);
        tables.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn delete_role(&self, id: i64) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        tables.roles.remove(&id);
        let stale: Vec<i64> = tables
            .field_perms
            .values()
            .filter(|p| p.role_id == id)
            .map(|p| p.id)
            .collect();
        for perm_id in stale {
            tables.field_perms.remove(&perm_id);
            tables.unlink(FIELD_PERMISSION_LINKS, perm_id);
        }
        tables.unlink(ROLE_LINKS, id);
        Ok(())
    }

    async fn dept(&self, id: i64) -> AppResult<Option<dept_info::Model>> {
        Ok(self.tables.read().await.depts.get(&id).cloned())
    }

    async fn dept_children(&self, id: i64) -> AppResult<Vec<i64>> {
        let tables = self.tables.read().await;
        Ok(tables.depts.values().filter(|d| d.parent_id == id).map(|d| d.id).collect())
    }

    async fn save_dept(&self, mut dept: dept_info::Model) -> AppResult<dept_info::Model> {
        let mut tables = self.tables.write().await;
        require(&tables.depts, dept.id, "Department")?;
        if tables.depts.values().any(|d| d.code == dept.code && d.id != dept.id) {
            return Err(AppError::Conflict(format!("Department code {} already exists", dept.code)));
        }
        dept.id = tables.assign_id(dept.id);
        tables.depts.insert(dept.id, dept.clone());
        Ok(dept)
    }

    async fn delete_dept(&self, id: i64) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        tables.depts.remove(&id);
        for user in tables.users.values_mut().filter(|u| u.dept_id == id) {
            user.dept_id = 0;
        }
        tables.unlink(DEPT_LINKS, id);
        Ok(())
    }

    async fn menus(&self, ids: &[i64]) -> AppResult<Vec<menu::Model>> {
        let mut menus = pick(&self.tables.read().await.menus, ids);
        sort_menus(&mut menus);
        Ok(menus)
    }

    async fn all_menus(&self) -> AppResult<Vec<menu::Model>> {
        let mut menus: Vec<_> = self.tables.read().await.menus.values().cloned().collect();
        sort_menus(&mut menus);
        Ok(menus)
    }

    async fn menu_children(&self, id: i64) -> AppResult<Vec<i64>> {
        let tables = self.tables.read().await;
        Ok(tables.menus.values().filter(|m| m.parent_id == id).map(|m| m.id).collect())
    }

    async fn menu_metas(&self, menu_ids: &[i64]) -> AppResult<Vec<menu_meta::Model>> {
        let tables = self.tables.read().await;
        Ok(tables
            .metas
            .values()
            .filter(|m| menu_ids.contains(&m.menu_id))
            .cloned()
            .collect())
    }

    async fn save_menu(&self, mut menu: menu::Model) -> AppResult<menu::Model> {
        let mut tables = self.tables.write().await;
        require(&tables.menus, menu.id, "Menu")?;
        if tables.menus.values().any(|m| m.name == menu.name && m.id != menu.id) {
            return Err(AppError::Conflict(format!("Menu {} already exists", menu.name)));
        }
        menu.id = tables.assign_id(menu.id);
        tables.menus.insert(menu.id, menu.clone());
        Ok(menu)
    }

    async fn save_menu_meta(&self, mut meta: menu_meta::Model) -> AppResult<menu_meta::Model> {
        let mut tables = self.tables.write().await;
        require(&tables.menus, meta.menu_id, "Menu")?;
        let existing = tables
            .metas
            .values()
            .find(|m| m.menu_id == meta.menu_id)
            .map(|m| m.id);
        meta.id = match existing {
            Some(id) => id,
            None => tables.assign_id(0),
        };
        tables.metas.insert(meta.id, meta.clone());
        Ok(meta)
    }

    async fn delete_menu(&self, id: i64) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        tables.menus.remove(&id);
        tables.metas.retain(|_, m| m.menu_id != id);
        let stale: Vec<i64> = tables
            .field_perms
            .values()
            .filter(|p| p.menu_id == id)
            .map(|p| p.id)
            .collect();
        for perm_id in stale {
            tables.field_perms.remove(&perm_id);
            tables.unlink(FIELD_PERMISSION_LINKS, perm_id);
        }
        tables.unlink(MENU_LINKS, id);
        Ok(())
    }

    async fn rules(&self, ids: &[i64]) -> AppResult<Vec<data_permission::Model>> {
        Ok(pick(&self.tables.read().await.rules, ids))
    }

    async fn save_rule(&self, mut rule: data_permission::Model) -> AppResult<data_permission::Model> {
        let mut tables = self.tables.write().await;
        require(&tables.rules, rule.id, "Data permission")?;
        if tables.rules.values().any(|r| r.name == rule.name && r.id != rule.id) {
            return Err(AppError::Conflict(format!("Data permission {} already exists", rule.name)));
        }
        rule.id = tables.assign_id(rule.id);
        tables.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn delete_rule(&self, id: i64) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        tables.rules.remove(&id);
        tables.unlink(RULE_LINKS, id);
        Ok(())
    }

    async fn field_permission(&self, id: i64) -> AppResult<Option<field_permission::Model>> {
        Ok(self.tables.read().await.field_perms.get(&id).cloned())
    }

    async fn field_permissions(
        &self,
        role_ids: &[i64],
        menu_id: i64,
    ) -> AppResult<Vec<field_permission::Model>> {
        let tables = self.tables.read().await;
        Ok(tables
            .field_perms
            .values()
            .filter(|p| p.menu_id == menu_id && role_ids.contains(&p.role_id))
            .cloned()
            .collect())
    }

    async fn save_field_permission(
        &self,
        mut perm: field_permission::Model,
    ) -> AppResult<field_permission::Model> {
        let mut tables = self.tables.write().await;
        require(&tables.field_perms, perm.id, "Field permission")?;
        if tables
            .field_perms
            .values()
            .any(|p| p.role_id == perm.role_id && p.menu_id == perm.menu_id && p.id != perm.id)
        {
            return Err(AppError::Conflict(format!(
                "Field permission for role {} and menu {} already exists",
                perm.role_id, perm.menu_id
            )));
        }
        perm.id = tables.assign_id(perm.id);
        tables.field_perms.insert(perm.id, perm.clone());
        Ok(perm)
    }

    async fn delete_field_permission(&self, id: i64) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        tables.field_perms.remove(&id);
        tables.unlink(FIELD_PERMISSION_LINKS, id);
        Ok(())
    }

    async fn model_fields(&self, ids: &[i64]) -> AppResult<Vec<model_label_field::Model>> {
        Ok(pick(&self.tables.read().await.model_fields, ids))
    }

    async fn model_field(
        &self,
        field_type: i32,
        name: &str,
        parent_id: i64,
    ) -> AppResult<Option<model_label_field::Model>> {
        let tables = self.tables.read().await;
        Ok(tables
            .model_fields
            .values()
            .find(|f| f.field_type == field_type && f.name == name && f.parent_id == parent_id)
            .cloned())
    }

    async fn save_model_field(
        &self,
        mut field: model_label_field::Model,
    ) -> AppResult<model_label_field::Model> {
        let mut tables = self.tables.write().await;
        require(&tables.model_fields, field.id, "Model field")?;
        field.id = tables.assign_id(field.id);
        tables.model_fields.insert(field.id, field.clone());
        Ok(field)
    }

    async fn related(&self, kind: RelationKind, owner_id: i64) -> AppResult<Vec<i64>> {
        let tables = self.tables.read().await;
        Ok(tables
            .relations
            .range((kind, owner_id, i64::MIN)..=(kind, owner_id, i64::MAX))
            .map(|(_, _, target)| *target)
            .collect())
    }

    async fn owners(&self, kind: RelationKind, target_ids: &[i64]) -> AppResult<Vec<i64>> {
        let tables = self.tables.read().await;
        let owners: BTreeSet<i64> = tables
            .relations
            .iter()
            .filter(|(k, _, target)| *k == kind && target_ids.contains(target))
            .map(|(_, owner, _)| *owner)
            .collect();
        Ok(owners.into_iter().collect())
    }

    async fn add_related(&self, kind: RelationKind, owner_id: i64, target_ids: &[i64]) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        for target in target_ids {
            tables.relations.insert((kind, owner_id, *target));
        }
        Ok(())
    }

    async fn remove_related(
        &self,
        kind: RelationKind,
        owner_id: i64,
        target_ids: &[i64],
    ) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        for target in target_ids {
            tables.relations.remove(&(kind, owner_id, *target));
        }
        Ok(())
    }

    async fn system_config(&self, key: &str) -> AppResult<Option<system_config::Model>> {
        let tables = self.tables.read().await;
        Ok(tables.system_configs.values().find(|c| c.key == key).cloned())
    }

    async fn system_configs(&self) -> AppResult<Vec<system_config::Model>> {
        Ok(self.tables.read().await.system_configs.values().cloned().collect())
    }

    async fn save_system_config(
        &self,
        mut config: system_config::Model,
    ) -> AppResult<system_config::Model> {
        let mut tables = self.tables.write().await;
        require(&tables.system_configs, config.id, "System config")?;
        if tables
            .system_configs
            .values()
            .any(|c| c.key == config.key && c.id != config.id)
        {
            return Err(AppError::Conflict(format!("Config {} already exists", config.key)));
        }
        config.id = tables.assign_id(config.id);
        tables.system_configs.insert(config.id, config.clone());
        Ok(config)
    }

    async fn delete_system_config(&self, key: &str) -> AppResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.system_configs.len();
        tables.system_configs.retain(|_, c| c.key != key);
        Ok(tables.system_configs.len() != before)
    }

    async fn user_config(
        &self,
        owner_id: i64,
        key: &str,
    ) -> AppResult<Option<user_personal_config::Model>> {
        let tables = self.tables.read().await;
        Ok(tables
            .user_configs
            .values()
            .find(|c| c.owner_id == owner_id && c.key == key)
            .cloned())
    }

    async fn save_user_config(
        &self,
        mut config: user_personal_config::Model,
    ) -> AppResult<user_personal_config::Model> {
        let mut tables = self.tables.write().await;
        require(&tables.user_configs, config.id, "User config")?;
        if tables
            .user_configs
            .values()
            .any(|c| c.owner_id == config.owner_id && c.key == config.key && c.id != config.id)
        {
            return Err(AppError::Conflict(format!("Config {} already exists", config.key)));
        }
        config.id = tables.assign_id(config.id);
        tables.user_configs.insert(config.id, config.clone());
        Ok(config)
    }

    async fn delete_user_config(&self, owner_id: i64, key: &str) -> AppResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.user_configs.len();
        tables
            .user_configs
            .retain(|_, c| !(c.owner_id == owner_id && c.key == key));
        Ok(tables.user_configs.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{new_menu, new_role, new_user};

    #[tokio::test]
    async fn test_save_assigns_ids_and_checks_uniqueness() {
        let store = MemoryStore::new();
        let alice = store.save_user(new_user("alice")).await.unwrap();
        assert!(alice.id > 0);
        let dup = store.save_user(new_user("alice")).await;
        assert!(matches!(dup, Err(AppError::Conflict(_))));
        let missing = store
            .save_user(user_info::Model { id: 999, ..new_user("bob") })
            .await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_relations_and_cascade() {
        let store = MemoryStore::new();
        let user = store.save_user(new_user("alice")).await.unwrap();
        let role = store.save_role(new_role("admin")).await.unwrap();
        store
            .add_related(RelationKind::UserRoles, user.id, &[role.id])
            .await
            .unwrap();
        assert_eq!(store.related(RelationKind::UserRoles, user.id).await.unwrap(), vec![role.id]);
        assert_eq!(store.owners(RelationKind::UserRoles, &[role.id]).await.unwrap(), vec![user.id]);

        store.delete_role(role.id).await.unwrap();
        assert!(store.related(RelationKind::UserRoles, user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_menus_in_registration_order() {
        let store = MemoryStore::new();
        let b = store.save_menu(menu::Model { rank: 2, ..new_menu("b", "/b") }).await.unwrap();
        let a = store.save_menu(menu::Model { rank: 1, ..new_menu("a", "/a") }).await.unwrap();
        let ids: Vec<i64> = store.all_menus().await.unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
        let picked: Vec<i64> = store.menus(&[b.id, a.id]).await.unwrap().iter().map(|m| m.id).collect();
        assert_eq!(picked, vec![a.id, b.id]);
    }
}
