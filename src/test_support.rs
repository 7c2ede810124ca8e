//! Builders and a wired-up service graph for unit tests

use serde_json::{json, Value};
use std::sync::Arc;

use crate::admin::AdminService;
use crate::cache::{CacheBackend, MagicCacheData, MagicEngine, MemoryCache, SharedCache};
use crate::entity::model_label_field::FieldType;
use crate::entity::relation::RelationKind;
use crate::entity::{
    data_permission, dept_info, field_permission, menu, menu::MenuType, model_label_field,
    system_config, user_info, user_role,
};
use crate::invalidation::{InvalidationGraph, Invalidator};
use crate::permission::PermissionResolver;
use crate::store::{MemoryStore, SharedStore};
use crate::sysconfig::{SysConfig, UserConfig};

pub fn new_user(username: &str) -> user_info::Model {
    user_info::Model {
        id: 0,
        username: username.to_string(),
        password: String::new(),
        nickname: username.to_string(),
        is_active: true,
        is_superuser: false,
        dept_id: 0,
        mode_type: 0,
        last_login: 0,
    }
}

pub fn new_role(name: &str) -> user_role::Model {
    user_role::Model {
        id: 0,
        name: name.to_string(),
        code: name.to_string(),
        is_active: true,
        description: String::new(),
    }
}

pub fn new_dept(name: &str) -> dept_info::Model {
    dept_info::Model {
        id: 0,
        name: name.to_string(),
        code: name.to_string(),
        parent_id: 0,
        rank: 0,
        is_active: true,
        mode_type: 0,
    }
}

pub fn new_menu(name: &str, path: &str) -> menu::Model {
    menu::Model {
        id: 0,
        name: name.to_string(),
        parent_id: 0,
        menu_type: MenuType::Menu.into(),
        path: path.to_string(),
        component: String::new(),
        method: String::new(),
        model: None,
        rank: 0,
        is_active: true,
    }
}

pub fn new_permission(name: &str, method: &str, path: &str) -> menu::Model {
    menu::Model {
        menu_type: MenuType::Permission.into(),
        method: method.to_string(),
        ..new_menu(name, path)
    }
}

pub fn new_rule(name: &str, rules: Value) -> data_permission::Model {
    data_permission::Model {
        id: 0,
        name: name.to_string(),
        mode_type: 0,
        rules,
        is_active: true,
        description: String::new(),
    }
}

pub fn new_config(key: &str, value: &str) -> system_config::Model {
    system_config::Model {
        id: 0,
        key: key.to_string(),
        value: value.to_string(),
        is_active: true,
        access: true,
        inherit: false,
        description: String::new(),
    }
}

/// Field permission of `role` on `menu` granting `fields` of `model`,
/// written straight to the store
pub async fn grant_fields(
    store: &SharedStore,
    role_id: i64,
    menu_id: i64,
    model: &str,
    fields: &[&str],
) -> i64 {
    let model_id = catalog_node(store, FieldType::Model, model, 0).await;
    let mut field_ids = Vec::new();
    for field in fields {
        field_ids.push(catalog_node(store, FieldType::Field, field, model_id).await);
    }
    let perm = store
        .save_field_permission(field_permission::Model {
            id: 0,
            role_id,
            menu_id,
        })
        .await
        .unwrap();
    store
        .add_related(RelationKind::FieldPermissionFields, perm.id, &field_ids)
        .await
        .unwrap();
    perm.id
}

async fn catalog_node(store: &SharedStore, field_type: FieldType, name: &str, parent_id: i64) -> i64 {
    let existing = store
        .model_field(field_type.into(), name, parent_id)
        .await
        .unwrap();
    match existing {
        Some(node) => node.id,
        None => {
            store
                .save_model_field(model_label_field::Model {
                    id: 0,
                    field_type: field_type.into(),
                    name: name.to_string(),
                    label: name.to_string(),
                    parent_id,
                })
                .await
                .unwrap()
                .id
        }
    }
}

/// Services over an in-memory store and cache
pub struct Fixture {
    pub store: SharedStore,
    pub cache: SharedCache,
    pub magic: MagicCacheData,
    pub resolver: PermissionResolver,
    pub sys_config: SysConfig,
    pub user_config: UserConfig,
    pub invalidator: Invalidator,
    pub admin: AdminService,
}

impl Fixture {
    pub fn new() -> Self {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let engine = MagicEngine::new(cache.clone());
        let magic = MagicCacheData::with_engine(engine.clone());
        let resolver = PermissionResolver::new(store.clone(), magic.clone());
        let sys_config = SysConfig::new(store.clone(), cache.clone());
        let user_config = UserConfig::new(store.clone(), cache.clone(), sys_config.clone());
        let invalidator = Invalidator::new(InvalidationGraph::standard(), store.clone(), engine);
        let admin = AdminService::new(store.clone(), invalidator.clone()).with_password_cost(4);
        Self {
            store,
            cache,
            magic,
            resolver,
            sys_config,
            user_config,
            invalidator,
            admin,
        }
    }

    pub async fn user(&self, username: &str) -> user_info::Model {
        self.store.save_user(new_user(username)).await.unwrap()
    }

    pub async fn user_in_dept(&self, username: &str, dept_id: i64) -> user_info::Model {
        self.store
            .save_user(user_info::Model {
                dept_id,
                ..new_user(username)
            })
            .await
            .unwrap()
    }

    /// Relation row written straight to the store, bypassing invalidation
    pub async fn link(&self, kind: RelationKind, owner_id: i64, target_id: i64) {
        self.store.add_related(kind, owner_id, &[target_id]).await.unwrap();
    }

    /// Field permission of `role` on `menu` granting `fields` of `model`
    pub async fn field_permission(
        &self,
        role_id: i64,
        menu_id: i64,
        model: &str,
        fields: &[&str],
    ) -> i64 {
        grant_fields(&self.store, role_id, menu_id, model, fields).await
    }

    pub async fn cache_get(&self, key: &str) -> Option<Value> {
        self.cache.get(key).await.unwrap()
    }

    /// Plant a placeholder entry under `key`
    pub async fn cache_set(&self, key: &str) {
        self.cache.set(key, &json!({"planted": true}), None).await.unwrap();
    }
}
