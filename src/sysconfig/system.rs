//! System-wide configuration

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeSet;

use super::{decode_value, evict, read_payload, render, write_payload, ConfigKey, ConfigPayload};
use crate::cache::{keys, SharedCache};
use crate::entity::system_config;
use crate::error::AppResult;
use crate::store::SharedStore;

#[derive(Clone)]
pub struct SysConfig {
    store: SharedStore,
    cache: SharedCache,
}

impl SysConfig {
    pub fn new(store: SharedStore, cache: SharedCache) -> Self {
        Self { store, cache }
    }

    /// Value of `key`, or `default` when no accessible active row exists
    pub async fn get_value(&self, key: &str, default: Value) -> Value {
        match self.payload(key).await {
            Some(payload) => payload.value_or(default),
            None => default,
        }
    }

    /// Typed value of a known key
    pub async fn get<T: DeserializeOwned + Default>(&self, key: ConfigKey) -> T {
        let value = self.get_value(key.as_str(), key.default_value()).await;
        serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::warn!("Config {} has an unexpected type: {}", key, e);
            serde_json::from_value(key.default_value()).unwrap_or_default()
        })
    }

    /// Cached payload of `key`, loading it from the store on a miss
    pub(crate) async fn payload(&self, key: &str) -> Option<ConfigPayload> {
        let cache_key = keys::system_config_key(key);
        if let Some(payload) = read_payload(self.cache.as_ref(), &cache_key, key).await {
            return Some(payload);
        }
        let payload = self.load(key).await?;
        write_payload(self.cache.as_ref(), &cache_key, &payload).await;
        Some(payload)
    }

    /// Row of `key` when it is active, for inheritance checks
    pub(crate) async fn active_row(&self, key: &str) -> Option<system_config::Model> {
        match self.store.system_config(key).await {
            Ok(row) => row.filter(|row| row.is_active),
            Err(e) => {
                tracing::warn!("Failed to load config {}: {}", key, e);
                None
            }
        }
    }

    async fn load(&self, key: &str) -> Option<ConfigPayload> {
        let row = self.active_row(key).await?;
        let configs = match self.store.system_configs().await {
            Ok(configs) => configs,
            Err(e) => {
                tracing::warn!("Failed to load render context for {}: {}", key, e);
                Vec::new()
            }
        };
        let context = render::context_for(
            key,
            configs
                .iter()
                .filter(|c| c.is_active)
                .map(|c| (c.key.as_str(), c.value.as_str())),
        );
        Some(ConfigPayload {
            key: row.key.clone(),
            access: row.access,
            value: decode_value(key, &row.value, &context),
        })
    }

    /// Store `value` under `key`, creating an active row when missing
    pub async fn set_value(&self, key: &str, value: &Value) -> AppResult<()> {
        let raw = serde_json::to_string(value)?;
        let row = match self.store.system_config(key).await? {
            Some(row) => system_config::Model { value: raw, ..row },
            None => system_config::Model {
                id: 0,
                key: key.to_string(),
                value: raw,
                is_active: true,
                access: true,
                inherit: false,
                description: String::new(),
            },
        };
        self.store.save_system_config(row).await?;
        self.invalid_cache(key).await;
        Ok(())
    }

    /// Delete the row of `key`, then evict what was derived from it
    pub async fn del_value(&self, key: &str) -> AppResult<bool> {
        let deleted = self.store.delete_system_config(key).await?;
        self.invalid_cache(key).await;
        Ok(deleted)
    }

    /// Evict `key`, the configs rendered from it and the user values inheriting it
    pub async fn invalid_cache(&self, key: &str) -> usize {
        let mut patterns = vec![keys::system_config_key(key), keys::user_config_pattern(key)];
        match dependents(&self.store, key).await {
            Ok(deps) => patterns.extend(deps.iter().map(|dep| keys::system_config_key(dep))),
            Err(e) => tracing::warn!("Failed to resolve dependents of {}: {}", key, e),
        }
        let mut evicted = 0;
        for pattern in &patterns {
            evicted += evict(self.cache.as_ref(), pattern).await;
        }
        evicted
    }
}

/// Keys whose rendered value depends on `key`, directly or through other configs
pub async fn dependents(store: &SharedStore, key: &str) -> AppResult<Vec<String>> {
    let configs = store.system_configs().await?;
    let mut found = BTreeSet::new();
    let mut pending = vec![key.to_string()];
    while let Some(current) = pending.pop() {
        for config in &configs {
            if config.key != key
                && !found.contains(&config.key)
                && render::references(&config.value, &current)
            {
                found.insert(config.key.clone());
                pending.push(config.key.clone());
            }
        }
    }
    Ok(found.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBackend, MemoryCache};
    use crate::store::{MemoryStore, PermissionStore};
    use crate::test_support::new_config;
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (SysConfig, Arc<MemoryStore>, Arc<MemoryCache>) {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        (SysConfig::new(store.clone(), cache.clone()), store, cache)
    }

    #[tokio::test]
    async fn test_value_reflects_updates() {
        let (config, store, _) = setup();
        store.save_system_config(new_config("FILE_UPLOAD_SIZE", "5242880")).await.unwrap();
        let size: u64 = config.get(ConfigKey::FileUploadSize).await;
        assert_eq!(size, 5_242_880);

        config.set_value("FILE_UPLOAD_SIZE", &json!(10_485_760)).await.unwrap();
        let size: u64 = config.get(ConfigKey::FileUploadSize).await;
        assert_eq!(size, 10_485_760);
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips() {
        let (config, _, _) = setup();
        let value = json!({"menus": [1, 2], "title": "x"});
        config.set_value("LAYOUT", &value).await.unwrap();
        assert_eq!(config.get_value("LAYOUT", Value::Null).await, value);
    }

    #[tokio::test]
    async fn test_defaults_for_missing_inactive_and_private() {
        let (config, store, _) = setup();
        let enabled: bool = config.get(ConfigKey::PermissionField).await;
        assert!(enabled);

        store
            .save_system_config(system_config::Model {
                is_active: false,
                ..new_config("SITE_TITLE", "\"hidden\"")
            })
            .await
            .unwrap();
        let title: String = config.get(ConfigKey::SiteTitle).await;
        assert_eq!(title, "xadmin");

        store
            .save_system_config(system_config::Model {
                access: false,
                ..new_config("SECRET", "\"s3cret\"")
            })
            .await
            .unwrap();
        assert_eq!(config.get_value("SECRET", json!("none")).await, json!("none"));
    }

    #[tokio::test]
    async fn test_cached_payload_with_other_key_is_ignored() {
        let (config, store, cache) = setup();
        store.save_system_config(new_config("SITE_TITLE", "\"real\"")).await.unwrap();
        cache
            .set(
                &keys::system_config_key("SITE_TITLE"),
                &json!({"key": "OTHER", "access": true, "value": "stale"}),
                None,
            )
            .await
            .unwrap();
        assert_eq!(config.get_value("SITE_TITLE", Value::Null).await, json!("real"));
    }

    #[tokio::test]
    async fn test_rendering_and_dependents() {
        let (config, store, _) = setup();
        store.save_system_config(new_config("SITE_NAME", "\"xadmin\"")).await.unwrap();
        store
            .save_system_config(new_config("SITE_TITLE", "\"{{ SITE_NAME }} admin\""))
            .await
            .unwrap();
        store
            .save_system_config(new_config("LOGIN_TITLE", "\"Login to {{ SITE_TITLE }}\""))
            .await
            .unwrap();

        assert_eq!(config.get_value("SITE_TITLE", Value::Null).await, json!("xadmin admin"));
        let deps = dependents(&config.store, "SITE_NAME").await.unwrap();
        assert_eq!(deps, vec!["LOGIN_TITLE".to_string(), "SITE_TITLE".to_string()]);
    }

    #[tokio::test]
    async fn test_mutual_references_do_not_loop() {
        let (config, store, _) = setup();
        store.save_system_config(new_config("A", "\"a{{ B }}\"")).await.unwrap();
        store.save_system_config(new_config("B", "\"b{{ A }}\"")).await.unwrap();
        assert_eq!(config.get_value("A", Value::Null).await, json!("a"));
        assert_eq!(dependents(&config.store, "A").await.unwrap(), vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_drops_cached_value() {
        let (config, store, cache) = setup();
        store.save_system_config(new_config("SITE_TITLE", "\"custom\"")).await.unwrap();
        assert_eq!(config.get_value("SITE_TITLE", json!("xadmin")).await, json!("custom"));
        assert!(cache.get(&keys::system_config_key("SITE_TITLE")).await.unwrap().is_some());

        assert!(config.del_value("SITE_TITLE").await.unwrap());
        assert!(cache.get(&keys::system_config_key("SITE_TITLE")).await.unwrap().is_none());
        assert_eq!(config.get_value("SITE_TITLE", json!("xadmin")).await, json!("xadmin"));
        assert!(!config.del_value("SITE_TITLE").await.unwrap());
    }
}
