//! Per-user configuration overrides
//!
//! A user's active personal row wins. Without one, the system value is used
//! only when the system row is marked `inherit`.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{decode_value, evict, read_payload, render, write_payload, ConfigKey, ConfigPayload, SysConfig};
use crate::cache::{keys, SharedCache};
use crate::entity::user_personal_config;
use crate::error::AppResult;
use crate::store::SharedStore;

#[derive(Clone)]
pub struct UserConfig {
    store: SharedStore,
    cache: SharedCache,
    system: SysConfig,
}

impl UserConfig {
    pub fn new(store: SharedStore, cache: SharedCache, system: SysConfig) -> Self {
        Self {
            store,
            cache,
            system,
        }
    }

    pub async fn get_value(&self, owner_id: i64, key: &str, default: Value) -> Value {
        let cache_key = keys::user_config_key(owner_id, key);
        if let Some(payload) = read_payload(self.cache.as_ref(), &cache_key, key).await {
            return payload.value_or(default);
        }
        match self.load(owner_id, key).await {
            Some(payload) => {
                write_payload(self.cache.as_ref(), &cache_key, &payload).await;
                payload.value_or(default)
            }
            None => default,
        }
    }

    pub async fn get<T: DeserializeOwned + Default>(&self, owner_id: i64, key: ConfigKey) -> T {
        let value = self.get_value(owner_id, key.as_str(), key.default_value()).await;
        serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::warn!("User config {} of {} has an unexpected type: {}", key, owner_id, e);
            serde_json::from_value(key.default_value()).unwrap_or_default()
        })
    }

    async fn load(&self, owner_id: i64, key: &str) -> Option<ConfigPayload> {
        let personal = match self.store.user_config(owner_id, key).await {
            Ok(row) => row.filter(|row| row.is_active),
            Err(e) => {
                tracing::warn!("Failed to load config {} of user {}: {}", key, owner_id, e);
                None
            }
        };
        if let Some(row) = personal {
            return Some(ConfigPayload {
                key: row.key.clone(),
                access: row.access,
                value: decode_value(key, &row.value, &render::RenderContext::new()),
            });
        }
        let inherited = self.system.active_row(key).await.filter(|row| row.inherit)?;
        tracing::debug!("User {} inherits config {}", owner_id, inherited.key);
        self.system.payload(key).await
    }

    pub async fn set_value(&self, owner_id: i64, key: &str, value: &Value) -> AppResult<()> {
        let raw = serde_json::to_string(value)?;
        let row = match self.store.user_config(owner_id, key).await? {
            Some(row) => user_personal_config::Model { value: raw, ..row },
            None => user_personal_config::Model {
                id: 0,
                owner_id,
                key: key.to_string(),
                value: raw,
                is_active: true,
                access: true,
                description: String::new(),
            },
        };
        self.store.save_user_config(row).await?;
        self.invalid_cache(owner_id, key).await;
        Ok(())
    }

    pub async fn del_value(&self, owner_id: i64, key: &str) -> AppResult<bool> {
        let deleted = self.store.delete_user_config(owner_id, key).await?;
        self.invalid_cache(owner_id, key).await;
        Ok(deleted)
    }

    pub async fn invalid_cache(&self, owner_id: i64, key: &str) -> usize {
        evict(self.cache.as_ref(), &keys::user_config_key(owner_id, key)).await
    }
}
