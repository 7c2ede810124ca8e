//! Runtime configuration stored in the database
//!
//! `SysConfig` resolves system-wide keys, `UserConfig` layers per-user
//! overrides on top. Both cache the payload `{key, access, value}` for
//! `CONFIG_TIMEOUT`; a cached payload only counts when its embedded key
//! matches the requested one, and its value is only returned when `access`
//! is set. Lookups never fail: store and cache errors are logged and the
//! caller's default is returned.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::cache::CacheBackend;

pub mod render;
pub mod system;
pub mod user;

pub use system::SysConfig;
pub use user::UserConfig;

/// Lifetime of cached configuration payloads
pub const CONFIG_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 30);

/// Configuration keys known to the application
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// Largest accepted upload in bytes
    FileUploadSize,
    /// Enforce field-level permissions
    PermissionField,
    /// Enforce data (row-level) permissions
    PermissionData,
    SiteTitle,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 4] = [
        ConfigKey::FileUploadSize,
        ConfigKey::PermissionField,
        ConfigKey::PermissionData,
        ConfigKey::SiteTitle,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConfigKey::FileUploadSize => "FILE_UPLOAD_SIZE",
            ConfigKey::PermissionField => "PERMISSION_FIELD",
            ConfigKey::PermissionData => "PERMISSION_DATA",
            ConfigKey::SiteTitle => "SITE_TITLE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    /// Value used when no active row exists
    pub fn default_value(self) -> Value {
        match self {
            ConfigKey::FileUploadSize => json!(5_242_880),
            ConfigKey::PermissionField => json!(true),
            ConfigKey::PermissionData => json!(true),
            ConfigKey::SiteTitle => json!("xadmin"),
        }
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cached form of a resolved configuration value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ConfigPayload {
    pub key: String,
    pub access: bool,
    #[serde(default)]
    pub value: Value,
}

impl ConfigPayload {
    fn value_or(self, default: Value) -> Value {
        if self.access {
            self.value
        } else {
            default
        }
    }
}

/// Render, unquote and JSON-decode a stored value
pub(crate) fn decode_value(key: &str, raw: &str, context: &render::RenderContext) -> Value {
    let rendered = match render::render(raw, context) {
        Ok(rendered) => rendered,
        Err(e) => {
            tracing::warn!("Failed to render config {}: {}", key, e);
            raw.to_string()
        }
    };
    let text = render::unquote(&rendered);
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Config {} is not valid JSON, using raw string: {}", key, e);
            Value::String(text)
        }
    }
}

async fn read_payload(cache: &dyn CacheBackend, cache_key: &str, key: &str) -> Option<ConfigPayload> {
    let raw = match cache.get(cache_key).await {
        Ok(raw) => raw?,
        Err(e) => {
            tracing::warn!("Config cache read failed for {}: {}", cache_key, e);
            return None;
        }
    };
    serde_json::from_value::<ConfigPayload>(raw)
        .ok()
        .filter(|payload| payload.key == key)
}

async fn write_payload(cache: &dyn CacheBackend, cache_key: &str, payload: &ConfigPayload) {
    let result = match serde_json::to_value(payload) {
        Ok(raw) => cache.set(cache_key, &raw, Some(CONFIG_TIMEOUT)).await,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        tracing::warn!("Config cache write failed for {}: {}", cache_key, e);
    }
}

async fn evict(cache: &dyn CacheBackend, pattern: &str) -> usize {
    match crate::cache::invalidate(cache, pattern).await {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!("Config cache evict failed for {}: {}", pattern, e);
            0
        }
    }
}
