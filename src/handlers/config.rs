//! Configuration handlers
//!
//! Read access to system and personal configuration values

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::middleware::auth::CurrentUser;
use crate::routes::ApiResponse;
use crate::state::AppState;
use crate::sysconfig::ConfigKey;

/// Known keys fall back to their own default, anything else to null
fn default_for(key: &str) -> Value {
    ConfigKey::from_name(key).map_or(Value::Null, ConfigKey::default_value)
}

#[derive(Debug, Serialize)]
pub struct ConfigValue {
    pub key: String,
    pub value: Value,
}

/// GET /api/system/config/:key
pub async fn system_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<ApiResponse<ConfigValue>> {
    let value = state.sys_config.get_value(&key, default_for(&key)).await;
    Json(ApiResponse::success(ConfigValue { key, value }))
}

/// GET /api/system/userinfo/config/:key
pub async fn user_config(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(key): Path<String>,
) -> Json<ApiResponse<ConfigValue>> {
    let value = state.user_config.get_value(user.id, &key, default_for(&key)).await;
    Json(ApiResponse::success(ConfigValue { key, value }))
}
