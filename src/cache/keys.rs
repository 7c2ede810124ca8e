//! Cache key naming
//!
//! Invalidation call sites rebuild these names to delete entries, so every key
//! written by the memoization layer or the config cache is constructed here.

/// Prefix of `MagicCacheData` entries
pub const MAGIC_DATA_PREFIX: &str = "magic_cache_data";
/// Prefix of `MagicCacheResponse` entries
pub const MAGIC_RESPONSE_PREFIX: &str = "magic_cache_response";

/// Memoized function names
pub const USER_PERMISSION_FN: &str = "get_user_permission";
pub const USER_FIELD_QUERYSET_FN: &str = "get_user_field_queryset";
pub const USER_DATA_RULES_FN: &str = "get_user_data_rules";

/// Response-cached views
pub const USER_ROUTES_VIEW: &str = "UserRoutesView";
pub const USER_MENU_VIEW: &str = "UserMenuView";

/// `magic_cache_data_<name>[_<key>]`
pub fn magic_data_key(name: &str, key: Option<&str>) -> String {
    match key {
        Some(key) => format!("{}_{}_{}", MAGIC_DATA_PREFIX, name, key),
        None => format!("{}_{}", MAGIC_DATA_PREFIX, name),
    }
}

/// `magic_cache_response_<View>_<method>[_<key>]`
pub fn magic_response_key(view: &str, method: &str, key: Option<&str>) -> String {
    match key {
        Some(key) => format!("{}_{}_{}_{}", MAGIC_RESPONSE_PREFIX, view, method, key),
        None => format!("{}_{}_{}", MAGIC_RESPONSE_PREFIX, view, method),
    }
}

/// Key part of `get_user_permission`: `<pk>_<METHOD>`
pub fn user_permission_part(user_id: i64, method: &str) -> String {
    format!("{}_{}", user_id, method.to_ascii_uppercase())
}

/// Key part of per-menu lookups: `<pk>_<menu>`
pub fn user_menu_part(user_id: i64, menu_id: i64) -> String {
    format!("{}_{}", user_id, menu_id)
}

/// Key part of per-user cached views: `<pk>_<variant>`
pub fn user_view_part(user_id: i64, variant: &str) -> String {
    if variant.is_empty() {
        format!("{}_-", user_id)
    } else {
        format!("{}_{}", user_id, variant)
    }
}

/// Every memoized entry of `name` for one user
pub fn user_data_pattern(name: &str, user_id: i64) -> String {
    format!("{}_{}_{}_*", MAGIC_DATA_PREFIX, name, user_id)
}

/// Every memoized entry of `name`
pub fn all_data_pattern(name: &str) -> String {
    format!("{}_{}_*", MAGIC_DATA_PREFIX, name)
}

/// Every memoized per-menu entry of `name` for one menu, across users
pub fn menu_data_pattern(name: &str, menu_id: i64) -> String {
    format!("{}_{}_*_{}", MAGIC_DATA_PREFIX, name, menu_id)
}

/// Every cached `GET` response of `view` for one user
pub fn user_view_pattern(view: &str, user_id: i64) -> String {
    format!("{}_{}_get_{}_*", MAGIC_RESPONSE_PREFIX, view, user_id)
}

/// Every cached response of `view`
pub fn all_view_pattern(view: &str) -> String {
    format!("{}_{}_*", MAGIC_RESPONSE_PREFIX, view)
}

/// System configuration value
pub fn system_config_key(key: &str) -> String {
    format!("config_system_{}", key)
}

/// Personal configuration value of one user
pub fn user_config_key(owner_id: i64, key: &str) -> String {
    format!("config_user_{}_{}", owner_id, key)
}

/// Personal configuration values of `key` across users
pub fn user_config_pattern(key: &str) -> String {
    format!("config_user_*_{}", key)
}
