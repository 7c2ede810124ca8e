//! Request authorization

use axum::http::Method;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::matcher::{find_match, permission_target};
use super::{FieldMap, PermissionResolver, UserDataRules};
use crate::entity::user_info;
use crate::error::{AppError, AppResult};
use crate::sysconfig::{ConfigKey, SysConfig};

/// Outcome of a successful permission check, attached to the request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPermission {
    /// Skip field filtering when serializing records
    pub ignore_field_permission: bool,
    /// Permission menu that authorized the request
    pub menu_id: Option<i64>,
    pub model: Option<String>,
    /// Visible fields per model, when field permissions apply
    pub fields: FieldMap,
    /// Row-level rules, when data permissions apply
    pub data_rules: Option<UserDataRules>,
}

impl RequestPermission {
    fn unrestricted() -> Self {
        Self {
            ignore_field_permission: true,
            ..Default::default()
        }
    }
}

/// Authenticated users may only call endpoints granted through their menus.
///
/// Superusers and white-listed paths skip menu and field checks.
#[derive(Clone)]
pub struct IsAuthenticated {
    resolver: PermissionResolver,
    sys_config: SysConfig,
    white_urls: Arc<Vec<Regex>>,
}

impl IsAuthenticated {
    pub fn new(resolver: PermissionResolver, sys_config: SysConfig, white_urls: &[String]) -> Self {
        let white_urls = white_urls
            .iter()
            .filter_map(|pattern| match Regex::new(&format!("^(?:{})", pattern)) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!("Ignoring invalid white url {}: {}", pattern, e);
                    None
                }
            })
            .collect();
        Self {
            resolver,
            sys_config,
            white_urls: Arc::new(white_urls),
        }
    }

    pub fn is_white_listed(&self, path: &str) -> bool {
        self.white_urls.iter().any(|re| re.is_match(path))
    }

    pub async fn has_permission(
        &self,
        user: Option<&user_info::Model>,
        method: &Method,
        path: &str,
    ) -> AppResult<RequestPermission> {
        let Some(user) = user.filter(|u| u.is_active) else {
            return Err(AppError::NotAuthenticated);
        };
        if user.is_superuser || self.is_white_listed(path) {
            return Ok(RequestPermission::unrestricted());
        }

        let field_enabled: bool = self.sys_config.get(ConfigKey::PermissionField).await;
        let (target_method, target_path) = permission_target(method, path);
        let permissions = self
            .resolver
            .get_user_permission(user, target_method.as_str())
            .await?;
        let Some(entry) = find_match(&permissions, &target_path) else {
            return Err(AppError::PermissionDenied(format!(
                "{} {} for user {}",
                method, path, user.id
            )));
        };

        let mut granted = RequestPermission {
            ignore_field_permission: !field_enabled,
            menu_id: Some(entry.menu_id),
            model: entry.model.clone(),
            ..Default::default()
        };
        if field_enabled && entry.model.is_some() {
            granted.fields = self
                .resolver
                .get_user_field_queryset(user, entry.menu_id)
                .await?;
        }
        let data_enabled: bool = self.sys_config.get(ConfigKey::PermissionData).await;
        if data_enabled {
            let rules = self.resolver.get_user_data_rules(user, entry.menu_id).await?;
            if !rules.is_empty() {
                granted.data_rules = Some(rules);
            }
        }
        Ok(granted)
    }
}
