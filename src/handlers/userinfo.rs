//! Per-user navigation, permission and profile endpoints
//!
//! The route tree and the flat menu list are response-cached per user and
//! dropped by the invalidation graph whenever the menus behind them change.

use axum::{
    extract::{Query, State},
    http::Method,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::cache::{keys, ResponseCacheSpec};
use crate::catalog::USER_MODEL;
use crate::entity::user_info::{self, UserResponse};
use crate::error::AppResult;
use crate::middleware::auth::CurrentUser;
use crate::permission::routes::{accessible_menus, build_route_tree, flat_menus, MenuItem, RouteNode};
use crate::permission::RequestPermission;
use crate::routes::ApiResponse;
use crate::serializer::filter_fields;
use crate::state::AppState;

pub const USER_ROUTES: ResponseCacheSpec =
    ResponseCacheSpec::new(keys::USER_ROUTES_VIEW, Duration::from_secs(60 * 60 * 24 * 7));
pub const USER_MENUS: ResponseCacheSpec =
    ResponseCacheSpec::new(keys::USER_MENU_VIEW, Duration::from_secs(60 * 60 * 24 * 7));

/// Methods reported by the permissions endpoint
const METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

#[derive(Debug, Default, Deserialize)]
pub struct CacheQuery {
    /// Bypass the response cache
    #[serde(default)]
    pub no_cache: bool,
}

#[derive(Debug, Serialize)]
pub struct UserPermissions {
    pub is_superuser: bool,
    /// Method → granted path patterns
    pub permissions: BTreeMap<String, Vec<String>>,
}

/// GET /api/system/userinfo
pub async fn profile(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(permission): Extension<RequestPermission>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let record = serde_json::to_value(UserResponse::from(user))?;
    Ok(Json(ApiResponse::success(filter_fields(record, USER_MODEL, &permission))))
}

/// GET /api/system/userinfo/routes
pub async fn routes(
    State(state): State<AppState>,
    method: Method,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<CacheQuery>,
) -> Response {
    let key = keys::user_view_part(user.id, "");
    state
        .responses
        .cache_response(&USER_ROUTES, &method, Some(&key), query.no_cache, || async {
            match route_tree(&state, &user).await {
                Ok(tree) => Json(ApiResponse::success(tree)).into_response(),
                Err(e) => e.into_response(),
            }
        })
        .await
}

/// GET /api/system/userinfo/menus
pub async fn menus(
    State(state): State<AppState>,
    method: Method,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<CacheQuery>,
) -> Response {
    let key = keys::user_view_part(user.id, "");
    state
        .responses
        .cache_response(&USER_MENUS, &method, Some(&key), query.no_cache, || async {
            match menu_list(&state, &user).await {
                Ok(menus) => Json(ApiResponse::success(menus)).into_response(),
                Err(e) => e.into_response(),
            }
        })
        .await
}

/// GET /api/system/userinfo/permissions
pub async fn permissions(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> AppResult<Json<ApiResponse<UserPermissions>>> {
    let maps = futures::future::try_join_all(
        METHODS
            .iter()
            .map(|method| state.resolver.get_user_permission(&user, method)),
    )
    .await?;
    let permissions = METHODS
        .iter()
        .zip(maps)
        .map(|(method, map)| {
            let paths = map.iter().map(|entry| entry.path.clone()).collect();
            (method.to_string(), paths)
        })
        .collect();
    Ok(Json(ApiResponse::success(UserPermissions {
        is_superuser: user.is_superuser,
        permissions,
    })))
}

async fn route_tree(state: &AppState, user: &user_info::Model) -> AppResult<Vec<RouteNode>> {
    let menus = accessible_menus(&state.resolver, user).await?;
    let ids: Vec<i64> = menus.iter().map(|m| m.id).collect();
    let metas = state.store.menu_metas(&ids).await?;
    Ok(build_route_tree(&menus, &metas))
}

async fn menu_list(state: &AppState, user: &user_info::Model) -> AppResult<Vec<MenuItem>> {
    let menus = accessible_menus(&state.resolver, user).await?;
    let ids: Vec<i64> = menus.iter().map(|m| m.id).collect();
    let metas = state.store.menu_metas(&ids).await?;
    Ok(flat_menus(&menus, &metas))
}
