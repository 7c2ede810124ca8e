use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tower_sessions::{MemoryStore, SessionManagerLayer};

use crate::error::code;
use crate::handlers;
use crate::middleware::{auth_layer, request_id_layer};
use crate::state::AppState;

pub mod health;

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: u32,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: code::SUCCESS,
            detail: "success".to_string(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn success_msg(detail: impl Into<String>) -> Self {
        Self {
            code: code::SUCCESS,
            detail: detail.into(),
            data: None,
        }
    }
}

/// Create the main router
pub fn create_router(state: AppState) -> Router {
    // Session store (in-memory for now)
    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false) // Set to true in production with HTTPS
        .with_http_only(true);

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(health::health_check))
        // Auth routes
        .route("/system/login", post(handlers::auth::login))
        .route("/system/logout", post(handlers::auth::logout))
        // Current user
        .route("/system/userinfo", get(handlers::userinfo::profile))
        .route("/system/userinfo/routes", get(handlers::userinfo::routes))
        .route("/system/userinfo/menus", get(handlers::userinfo::menus))
        .route("/system/userinfo/permissions", get(handlers::userinfo::permissions))
        .route("/system/userinfo/config/:key", get(handlers::config::user_config))
        // Configuration
        .route("/system/config/:key", get(handlers::config::system_config));

    Router::new()
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
        .layer(session_layer)
        .layer(middleware::from_fn(request_id_layer))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
