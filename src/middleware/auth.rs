//! Authentication and permission middleware
//!
//! Resolves the session user and runs `IsAuthenticated` for every API route
//! except the public ones. On success the `RequestPermission` and the
//! `CurrentUser` are attached to the request.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_sessions::Session;

use crate::entity::user_info;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Session key for storing the user id
pub const SESSION_USER_KEY: &str = "user_id";

/// Extension holding the authenticated user
#[derive(Clone, Debug)]
pub struct CurrentUser(pub user_info::Model);

/// Paths that don't require authentication
fn is_public_path(path: &str) -> bool {
    !path.starts_with("/api") || path == "/api/system/login" || path == "/api/health"
}

pub async fn auth_layer(
    State(state): State<AppState>,
    session: Session,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if is_public_path(&path) {
        return next.run(request).await;
    }

    let user = match session_user(&state, &session).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };
    let method = request.method().clone();
    match state.guard.has_permission(user.as_ref(), &method, &path).await {
        Ok(granted) => {
            request.extensions_mut().insert(granted);
            if let Some(user) = user {
                request.extensions_mut().insert(CurrentUser(user));
            }
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

async fn session_user(state: &AppState, session: &Session) -> AppResult<Option<user_info::Model>> {
    let user_id: Option<i64> = session.get(SESSION_USER_KEY).await.map_err(|e| {
        tracing::warn!("Failed to read session: {}", e);
        AppError::InvalidSession
    })?;
    let Some(user_id) = user_id else {
        return Ok(None);
    };
    match state.store.user(user_id).await? {
        Some(user) => Ok(Some(user)),
        None => {
            tracing::warn!("Session user no longer exists: {}", user_id);
            Err(AppError::InvalidSession)
        }
    }
}
