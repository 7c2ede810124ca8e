//! Authentication handlers
//!
//! Implements login and logout

use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use tower_sessions::Session;

use crate::entity::user_info::{self, UserResponse};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::{CurrentUser, SESSION_USER_KEY};
use crate::routes::ApiResponse;
use crate::state::AppState;

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// POST /api/system/login
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<UserResponse>>> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(AppError::BadRequest("Username and password are required".to_string()));
    }

    let Some(user) = state.store.user_by_username(&req.username).await? else {
        tracing::warn!("Login failed: user not found - {}", req.username);
        return Err(AppError::BadRequest("Username or password error".to_string()));
    };

    // Verify password using bcrypt
    if !bcrypt::verify(&req.password, &user.password).unwrap_or(false) {
        tracing::warn!("Login failed: wrong password - {}", req.username);
        return Err(AppError::BadRequest("Username or password error".to_string()));
    }
    if !user.is_active {
        tracing::warn!("Login failed: user disabled - {}", req.username);
        return Err(AppError::BadRequest("User is disabled".to_string()));
    }

    // last_login feeds no cached permission data, so the store is written directly
    let user = state
        .store
        .save_user(user_info::Model {
            last_login: chrono::Utc::now().timestamp(),
            ..user
        })
        .await?;

    session.insert(SESSION_USER_KEY, user.id).await.map_err(|e| {
        tracing::error!("Failed to save session: {}", e);
        AppError::Internal("Failed to save session".to_string())
    })?;

    tracing::info!("User logged in: {}", user.username);
    Ok(Json(ApiResponse::success(UserResponse::from(user))))
}

/// POST /api/system/logout
pub async fn logout(
    session: Session,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> AppResult<Json<ApiResponse<()>>> {
    session.flush().await.map_err(|e| {
        tracing::error!("Failed to flush session: {}", e);
        AppError::Internal("Failed to flush session".to_string())
    })?;
    tracing::info!("User logged out: {}", user.username);
    Ok(Json(ApiResponse::success_msg("logout success")))
}
