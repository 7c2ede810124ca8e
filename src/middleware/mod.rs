//! Request middleware

pub mod auth;
pub mod request_id;

pub use auth::{auth_layer, CurrentUser, SESSION_USER_KEY};
pub use request_id::{request_id_layer, RequestId};
