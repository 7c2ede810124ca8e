//! xadmin permission engine
//!
//! Resolves which menus, endpoints, fields and data rules a user may access,
//! memoizes those answers in a shared cache, and keeps the cache consistent
//! through an explicit invalidation graph driven by every administrative
//! write.

pub mod admin;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod handlers;
pub mod invalidation;
pub mod middleware;
pub mod permission;
pub mod routes;
pub mod serializer;
pub mod state;
pub mod store;
pub mod sysconfig;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, AppResult};
pub use state::AppState;
