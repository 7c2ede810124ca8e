//! Request handlers module

pub mod auth;
pub mod config;
pub mod userinfo;
