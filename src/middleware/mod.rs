//! Middleware for the BeanVault API

pub mod auth;

pub use auth::Caller;
