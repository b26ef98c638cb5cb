//! BeanVault Backend Library
//!
//! Coffee batch tokenization: content-addressed batch metadata, an on-chain
//! registry and token ledger, oracle-driven verification, burn-backed
//! redemptions and inventory threshold monitoring.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod handlers;
pub mod metadata;
pub mod middleware;
pub mod models;
pub mod monitor;
pub mod redemption;
pub mod registry;
pub mod routes;
pub mod state;
pub mod verification;
pub mod websocket;
