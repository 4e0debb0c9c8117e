//! Project bridge - a path-prefix reverse proxy for the marketing site
//!
//! This library provides a small gateway that:
//! - Keeps a registry of backend services in SQLite, each owning a path prefix
//! - Routes every inbound request to the enabled service with the longest
//!   matching prefix and relays the upstream response verbatim
//! - Maps upstream timeouts and connection failures to 504 / 502
//! - Records one request log entry per forwarded request
//! - Exposes a small management API for listing, registering, updating
//!   services and reading traffic statistics

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod forwarder;
pub mod logger;
pub mod matcher;
pub mod metrics;
pub mod proxy;
pub mod registry;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
