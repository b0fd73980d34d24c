//! # vx5-core
//!
//! Shared kernel for the vx5 exchange client, providing:
//!
//! - **Configuration** (`config`) — JSON config deserialization, credentials
//! - **Error types** (`error`) — domain-specific `Vx5Error` via thiserror
//! - **Signing** (`sign`) — pre-hash construction + HMAC-SHA256/base64
//! - **Time utilities** (`time_util`) — epoch/ISO timestamps
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod sign;
pub mod time_util;

pub use config::{AppConfig, Credentials};
pub use error::Vx5Error;
