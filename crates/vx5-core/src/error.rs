//! Typed error definitions for the vx5 client.
//!
//! Provides [`Vx5Error`] for domain-specific errors that are more informative
//! than plain `anyhow::Error` strings. All variants implement `std::error::Error`
//! via `thiserror`, so they integrate seamlessly with `anyhow::Result`.

use thiserror::Error;

/// Domain-specific errors for the vx5 client.
///
/// The variants follow the failure taxonomy of the streaming protocol:
/// connection errors are fatal to the whole client, protocol errors drop a
/// single frame, correlation errors are returned to one caller, depth errors
/// mark one channel as desynced, validation errors are rejected before any
/// network I/O.
#[derive(Debug, Error)]
pub enum Vx5Error {
    /// WebSocket dial, read, or write error — fatal, triggers shutdown.
    #[error("connection error: {0}")]
    Connection(String),

    /// Inbound frame did not match any known message shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Request already in flight for this event.
    #[error("request already in flight for event {0}")]
    AlreadyInFlight(String),

    /// Correlated request timed out before all expected replies arrived.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The connection was closed while a request was pending.
    #[error("connection closed: {0}")]
    Closed(String),

    /// Depth checksum mismatch or missing baseline snapshot.
    #[error("depth error: {0}")]
    Depth(String),

    /// Request rejected before any network I/O (bad channel, malformed args).
    #[error("validation error: {0}")]
    Validation(String),

    /// Result-validation pass failed after transport-level delivery succeeded.
    #[error("result check failed: {0}")]
    ResultCheck(String),
}
