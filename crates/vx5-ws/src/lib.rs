//! # vx5-ws
//!
//! Exchange streaming client: one persistent WebSocket connection carrying
//! market data subscriptions, account subscriptions, and trading commands.
//!
//! ## Architecture
//!
//! [`client::WsClient`] owns the connection and its read/write/heartbeat
//! tasks. Inbound frames classify through [`parse`] into typed payloads and
//! route by [`event::Event`]: replies land on the collector registered by
//! the in-flight request ([`ops`]), unsolicited pushes land on per-class
//! consumer tasks that drive the user hooks and, for checksummed order-book
//! channels, the [`depth`] synchronizer.
//!
//! ## Modules
//!
//! - [`event`] — event taxonomy and the channel-name table
//! - [`msg`] — wire envelopes and internal message types
//! - [`parse`] — inbound frame classification
//! - [`depth`] — order-book merge and checksum verification
//! - [`client`] — connection lifecycle and routing
//! - [`ops`] — request/reply correlation, login, subscribe/unsubscribe
//! - [`channels`] — typed subscription helpers
//! - [`trade`] — trading commands over the JRPC envelope

pub mod channels;
pub mod client;
pub mod depth;
pub mod event;
pub mod msg;
pub mod ops;
pub mod parse;
pub mod trade;

pub use channels::SubAction;
pub use client::{ClientState, WsClient};
pub use event::{Event, Period};
pub use msg::{DepthMsg, DepthSnapshot, ErrMsg, JrpcReq, Msg, Payload, ProcessDetail, PushMsg};
