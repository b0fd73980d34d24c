//! Wire envelopes and internal message types.
//!
//! Two request envelope styles exist on this protocol:
//!
//! - the subscribe/unsubscribe envelope `{op, args:[{channel, ...filters}]}`
//!   ([`SubReq`]), acknowledged per argument group ([`AckMsg`]);
//! - the JRPC envelope `{id, op, args:[...]}` ([`JrpcReq`]) used for trading
//!   commands, replied with `{id, op, data, code, msg}` ([`JrpcRsp`]).
//!
//! Inbound frames classify into the [`Payload`] variants; [`Msg`] pairs a
//! payload with the receive timestamp and is the unit placed on every
//! internal queue.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Envelope operation tokens.
pub const OP_SUBSCRIBE: &str = "subscribe";
pub const OP_UNSUBSCRIBE: &str = "unsubscribe";
pub const OP_LOGIN: &str = "login";
pub const OP_ERROR: &str = "error";

/// Depth push actions.
pub const DEPTH_SNAPSHOT: &str = "snapshot";
pub const DEPTH_UPDATE: &str = "update";

/// JRPC success code.
pub const JRPC_OK: &str = "0";

/// Which envelope style a request (and its replies) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    /// Subscribe/unsubscribe and login envelopes.
    Normal,
    /// JRPC trading command envelopes.
    Jrpc,
}

/// An outbound request that the correlator can serialize and account for.
pub trait WsRequest: Send + Sync {
    /// Envelope style, checked against reply payloads in result validation.
    fn kind(&self) -> MsgKind;
    /// Serialized wire text.
    fn to_text(&self) -> String;
    /// Declared fanout: how many replies this request expects.
    fn expected_responses(&self) -> usize;
}

/// Subscribe/unsubscribe/login request envelope.
#[derive(Debug, Clone, Serialize)]
pub struct SubReq {
    pub op: String,
    pub args: Vec<HashMap<String, String>>,
}

impl WsRequest for SubReq {
    fn kind(&self) -> MsgKind {
        MsgKind::Normal
    }

    fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    // One ack per argument group.
    fn expected_responses(&self) -> usize {
        self.args.len()
    }
}

/// JRPC request envelope for trading commands.
#[derive(Debug, Clone, Serialize)]
pub struct JrpcReq {
    pub id: String,
    pub op: String,
    pub args: Vec<HashMap<String, serde_json::Value>>,
}

impl WsRequest for JrpcReq {
    fn kind(&self) -> MsgKind {
        MsgKind::Jrpc
    }

    fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    // A JRPC call gets exactly one reply regardless of batch size.
    fn expected_responses(&self) -> usize {
        1
    }
}

/// Subscribe/unsubscribe acknowledgement.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AckMsg {
    pub event: String,
    #[serde(default)]
    pub arg: HashMap<String, String>,
}

/// Error or login reply: `{"event":"error","code":"60018","msg":"..."}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrMsg {
    pub event: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub msg: String,
}

/// JRPC reply.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JrpcRsp {
    pub id: String,
    pub op: String,
    #[serde(default)]
    pub data: Vec<HashMap<String, serde_json::Value>>,
    pub code: String,
    #[serde(default)]
    pub msg: String,
}

/// Generic channel push: `{arg:{channel,...}, data:[...]}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PushMsg {
    pub arg: HashMap<String, String>,
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

/// Depth push, with incremental `action` and per-level book data.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DepthMsg {
    pub arg: HashMap<String, String>,
    #[serde(default)]
    pub action: String,
    pub data: Vec<DepthSnapshot>,
}

/// One order-book snapshot: ordered price levels, timestamp, checksum.
///
/// Levels are `[price, size, ...]` string arrays — asks ascending by price,
/// bids descending. Prices and sizes stay as strings end to end so the
/// checksum base string is byte-for-byte what the server computed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DepthSnapshot {
    #[serde(default)]
    pub asks: Vec<Vec<String>>,
    #[serde(default)]
    pub bids: Vec<Vec<String>>,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub checksum: i32,
}

/// A classified inbound payload.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Literal `"pong"` heartbeat reply.
    Pong,
    /// Subscribe/unsubscribe acknowledgement.
    Ack(AckMsg),
    /// Login reply or error frame.
    Err(ErrMsg),
    /// JRPC trading reply.
    Jrpc(JrpcRsp),
    /// Depth channel push.
    Depth(DepthMsg),
    /// Generic channel push.
    Push(PushMsg),
    /// Verbatim frame text, for the raw-message hook.
    Raw(String),
}

impl Payload {
    /// Envelope style of this payload, `None` for frames outside the
    /// request/reply protocol (pong, pushes, raw capture).
    pub fn kind(&self) -> Option<MsgKind> {
        match self {
            Payload::Ack(_) | Payload::Err(_) => Some(MsgKind::Normal),
            Payload::Jrpc(_) => Some(MsgKind::Jrpc),
            _ => None,
        }
    }
}

/// Timestamped message — the unit on all internal queues.
#[derive(Debug, Clone)]
pub struct Msg {
    /// Receive time, microseconds since Unix epoch.
    pub timestamp: u64,
    pub payload: Payload,
}

impl Msg {
    pub fn new(payload: Payload) -> Self {
        Self { timestamp: vx5_core::time_util::now_us(), payload }
    }
}

/// Outcome record for one correlated request: what was sent, when, and every
/// reply collected before the validation pass.
#[derive(Debug, Clone, Default)]
pub struct ProcessDetail {
    /// Endpoint the request went to.
    pub endpoint: String,
    /// Serialized request text.
    pub req_info: String,
    /// Send time, microseconds since Unix epoch.
    pub send_time: u64,
    /// Time the last expected reply arrived.
    pub recv_time: u64,
    /// Collected replies, wire order.
    pub data: Vec<Msg>,
}

impl ProcessDetail {
    /// Elapsed request→last-reply time in microseconds.
    pub fn used_us(&self) -> u64 {
        self.recv_time.saturating_sub(self.send_time)
    }
}

/// Infer the event for a subscribe/unsubscribe argument group from its
/// `channel` key. Groups without a recognizable channel map to
/// [`Event::Unknown`] and are rejected before any I/O.
pub fn event_for_args(param: &HashMap<String, String>) -> Event {
    match param.get("channel") {
        Some(channel) => Event::from_channel(channel),
        None => Event::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_req_serializes_envelope() {
        let mut arg = HashMap::new();
        arg.insert("channel".to_string(), "tickers".to_string());
        arg.insert("instId".to_string(), "BTC-USDT".to_string());
        let req = SubReq { op: OP_SUBSCRIBE.into(), args: vec![arg] };

        let text = req.to_text();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["op"], "subscribe");
        assert_eq!(v["args"][0]["channel"], "tickers");
        assert_eq!(req.expected_responses(), 1);
        assert_eq!(req.kind(), MsgKind::Normal);
    }

    #[test]
    fn jrpc_req_expects_single_reply() {
        let mut arg = HashMap::new();
        arg.insert("instId".to_string(), serde_json::json!("BTC-USDT"));
        let req = JrpcReq {
            id: "1".into(),
            op: "batch-orders".into(),
            args: vec![arg.clone(), arg],
        };
        assert_eq!(req.expected_responses(), 1);
        assert_eq!(req.kind(), MsgKind::Jrpc);
    }

    #[test]
    fn event_for_args_resolves_channel() {
        let mut param = HashMap::new();
        param.insert("channel".to_string(), "account".to_string());
        param.insert("ccy".to_string(), "BTC".to_string());
        assert_eq!(event_for_args(&param), Event::Account);

        param.insert("channel".to_string(), "bogus".to_string());
        assert_eq!(event_for_args(&param), Event::Unknown);

        assert_eq!(event_for_args(&HashMap::new()), Event::Unknown);
    }

    #[test]
    fn depth_snapshot_deserializes_levels() {
        let json = r#"{
            "asks": [["101", "2", "0", "1"]],
            "bids": [["100", "1", "0", "1"]],
            "ts": "1597026383085",
            "checksum": -855196043
        }"#;
        let snap: DepthSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.asks[0][0], "101");
        assert_eq!(snap.bids[0][1], "1");
        assert_eq!(snap.checksum, -855196043);
    }
}
