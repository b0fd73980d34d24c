//! Inbound frame classification.
//!
//! The wire format has no discriminator tag, so classification is an ordered
//! sequence of structural probes — each one checks the discriminator fields
//! of one response shape and yields a typed [`Payload`] on the first hit:
//!
//! 1. literal `"pong"` text
//! 2. subscribe/unsubscribe acknowledgement (`event` token + `arg`)
//! 3. login reply / error frame (`event` = `login` | `error`)
//! 4. JRPC trading reply (`id`/`op`/`code`)
//! 5. depth push (`arg.channel` in the depth set)
//! 6. generic channel push (`arg` + `data`)
//!
//! A decode failure for one shape just disqualifies it; classification never
//! panics on malformed input. Frames matching nothing are reported as a
//! protocol error and dropped from routing (the raw hook still sees them).

use std::io::Read;

use vx5_core::Vx5Error;

use crate::event::Event;
use crate::msg::{
    AckMsg, DepthMsg, ErrMsg, JrpcRsp, OP_ERROR, OP_LOGIN, OP_SUBSCRIBE, OP_UNSUBSCRIBE, Payload,
    PushMsg,
};

/// Channels whose pushes flow through the depth synchronizer.
pub const DEPTH_CHANNELS: &[&str] = &["books", "books5", "books-l2-tbt", "books50-l2-tbt"];

/// Decompress a raw-deflate binary frame into text.
pub fn inflate(data: &[u8]) -> Result<String, Vx5Error> {
    let mut decoder = flate2::read::DeflateDecoder::new(data);
    let mut out = String::new();
    decoder
        .read_to_string(&mut out)
        .map_err(|e| Vx5Error::Protocol(format!("inflate failed: {e}")))?;
    Ok(out)
}

/// Classify a decompressed text frame into an `(event, payload)` pair.
pub fn classify(raw: &str) -> Result<(Event, Payload), Vx5Error> {
    if raw == "pong" {
        return Ok((Event::Ping, Payload::Pong));
    }

    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| Vx5Error::Protocol(format!("unrecognized message: {e}")))?;

    // Ack / login / error frames carry an "event" token.
    if let Some(event_token) = value.get("event").and_then(|v| v.as_str()) {
        match event_token {
            OP_SUBSCRIBE | OP_UNSUBSCRIBE => {
                if let Ok(ack) = serde_json::from_value::<AckMsg>(value.clone()) {
                    let channel = ack.arg.get("channel").map(String::as_str).unwrap_or("");
                    let evt = Event::from_channel(channel);
                    return Ok((evt, Payload::Ack(ack)));
                }
            }
            OP_LOGIN => {
                if let Ok(err) = serde_json::from_value::<ErrMsg>(value.clone()) {
                    return Ok((Event::Login, Payload::Err(err)));
                }
            }
            OP_ERROR => {
                if let Ok(err) = serde_json::from_value::<ErrMsg>(value.clone()) {
                    let evt = classify_error(&err);
                    return Ok((evt, Payload::Err(err)));
                }
            }
            _ => {}
        }
    }

    // JRPC reply: id/op/code discriminators.
    if value.get("id").is_some() && value.get("op").is_some() && value.get("code").is_some() {
        if let Ok(rsp) = serde_json::from_value::<JrpcRsp>(value.clone()) {
            let evt = Event::from_channel(&rsp.op);
            if evt != Event::Unknown {
                return Ok((evt, Payload::Jrpc(rsp)));
            }
        }
    }

    // Pushes: arg + data. Depth channels split off into their own event.
    if value.get("arg").is_some() && value.get("data").is_some() {
        let channel = value
            .get("arg")
            .and_then(|a| a.get("channel"))
            .and_then(|c| c.as_str())
            .unwrap_or("");

        if DEPTH_CHANNELS.contains(&channel) {
            if let Ok(depth) = serde_json::from_value::<DepthMsg>(value.clone()) {
                return Ok((Event::DepthData, Payload::Depth(depth)));
            }
        }

        if let Ok(push) = serde_json::from_value::<PushMsg>(value) {
            return Ok((Event::BookedData, Payload::Push(push)));
        }
    }

    Err(Vx5Error::Protocol("unrecognized message".to_string()))
}

/// Resolve the originating event of an error frame.
///
/// Tries the fixed table of authentication error codes first, then extracts
/// an embedded channel name from the message text, and falls back to the
/// generic error event.
fn classify_error(err: &ErrMsg) -> Event {
    let evt = event_for_error_code(&err.code);
    if evt != Event::Unknown {
        return evt;
    }

    let evt = Event::from_channel(channel_from_error_msg(&err.msg).unwrap_or(""));
    if evt != Event::Unknown {
        return evt;
    }

    Event::Error
}

/// Authentication failures (codes 60001–60011) all originate from login.
fn event_for_error_code(code: &str) -> Event {
    match code {
        "60001" | "60002" | "60003" | "60004" | "60005" | "60006" | "60007" | "60008"
        | "60009" | "60010" | "60011" => Event::Login,
        _ => Event::Unknown,
    }
}

/// Extract a channel name embedded in an error message.
///
/// Matches the server's phrasing
/// `channel:index-tickers,instId:BTC-USDT doesn't exist` — the text between
/// the last `channel:` and the following comma.
fn channel_from_error_msg(msg: &str) -> Option<&str> {
    let start = msg.rfind("channel:")? + "channel:".len();
    let rest = &msg[start..];
    let end = rest.find(',')?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pong_literal() {
        let (evt, payload) = classify("pong").unwrap();
        assert_eq!(evt, Event::Ping);
        assert!(matches!(payload, Payload::Pong));
    }

    #[test]
    fn subscribe_ack() {
        let raw = r#"{"event":"subscribe","arg":{"channel":"tickers","instId":"BTC-USDT"}}"#;
        let (evt, payload) = classify(raw).unwrap();
        assert_eq!(evt, Event::Tickers);
        match payload {
            Payload::Ack(ack) => assert_eq!(ack.event, "subscribe"),
            other => panic!("expected Ack, got {other:?}"),
        }
    }

    #[test]
    fn unsubscribe_ack_with_period_channel() {
        let raw = r#"{"event":"unsubscribe","arg":{"channel":"candle30m","instId":"BTC-USDT"}}"#;
        let (evt, _) = classify(raw).unwrap();
        assert_eq!(evt, Event::Candle);
    }

    #[test]
    fn login_reply() {
        let raw = r#"{"event":"login","code":"0","msg":""}"#;
        let (evt, payload) = classify(raw).unwrap();
        assert_eq!(evt, Event::Login);
        match payload {
            Payload::Err(err) => assert_eq!(err.code, "0"),
            other => panic!("expected Err, got {other:?}"),
        }
    }

    #[test]
    fn error_with_auth_code_maps_to_login() {
        let raw = r#"{"event":"error","code":"60009","msg":"Login failed."}"#;
        let (evt, _) = classify(raw).unwrap();
        assert_eq!(evt, Event::Login);
    }

    #[test]
    fn error_with_channel_in_message() {
        let raw =
            r#"{"event":"error","code":"60018","msg":"channel:positions,ccy:BTC doesn't exist"}"#;
        let (evt, _) = classify(raw).unwrap();
        assert_eq!(evt, Event::Positions);
    }

    #[test]
    fn error_falls_back_to_generic_event() {
        let raw = r#"{"event":"error","code":"60012","msg":"Illegal request."}"#;
        let (evt, payload) = classify(raw).unwrap();
        assert_eq!(evt, Event::Error);
        assert!(matches!(payload, Payload::Err(_)));
    }

    #[test]
    fn jrpc_reply() {
        let raw = r#"{
            "id": "1512",
            "op": "order",
            "data": [{"ordId": "12345689", "clOrdId": "", "sCode": "0", "sMsg": ""}],
            "code": "0",
            "msg": ""
        }"#;
        let (evt, payload) = classify(raw).unwrap();
        assert_eq!(evt, Event::PlaceOrder);
        match payload {
            Payload::Jrpc(rsp) => {
                assert_eq!(rsp.id, "1512");
                assert_eq!(rsp.data[0]["ordId"], "12345689");
            }
            other => panic!("expected Jrpc, got {other:?}"),
        }
    }

    #[test]
    fn depth_push() {
        let raw = r#"{
            "arg": {"channel": "books", "instId": "BTC-USDT"},
            "action": "snapshot",
            "data": [{
                "asks": [["101", "2", "0", "1"]],
                "bids": [["100", "1", "0", "1"]],
                "ts": "1597026383085",
                "checksum": -538653813
            }]
        }"#;
        let (evt, payload) = classify(raw).unwrap();
        assert_eq!(evt, Event::DepthData);
        match payload {
            Payload::Depth(depth) => {
                assert_eq!(depth.action, "snapshot");
                assert_eq!(depth.data[0].bids[0][0], "100");
            }
            other => panic!("expected Depth, got {other:?}"),
        }
    }

    #[test]
    fn books5_classifies_as_depth() {
        let raw = r#"{
            "arg": {"channel": "books5", "instId": "BTC-USDT"},
            "data": [{"asks": [["101","2"]], "bids": [["100","1"]], "ts": "1", "checksum": 0}]
        }"#;
        let (evt, _) = classify(raw).unwrap();
        assert_eq!(evt, Event::DepthData);
    }

    #[test]
    fn generic_push() {
        let raw = r#"{
            "arg": {"channel": "tickers", "instId": "BTC-USDT"},
            "data": [{"last": "30000.1"}]
        }"#;
        let (evt, payload) = classify(raw).unwrap();
        assert_eq!(evt, Event::BookedData);
        match payload {
            Payload::Push(push) => assert_eq!(push.arg["channel"], "tickers"),
            other => panic!("expected Push, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_frames_error_without_panic() {
        assert!(classify("not json at all").is_err());
        assert!(classify(r#"{"foo": "bar"}"#).is_err());
        assert!(classify(r#"{"id": "1", "op": "no-such-op", "code": "0"}"#).is_err());
        assert!(classify("").is_err());
    }

    #[test]
    fn inflate_roundtrip() {
        use std::io::Write;
        let text = r#"{"event":"subscribe","arg":{"channel":"trades"}}"#;
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(inflate(&compressed).unwrap(), text);
        assert!(inflate(b"\xff\xfe\x01garbage").is_err());
    }

    #[test]
    fn channel_extraction_takes_last_match() {
        assert_eq!(
            channel_from_error_msg("channel:index-tickers,instId:BTC-USDT1 doesn't exist"),
            Some("index-tickers")
        );
        assert_eq!(channel_from_error_msg("no channel here"), None);
        // No comma terminator, no match.
        assert_eq!(channel_from_error_msg("channel:books"), None);
    }
}
