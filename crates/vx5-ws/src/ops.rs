//! Request/reply correlation and the client's request operations.
//!
//! Every outbound request registers a collector keyed by its event before
//! any bytes leave the process, so replies arriving on the read loop always
//! find a waiter. One request per event may be in flight; a second caller
//! on the same event fails immediately instead of queueing. The collector
//! is deregistered on every exit path: success, timeout, and queue closure.
//!
//! Collected replies then pass a validation step before the caller sees
//! success: reply kinds must match the request's envelope style, every
//! subscribe argument group must have a matching acknowledgement, and
//! login/JRPC replies must carry the success code.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use vx5_core::{sign, time_util, Credentials, Vx5Error};

use crate::client::{ClientInner, Outbound, WsClient};
use crate::event::Event;
use crate::msg::{
    event_for_args, JrpcReq, MsgKind, Payload, ProcessDetail, SubReq, WsRequest, JRPC_OK,
    OP_LOGIN, OP_SUBSCRIBE, OP_UNSUBSCRIBE,
};

/// Path signed for authentication, fixed by the protocol.
const LOGIN_SIGN_PATH: &str = "/users/self/verify";

/// Removes the collector registration on every exit path.
struct CollectorGuard<'a> {
    inner: &'a ClientInner,
    event: Event,
}

impl Drop for CollectorGuard<'_> {
    fn drop(&mut self) {
        self.inner
            .collectors
            .lock()
            .expect("collector lock poisoned")
            .remove(&self.event);
    }
}

/// Send one request and collect its declared number of replies.
///
/// `req = None` sends the literal `ping` heartbeat, which expects a single
/// `pong`. The returned detail carries the raw replies; validation is the
/// caller's next step.
pub(crate) async fn process(
    inner: &Arc<ClientInner>,
    event: Event,
    req: Option<&dyn WsRequest>,
    timeout: Duration,
) -> Result<ProcessDetail, Vx5Error> {
    if inner.is_stopped() {
        return Err(Vx5Error::Closed("client stopped".into()));
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    {
        let mut collectors = inner.collectors.lock().expect("collector lock poisoned");
        if collectors.contains_key(&event) {
            return Err(Vx5Error::AlreadyInFlight(event.to_string()));
        }
        collectors.insert(event, tx);
    }
    let _guard = CollectorGuard { inner: inner.as_ref(), event };

    let expected = req.map(|r| r.expected_responses()).unwrap_or(1).max(1);
    let text = match req {
        Some(r) => r.to_text(),
        None => "ping".to_string(),
    };

    let mut detail = ProcessDetail {
        endpoint: inner.endpoint.clone(),
        req_info: text.clone(),
        send_time: time_util::now_us(),
        ..Default::default()
    };

    inner
        .outbound_tx
        .send(Outbound::Text(text))
        .map_err(|_| Vx5Error::Closed("outbound queue closed".into()))?;

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => {
                return Err(Vx5Error::Timeout(format!(
                    "{event}: {} of {expected} replies within {timeout:?}",
                    detail.data.len()
                )));
            }
            reply = rx.recv() => match reply {
                Some(msg) => {
                    detail.data.push(msg);
                    if detail.data.len() >= expected {
                        break;
                    }
                }
                None => return Err(Vx5Error::Closed("client stopped".into())),
            }
        }
    }

    detail.recv_time = time_util::now_us();
    debug!("{event} completed in {}us", detail.used_us());
    Ok(detail)
}

/// Validate collected replies against the request that produced them.
fn check_result(
    kind: MsgKind,
    op: &str,
    args: &[HashMap<String, String>],
    detail: &ProcessDetail,
) -> Result<(), Vx5Error> {
    for msg in &detail.data {
        if msg.payload.kind() != Some(kind) {
            return Err(Vx5Error::ResultCheck(format!(
                "reply {:?} does not match request envelope", msg.payload
            )));
        }
    }

    match kind {
        MsgKind::Normal => {
            if op == OP_LOGIN {
                return match detail.data.first().map(|m| &m.payload) {
                    Some(Payload::Err(err)) if err.code == JRPC_OK => Ok(()),
                    Some(Payload::Err(err)) => Err(Vx5Error::ResultCheck(format!(
                        "login rejected: code {} ({})", err.code, err.msg
                    ))),
                    _ => Err(Vx5Error::ResultCheck("no login reply".into())),
                };
            }

            // One matching ack per argument group, matched on channel and
            // the instrument filters echoed back.
            for arg in args {
                let matched = detail.data.iter().any(|msg| match &msg.payload {
                    Payload::Ack(ack) => {
                        ack.event == op
                            && ack.arg.get("channel") == arg.get("channel")
                            && keys_agree(&ack.arg, arg, "instType")
                            && keys_agree(&ack.arg, arg, "instId")
                    }
                    _ => false,
                });
                if !matched {
                    return Err(Vx5Error::ResultCheck(format!(
                        "no {op} acknowledgement for {arg:?}"
                    )));
                }
            }
            Ok(())
        }
        MsgKind::Jrpc => match detail.data.first().map(|m| &m.payload) {
            Some(Payload::Jrpc(rsp)) if rsp.code == JRPC_OK => Ok(()),
            Some(Payload::Jrpc(rsp)) => Err(Vx5Error::ResultCheck(format!(
                "{} rejected: code {} ({})", rsp.op, rsp.code, rsp.msg
            ))),
            _ => Err(Vx5Error::ResultCheck("no reply".into())),
        },
    }
}

/// True when both maps agree on `key` (absent on the request side passes).
fn keys_agree(ack: &HashMap<String, String>, arg: &HashMap<String, String>, key: &str) -> bool {
    match arg.get(key) {
        Some(want) => ack.get(key) == Some(want),
        None => true,
    }
}

impl WsClient {
    /// Heartbeat round trip.
    pub async fn ping(&self, timeout: Duration) -> Result<ProcessDetail, Vx5Error> {
        let detail = process(&self.inner, Event::Ping, None, timeout).await?;
        match detail.data.first().map(|m| &m.payload) {
            Some(Payload::Pong) => Ok(detail),
            other => Err(Vx5Error::ResultCheck(format!("unexpected ping reply {other:?}"))),
        }
    }

    /// Store credentials for [`login`](Self::login).
    pub fn set_credentials(&self, credentials: Credentials) {
        *self.inner.credentials.lock().expect("credential lock poisoned") = Some(credentials);
    }

    /// Authenticate the connection with the stored credentials.
    ///
    /// Signs the current epoch-seconds timestamp over `GET
    /// /users/self/verify` and sends the login envelope; any non-zero reply
    /// code fails the call.
    pub async fn login(&self, timeout: Duration) -> Result<ProcessDetail, Vx5Error> {
        let credentials = self
            .inner
            .credentials
            .lock()
            .expect("credential lock poisoned")
            .clone()
            .ok_or_else(|| Vx5Error::Validation("no credentials configured".into()))?;

        let timestamp = time_util::epoch_secs();
        let message = sign::pre_hash(&timestamp, "GET", LOGIN_SIGN_PATH, "");
        let signature = sign::hmac_sha256_base64(&credentials.secret_key, &message);

        let mut arg = HashMap::new();
        arg.insert("apiKey".to_string(), credentials.api_key.clone());
        arg.insert("passphrase".to_string(), credentials.passphrase.clone());
        arg.insert("timestamp".to_string(), timestamp);
        arg.insert("sign".to_string(), signature);
        let req = SubReq { op: OP_LOGIN.into(), args: vec![arg] };

        let detail = process(&self.inner, Event::Login, Some(&req), timeout).await?;
        check_result(MsgKind::Normal, OP_LOGIN, &req.args, &detail)?;
        info!("login succeeded for apiKey {}", credentials.api_key);
        Ok(detail)
    }

    /// Subscribe to one or more channels sharing an event.
    ///
    /// Every argument group must name a recognizable `channel`, and all
    /// groups must resolve to the same event so their acknowledgements
    /// collect on one waiter. Succeeds only when every group is acked.
    pub async fn subscribe(
        &self,
        args: Vec<HashMap<String, String>>,
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        self.sub_op(OP_SUBSCRIBE, args, timeout).await
    }

    /// Unsubscribe from one or more channels sharing an event.
    ///
    /// Dropping a checksummed depth channel also evicts its stored book.
    pub async fn unsubscribe(
        &self,
        args: Vec<HashMap<String, String>>,
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        let detail = self.sub_op(OP_UNSUBSCRIBE, args.clone(), timeout).await?;
        for arg in &args {
            self.inner.depth.remove(arg);
        }
        Ok(detail)
    }

    async fn sub_op(
        &self,
        op: &str,
        args: Vec<HashMap<String, String>>,
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        if args.is_empty() {
            return Err(Vx5Error::Validation("no subscription arguments".into()));
        }
        let event = event_for_args(&args[0]);
        if event == Event::Unknown {
            return Err(Vx5Error::Validation(format!("unrecognized channel in {:?}", args[0])));
        }
        for arg in &args[1..] {
            if event_for_args(arg) != event {
                return Err(Vx5Error::Validation(format!(
                    "mixed channels in one request: {:?} is not {event}", arg
                )));
            }
        }

        let req = SubReq { op: op.into(), args };
        let detail = process(&self.inner, event, Some(&req), timeout).await?;
        check_result(MsgKind::Normal, op, &req.args, &detail)?;
        Ok(detail)
    }

    /// Send a JRPC trading command and validate its single reply.
    pub async fn jrpc(
        &self,
        event: Event,
        req: JrpcReq,
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        if req.args.is_empty() {
            return Err(Vx5Error::Validation("no command arguments".into()));
        }
        let detail = process(&self.inner, event, Some(&req), timeout).await?;
        check_result(MsgKind::Jrpc, &req.op, &[], &detail)?;
        Ok(detail)
    }
}
