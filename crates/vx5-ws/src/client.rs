//! Connection lifecycle and message routing.
//!
//! [`WsClient`] owns the socket and every internal queue. Once running,
//! three long-lived tasks cooperate:
//!
//! - the **read loop** turns inbound frames into classified [`Msg`]s and
//!   routes them to the collector waiting on that event, or to a
//!   lazily-spawned per-event push-consumer task;
//! - the **write loop** drains the outbound queue to the socket;
//! - the **heartbeat loop** pings on a fixed interval and shuts the client
//!   down when a ping fails.
//!
//! The state machine is Disconnected → Connecting → Running → Stopped and
//! Stopped is terminal: a stopped client cannot be restarted, create a new
//! instance instead. `stop` is idempotent and safe from any failure path;
//! it closes all queues, which unblocks every pending caller with a closed
//! error, and tears down all push consumers.

use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use ahash::AHashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{Bytes, Message as WsFrame};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use vx5_core::{Credentials, Vx5Error};

use crate::depth::DepthManager;
use crate::event::Event;
use crate::msg::{DepthMsg, ErrMsg, Msg, Payload, PushMsg};
use crate::parse;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Hook over every raw inbound frame, before classification.
pub type RawHook = Arc<dyn Fn(&Msg) -> anyhow::Result<()> + Send + Sync>;
/// Hook over every generic channel push.
pub type PushHook = Arc<dyn Fn(u64, &PushMsg) -> anyhow::Result<()> + Send + Sync>;
/// Hook over every depth push that passed checksum management.
pub type DepthHook = Arc<dyn Fn(u64, &DepthMsg) -> anyhow::Result<()> + Send + Sync>;
/// Hook over every error payload.
pub type ErrHook = Arc<dyn Fn(u64, &ErrMsg) -> anyhow::Result<()> + Send + Sync>;

/// Outbound queue entries. Pongs bypass request serialization.
pub(crate) enum Outbound {
    Text(String),
    Pong(Bytes),
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    Disconnected = 0,
    Connecting = 1,
    Running = 2,
    Stopped = 3,
}

impl From<u8> for ClientState {
    fn from(v: u8) -> Self {
        match v {
            1 => ClientState::Connecting,
            2 => ClientState::Running,
            3 => ClientState::Stopped,
            _ => ClientState::Disconnected,
        }
    }
}

#[derive(Default)]
pub(crate) struct Hooks {
    pub raw: StdMutex<Option<RawHook>>,
    pub push: StdMutex<Option<PushHook>>,
    pub depth: StdMutex<Option<DepthHook>>,
    pub error: StdMutex<Option<ErrHook>>,
}

/// Shared client state, reachable from every task.
pub(crate) struct ClientInner {
    pub endpoint: String,
    pub state: AtomicU8,
    pub outbound_tx: mpsc::UnboundedSender<Outbound>,
    outbound_rx: StdMutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    shutdown_tx: watch::Sender<bool>,
    /// One-shot response collectors, one pending request per event.
    pub collectors: StdMutex<AHashMap<Event, mpsc::UnboundedSender<Msg>>>,
    /// Push-consumer queues, created on first observation of an event.
    consumers: StdMutex<AHashMap<Event, mpsc::UnboundedSender<Msg>>>,
    pub depth: DepthManager,
    pub hooks: Hooks,
    pub credentials: StdMutex<Option<Credentials>>,
    auto_depth: AtomicBool,
}

/// Streaming protocol client.
pub struct WsClient {
    pub(crate) inner: Arc<ClientInner>,
    dial_timeout: Duration,
    ping_interval: Duration,
}

impl WsClient {
    /// Create a client for the given endpoint. No I/O happens until
    /// [`start`](Self::start).
    pub fn new(endpoint: impl Into<String>) -> Result<Self, Vx5Error> {
        let endpoint = endpoint.into();
        let parsed = url::Url::parse(&endpoint)
            .map_err(|e| Vx5Error::Validation(format!("invalid endpoint {endpoint:?}: {e}")))?;
        match parsed.scheme() {
            "ws" | "wss" => {}
            scheme => {
                return Err(Vx5Error::Validation(format!(
                    "endpoint scheme must be ws or wss, got {scheme:?}"
                )));
            }
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(ClientInner {
                endpoint,
                state: AtomicU8::new(ClientState::Disconnected as u8),
                outbound_tx,
                outbound_rx: StdMutex::new(Some(outbound_rx)),
                shutdown_tx,
                collectors: StdMutex::new(AHashMap::new()),
                consumers: StdMutex::new(AHashMap::new()),
                depth: DepthManager::new(),
                hooks: Hooks::default(),
                credentials: StdMutex::new(None),
                auto_depth: AtomicBool::new(true),
            }),
            dial_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(10),
        })
    }

    /// Override the dial timeout (default 5 s).
    pub fn set_dial_timeout(&mut self, timeout: Duration) {
        self.dial_timeout = timeout;
    }

    /// Override the heartbeat interval (default 10 s).
    pub fn set_ping_interval(&mut self, interval: Duration) {
        self.ping_interval = interval;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.inner.state.load(Ordering::SeqCst).into()
    }

    /// Connect and spawn the read, write, and heartbeat loops.
    ///
    /// Idempotent while running; fails with a closed error once stopped.
    /// A dial that does not complete within the dial timeout reverts the
    /// state to Disconnected.
    pub async fn start(&self) -> Result<(), Vx5Error> {
        match self.inner.state.compare_exchange(
            ClientState::Disconnected as u8,
            ClientState::Connecting as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(s) if s == ClientState::Running as u8 || s == ClientState::Connecting as u8 => {
                info!("client already started");
                return Ok(());
            }
            Err(_) => {
                return Err(Vx5Error::Closed(
                    "client stopped; create a new instance".into(),
                ));
            }
        }

        info!("connecting to {}", self.inner.endpoint);
        let dial = tokio_tungstenite::connect_async(self.inner.endpoint.as_str());
        let stream = match tokio::time::timeout(self.dial_timeout, dial).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                self.inner.state.store(ClientState::Disconnected as u8, Ordering::SeqCst);
                return Err(Vx5Error::Connection(format!("dial error: {e}")));
            }
            Err(_) => {
                self.inner.state.store(ClientState::Disconnected as u8, Ordering::SeqCst);
                return Err(Vx5Error::Timeout(format!(
                    "dial timed out after {:?}",
                    self.dial_timeout
                )));
            }
        };

        let (ws_write, ws_read) = stream.split();
        let outbound_rx = self
            .inner
            .outbound_rx
            .lock()
            .expect("outbound lock poisoned")
            .take()
            .ok_or_else(|| Vx5Error::Closed("outbound queue already consumed".into()))?;

        self.inner.state.store(ClientState::Running as u8, Ordering::SeqCst);

        tokio::spawn(read_loop(self.inner.clone(), ws_read, self.inner.shutdown_tx.subscribe()));
        tokio::spawn(write_loop(
            self.inner.clone(),
            ws_write,
            outbound_rx,
            self.inner.shutdown_tx.subscribe(),
        ));
        tokio::spawn(heartbeat_loop(
            self.inner.clone(),
            self.ping_interval,
            self.inner.shutdown_tx.subscribe(),
        ));

        info!("client started: {}", self.inner.endpoint);
        Ok(())
    }

    /// Shut the client down: close the socket and every internal queue,
    /// cancel all pending requests, and tear down all push consumers.
    ///
    /// Effective exactly once; later calls are no-ops. Safe to call from
    /// any internal failure path or external caller.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Install the hook called with every raw inbound frame.
    pub fn set_raw_hook(&self, hook: impl Fn(&Msg) -> anyhow::Result<()> + Send + Sync + 'static) {
        *self.inner.hooks.raw.lock().expect("hook lock poisoned") = Some(Arc::new(hook));
    }

    /// Install the hook called with every generic channel push.
    pub fn set_push_hook(
        &self,
        hook: impl Fn(u64, &PushMsg) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        *self.inner.hooks.push.lock().expect("hook lock poisoned") = Some(Arc::new(hook));
    }

    /// Install the hook called with every verified depth push.
    pub fn set_depth_hook(
        &self,
        hook: impl Fn(u64, &DepthMsg) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        *self.inner.hooks.depth.lock().expect("hook lock poisoned") = Some(Arc::new(hook));
    }

    /// Install the hook called with every error payload.
    pub fn set_error_hook(
        &self,
        hook: impl Fn(u64, &ErrMsg) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        *self.inner.hooks.error.lock().expect("hook lock poisoned") = Some(Arc::new(hook));
    }

    /// Toggle automatic depth management (merge + checksum verification).
    ///
    /// Rejected while any checksummed book is live, because flipping the
    /// mode mid-subscription would orphan the stored baselines.
    pub fn set_auto_depth(&self, enabled: bool) -> Result<(), Vx5Error> {
        if !self.inner.depth.is_empty() {
            return Err(Vx5Error::Validation(
                "depth subscriptions are active; unsubscribe first".into(),
            ));
        }
        self.inner.auto_depth.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    /// Current merged snapshot for a depth subscription argument.
    pub fn depth_snapshot(
        &self,
        arg: &std::collections::HashMap<String, String>,
    ) -> Option<crate::msg::DepthSnapshot> {
        self.inner.depth.snapshot(arg)
    }
}

impl ClientInner {
    pub(crate) fn stop(&self) {
        let prev = self.state.swap(ClientState::Stopped as u8, Ordering::SeqCst);
        if prev == ClientState::Stopped as u8 {
            return;
        }

        let _ = self.shutdown_tx.send(true);
        // Dropping the senders closes every blocked receiver with an error.
        self.collectors.lock().expect("collector lock poisoned").clear();
        self.consumers.lock().expect("consumer lock poisoned").clear();
        // If the write loop never took the queue, close it here so pending
        // sends fail fast.
        self.outbound_rx.lock().expect("outbound lock poisoned").take();
        self.depth.clear();
        info!("client stopped: {}", self.endpoint);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.state.load(Ordering::SeqCst) == ClientState::Stopped as u8
    }

    /// Classify one inbound frame and route it.
    ///
    /// Runs on the read loop; also the injection point for tests.
    pub(crate) fn handle_frame(self: &Arc<Self>, raw: &str) {
        // The raw hook sees every frame, recognized or not.
        if let Some(hook) = self.hooks.raw.lock().expect("hook lock poisoned").clone() {
            let msg = Msg::new(Payload::Raw(raw.to_string()));
            if let Err(e) = hook(&msg) {
                warn!("raw message hook failed: {e}");
            }
        }

        let (event, payload) = match parse::classify(raw) {
            Ok(classified) => classified,
            Err(e) => {
                warn!("dropping frame: {e}");
                return;
            }
        };

        if let Payload::Err(err) = &payload {
            let ts = vx5_core::time_util::now_us();
            if let Some(hook) = self.hooks.error.lock().expect("hook lock poisoned").clone() {
                if let Err(e) = hook(ts, err) {
                    warn!("error hook failed: {e}");
                }
            }
        }

        self.route(event, Msg::new(payload));
    }

    /// Deliver a classified message to its collector or push consumer.
    fn route(self: &Arc<Self>, event: Event, msg: Msg) {
        // A waiting collector takes priority: these are replies to an
        // in-flight request.
        let collector = {
            let collectors = self.collectors.lock().expect("collector lock poisoned");
            collectors.get(&event).cloned()
        };
        if let Some(tx) = collector {
            if tx.send(msg).is_err() {
                // Receiver already gone (timed-out caller).
                self.collectors.lock().expect("collector lock poisoned").remove(&event);
            }
            return;
        }

        // Only unsolicited push classes get a consumer task.
        if event != Event::BookedData && event != Event::DepthData {
            debug!("no waiter for {event}, dropping message");
            return;
        }

        let tx = {
            let mut consumers = self.consumers.lock().expect("consumer lock poisoned");
            match consumers.entry(event) {
                Entry::Occupied(e) => e.get().clone(),
                Entry::Vacant(e) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    e.insert(tx.clone());
                    tokio::spawn(consume_push(self.clone(), event, rx));
                    debug!("spawned push consumer for {event}");
                    tx
                }
            }
        };
        let _ = tx.send(msg);
    }

    fn auto_depth(&self) -> bool {
        self.auto_depth.load(Ordering::SeqCst)
    }
}

/// Per-event push-consumer loop. Exits when the queue closes on shutdown.
async fn consume_push(inner: Arc<ClientInner>, event: Event, mut rx: mpsc::UnboundedReceiver<Msg>) {
    while let Some(msg) = rx.recv().await {
        match &msg.payload {
            Payload::Push(push) => {
                if let Some(hook) = inner.hooks.push.lock().expect("hook lock poisoned").clone() {
                    if let Err(e) = hook(msg.timestamp, push) {
                        warn!("push hook failed: {e}");
                    }
                }
            }
            Payload::Depth(depth) => {
                if inner.auto_depth() {
                    if let Err(e) = inner.depth.apply(depth) {
                        error!("depth sync failed: {e}");
                        continue;
                    }
                }
                if let Some(hook) = inner.hooks.depth.lock().expect("hook lock poisoned").clone() {
                    if let Err(e) = hook(msg.timestamp, depth) {
                        warn!("depth hook failed: {e}");
                    }
                }
            }
            other => debug!("push consumer for {event} ignoring {other:?}"),
        }
    }
    debug!("push consumer for {event} drained");
}

/// Read loop: inbound frames → classifier → router.
async fn read_loop(
    inner: Arc<ClientInner>,
    mut ws_read: SplitStream<WsStream>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            frame = ws_read.next() => match frame {
                Some(Ok(WsFrame::Text(text))) => inner.handle_frame(&text),
                Some(Ok(WsFrame::Binary(data))) => match parse::inflate(&data) {
                    Ok(text) => inner.handle_frame(&text),
                    Err(e) => warn!("dropping binary frame: {e}"),
                },
                Some(Ok(WsFrame::Ping(data))) => {
                    let _ = inner.outbound_tx.send(Outbound::Pong(data));
                }
                Some(Ok(WsFrame::Close(_))) => {
                    warn!("server closed the connection");
                    break;
                }
                Some(Err(e)) => {
                    if !inner.is_stopped() {
                        error!("read error: {e}");
                    }
                    break;
                }
                None => {
                    warn!("stream ended");
                    break;
                }
                _ => {}
            }
        }
    }
    // The read loop is load-bearing: its exit tears the client down.
    inner.stop();
}

/// Write loop: outbound queue → socket.
async fn write_loop(
    inner: Arc<ClientInner>,
    mut ws_write: SplitSink<WsStream, WsFrame>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                let _ = ws_write.close().await;
                break;
            }
            req = outbound_rx.recv() => match req {
                Some(Outbound::Text(text)) => {
                    debug!("sending request: {text}");
                    if let Err(e) = ws_write.send(WsFrame::Text(text.into())).await {
                        error!("write error: {e}");
                        break;
                    }
                }
                Some(Outbound::Pong(data)) => {
                    if ws_write.send(WsFrame::Pong(data)).await.is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
    }
    inner.stop();
}

/// Heartbeat loop: ping on a fixed interval; a failed ping stops the client.
async fn heartbeat_loop(
    inner: Arc<ClientInner>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick is immediate
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => return,
            _ = ticker.tick() => {
                if let Err(e) =
                    crate::ops::process(&inner, Event::Ping, None, Duration::from_millis(1000)).await
                {
                    error!("heartbeat failed: {e}");
                    inner.stop();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn new_rejects_bad_endpoints() {
        assert!(WsClient::new("").is_err());
        assert!(WsClient::new("https://example.invalid/ws").is_err());
        assert!(WsClient::new("wss://example.invalid/ws").is_ok());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_terminal() {
        let client = WsClient::new("wss://example.invalid/ws").unwrap();
        assert_eq!(client.state(), ClientState::Disconnected);

        client.stop();
        assert_eq!(client.state(), ClientState::Stopped);
        client.stop();
        assert_eq!(client.state(), ClientState::Stopped);

        // Terminal: a stopped client will not start again.
        let err = client.start().await.unwrap_err();
        assert!(matches!(err, Vx5Error::Closed(_)));
    }

    #[tokio::test]
    async fn push_frames_reach_the_push_hook() {
        let client = WsClient::new("wss://example.invalid/ws").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.set_push_hook(move |_ts, push| {
            tx.send(push.arg["channel"].clone()).unwrap();
            Ok(())
        });

        client
            .inner
            .handle_frame(r#"{"arg":{"channel":"tickers","instId":"BTC-USDT"},"data":[{"last":"1"}]}"#);

        let channel = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("push hook not called")
            .unwrap();
        assert_eq!(channel, "tickers");
    }

    #[tokio::test]
    async fn depth_frames_are_merged_before_the_hook() {
        let client = WsClient::new("wss://example.invalid/ws").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.set_depth_hook(move |_ts, depth| {
            tx.send(depth.action.clone()).unwrap();
            Ok(())
        });

        client.inner.handle_frame(
            r#"{"arg":{"channel":"books","instId":"BTC-USDT"},"action":"snapshot",
                "data":[{"asks":[["101","2"]],"bids":[["100","1"]],"ts":"1","checksum":-538653813}]}"#,
        );

        let action = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("depth hook not called")
            .unwrap();
        assert_eq!(action, "snapshot");

        let mut arg = HashMap::new();
        arg.insert("channel".to_string(), "books".to_string());
        arg.insert("instId".to_string(), "BTC-USDT".to_string());
        assert_eq!(client.depth_snapshot(&arg).unwrap().checksum, -538653813);
    }

    #[tokio::test]
    async fn desynced_depth_frame_is_not_forwarded() {
        let client = WsClient::new("wss://example.invalid/ws").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        client.set_depth_hook(move |_ts, depth| {
            tx.send(depth.action.clone()).unwrap();
            Ok(())
        });

        // Bad self-checksum: rejected, hook never runs.
        client.inner.handle_frame(
            r#"{"arg":{"channel":"books","instId":"BTC-USDT"},"action":"snapshot",
                "data":[{"asks":[["101","2"]],"bids":[["100","1"]],"ts":"1","checksum":7}]}"#,
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn error_frames_reach_the_error_hook() {
        let client = WsClient::new("wss://example.invalid/ws").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.set_error_hook(move |_ts, err| {
            tx.send(err.code.clone()).unwrap();
            Ok(())
        });

        client.inner.handle_frame(r#"{"event":"error","code":"60012","msg":"Illegal request."}"#);
        assert_eq!(rx.recv().await.unwrap(), "60012");
    }

    #[tokio::test]
    async fn raw_hook_sees_unrecognized_frames() {
        let client = WsClient::new("wss://example.invalid/ws").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.set_raw_hook(move |msg| {
            if let Payload::Raw(text) = &msg.payload {
                tx.send(text.clone()).unwrap();
            }
            Ok(())
        });

        client.inner.handle_frame(r#"{"totally":"unknown"}"#);
        assert_eq!(rx.recv().await.unwrap(), r#"{"totally":"unknown"}"#);
    }

    #[tokio::test]
    async fn auto_depth_toggle_rejected_while_books_live() {
        let client = WsClient::new("wss://example.invalid/ws").unwrap();
        client.set_auto_depth(false).unwrap();
        client.set_auto_depth(true).unwrap();

        client.inner.handle_frame(
            r#"{"arg":{"channel":"books","instId":"BTC-USDT"},"action":"snapshot",
                "data":[{"asks":[["101","2"]],"bids":[["100","1"]],"ts":"1","checksum":-538653813}]}"#,
        );
        // Wait for the consumer task to apply the snapshot.
        let mut arg = HashMap::new();
        arg.insert("channel".to_string(), "books".to_string());
        arg.insert("instId".to_string(), "BTC-USDT".to_string());
        for _ in 0..50 {
            if client.depth_snapshot(&arg).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(client.set_auto_depth(false).is_err());
    }
}
