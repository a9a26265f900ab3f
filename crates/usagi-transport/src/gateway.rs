//! The persistent WebSocket connection to the mirai-api-http gateway.
//!
//! One [`Gateway`] owns one logical connection. A single read loop classifies
//! every inbound frame: frames echoing a pending `syncId` resolve the
//! caller's correlation slot, everything else is handed to the [`EventSink`]
//! (the dispatcher). Writes are funneled through one mpsc channel so frames
//! are never interleaved mid-write.
//!
//! Connection states run `Disconnected → Connecting → Connected` and back on
//! error, with exponential-backoff reconnection. On disconnect, pending
//! correlation slots are failed fast with `NotConnected` rather than left to
//! idle out (see `CorrelationTable::fail_all`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

use usagi_core::{ApiError, ApiResult, TransportError, TransportResult};

use crate::correlation::CorrelationTable;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Sync id the gateway uses for unsolicited pushes.
const PUSH_SYNC_ID: i64 = -1;

/// Consumer of unsolicited push frames.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Called with the `data` payload of each push frame, in arrival order.
    async fn on_event(&self, payload: Value);

    /// Called whenever the connection is lost (before any reconnect).
    async fn on_disconnect(&self) {}
}

/// Reconnection policy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for the backoff delay.
    pub max_delay: Duration,
    /// Backoff multiplier applied after each failed attempt.
    pub multiplier: f64,
    /// Give up after this many consecutive failures; `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_retries: None,
        }
    }
}

/// Gateway connection configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base WebSocket URL, e.g. `ws://127.0.0.1:8080`.
    pub url: String,
    /// mirai-api-http verify key.
    pub verify_key: String,
    /// Bot account the session binds to.
    pub account: i64,
    /// Whether to reconnect automatically after a drop.
    pub auto_reconnect: bool,
    /// Backoff policy for reconnection.
    pub reconnect: ReconnectConfig,
    /// Deadline for correlated command replies.
    pub api_timeout: Duration,
}

impl GatewayConfig {
    /// The full endpoint including the session handshake query.
    fn endpoint(&self) -> String {
        format!(
            "{}/all?verifyKey={}&qq={}",
            self.url.trim_end_matches('/'),
            self.verify_key,
            self.account
        )
    }
}

/// Handle to the persistent gateway connection.
///
/// Cheap to clone; all clones share the writer channel, the correlation
/// table, and the session key.
#[derive(Clone)]
pub struct Gateway {
    outbound: mpsc::Sender<Vec<u8>>,
    correlations: Arc<CorrelationTable>,
    session: Arc<RwLock<String>>,
    shutdown: Arc<watch::Sender<bool>>,
    api_timeout: Duration,
}

impl Gateway {
    /// Connects, performs the session handshake, and spawns the read loop.
    pub async fn connect(config: GatewayConfig, sink: Arc<dyn EventSink>) -> TransportResult<Self> {
        let endpoint = config.endpoint();
        info!(url = %config.url, account = config.account, "connecting to gateway");

        let (ws_tx, ws_rx, session_key) = establish(&endpoint).await?;
        info!(session = %session_key, "gateway session established");

        let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let correlations = Arc::new(CorrelationTable::new());
        let session = Arc::new(RwLock::new(session_key));

        tokio::spawn(run_loop(
            ws_tx,
            ws_rx,
            outbound_rx,
            shutdown_rx,
            Arc::clone(&correlations),
            Arc::clone(&session),
            sink,
            config.clone(),
            endpoint,
        ));

        Ok(Self {
            outbound: outbound_tx,
            correlations,
            session,
            shutdown: Arc::new(shutdown_tx),
            api_timeout: config.api_timeout,
        })
    }

    /// The correlation table backing this connection.
    pub fn correlations(&self) -> &Arc<CorrelationTable> {
        &self.correlations
    }

    /// The current session key.
    pub fn session_key(&self) -> String {
        self.session.read().clone()
    }

    /// Enqueues one frame for transmission.
    ///
    /// Frames are written strictly in submission order.
    pub async fn send(&self, frame: &Value) -> ApiResult<()> {
        let bytes = serde_json::to_vec(frame)?;
        self.outbound
            .send(bytes)
            .await
            .map_err(|_| ApiError::NotConnected)
    }

    /// Issues a fresh correlation id, sends the frame built with it, and
    /// awaits the matching reply.
    ///
    /// This is the primary suspension point for outbound command callers.
    pub async fn send_and_await<F>(&self, build_frame: F) -> ApiResult<Value>
    where
        F: FnOnce(i64) -> ApiResult<Value>,
    {
        let id = self.correlations.next_id();
        // Subscribe before sending so a fast reply is never missed.
        let rx = self.correlations.subscribe(id);

        let frame = match build_frame(id) {
            Ok(frame) => frame,
            Err(e) => {
                self.correlations.forget(id);
                return Err(e);
            }
        };

        debug!(sync_id = id, command = %frame["command"], "sending gateway command");
        if let Err(e) = self.send(&frame).await {
            self.correlations.forget(id);
            return Err(e);
        }

        self.correlations.await_reply(id, rx, self.api_timeout).await
    }

    /// Signals the read loop to close the connection and stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Connects and waits for the session frame the gateway sends first.
async fn establish(endpoint: &str) -> TransportResult<(WsSink, WsSource, String)> {
    let (stream, _response) =
        connect_async(endpoint)
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                url: endpoint.to_string(),
                reason: e.to_string(),
            })?;
    let (ws_tx, mut ws_rx) = stream.split();

    // The first text frame carries { "data": { "code": 0, "session": ... } }.
    let handshake = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(message) = ws_rx.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(text.to_string()),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
        None
    })
    .await
    .map_err(|_| TransportError::Handshake("no session frame within 10s".to_string()))?
    .ok_or_else(|| TransportError::Handshake("connection closed during handshake".to_string()))?;

    let frame: Value = serde_json::from_str(&handshake)
        .map_err(|e| TransportError::Handshake(format!("malformed session frame: {e}")))?;
    let data = &frame["data"];
    if let Some(code) = data["code"].as_i64()
        && code != 0
    {
        return Err(TransportError::Handshake(format!(
            "gateway refused session: code {code}, {}",
            data["msg"].as_str().unwrap_or("no message")
        )));
    }
    let session = data["session"]
        .as_str()
        .ok_or_else(|| TransportError::Handshake("session frame missing key".to_string()))?
        .to_string();

    Ok((ws_tx, ws_rx, session))
}

/// Extracts the sync id from an inbound frame, if it carries one.
///
/// The gateway writes it as a string; numbers are accepted for leniency.
fn frame_sync_id(frame: &Value) -> Option<i64> {
    match frame.get("syncId") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// Classifies one inbound frame: reply or push.
async fn route_frame(frame: Value, correlations: &CorrelationTable, sink: &Arc<dyn EventSink>) {
    match frame_sync_id(&frame) {
        Some(id) if id != PUSH_SYNC_ID => {
            // A reply; route the payload to its waiter. Unknown ids are
            // discarded inside fulfil with a warning.
            let payload = frame.get("data").cloned().unwrap_or(frame);
            correlations.fulfil(id, payload);
        }
        _ => {
            let payload = frame.get("data").cloned().unwrap_or(frame);
            sink.on_event(payload).await;
        }
    }
}

/// The connection loop: single reader, single writer, reconnect on failure.
#[allow(clippy::too_many_arguments)]
async fn run_loop(
    ws_tx: WsSink,
    ws_rx: WsSource,
    mut outbound_rx: mpsc::Receiver<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
    correlations: Arc<CorrelationTable>,
    session: Arc<RwLock<String>>,
    sink: Arc<dyn EventSink>,
    config: GatewayConfig,
    endpoint: String,
) {
    let mut current_tx = ws_tx;
    let mut current_rx = ws_rx;
    let mut retry_count = 0u32;
    let mut current_delay = config.reconnect.initial_delay;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("gateway shutting down");
                    let _ = current_tx.close().await;
                    correlations.fail_all();
                    sink.on_disconnect().await;
                    break;
                }
            }

            Some(bytes) = outbound_rx.recv() => {
                let text = String::from_utf8_lossy(&bytes).to_string();
                if let Err(e) = current_tx.send(Message::Text(text.into())).await {
                    warn!(error = %e, "failed to write frame");
                }
            }

            inbound = current_rx.next() => {
                let lost = match inbound {
                    Some(Ok(Message::Text(text))) => {
                        trace!(len = text.len(), "inbound frame");
                        match serde_json::from_str::<Value>(&text) {
                            Ok(frame) => route_frame(frame, &correlations, &sink).await,
                            Err(e) => warn!(error = %e, "malformed inbound frame"),
                        }
                        retry_count = 0;
                        current_delay = config.reconnect.initial_delay;
                        false
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = current_tx.send(Message::Pong(data)).await;
                        false
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Binary(_)))
                        | Some(Ok(Message::Frame(_))) => false,
                    Some(Ok(Message::Close(_))) => {
                        info!("gateway closed the connection");
                        true
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "gateway read error");
                        true
                    }
                    None => {
                        info!("gateway stream ended");
                        true
                    }
                };

                if lost {
                    // Fail-fast policy: pending waiters learn immediately
                    // instead of idling out their own deadlines.
                    correlations.fail_all();
                    sink.on_disconnect().await;

                    if !config.auto_reconnect {
                        break;
                    }
                    match reconnect(
                        &endpoint,
                        &config.reconnect,
                        &mut retry_count,
                        &mut current_delay,
                    )
                    .await
                    {
                        Some((new_tx, new_rx, new_session)) => {
                            *session.write() = new_session;
                            current_tx = new_tx;
                            current_rx = new_rx;
                        }
                        None => break,
                    }
                }
            }
        }
    }
}

/// Retries the connection with exponential backoff until it succeeds or the
/// retry budget is exhausted.
async fn reconnect(
    endpoint: &str,
    policy: &ReconnectConfig,
    retry_count: &mut u32,
    current_delay: &mut Duration,
) -> Option<(WsSink, WsSource, String)> {
    loop {
        if let Some(max) = policy.max_retries
            && *retry_count >= max
        {
            error!("max reconnect retries reached, giving up");
            return None;
        }

        warn!(delay = ?current_delay, attempt = *retry_count + 1, "reconnecting");
        tokio::time::sleep(*current_delay).await;

        match establish(endpoint).await {
            Ok(connection) => {
                info!("reconnected to gateway");
                *retry_count = 0;
                *current_delay = policy.initial_delay;
                return Some(connection);
            }
            Err(e) => {
                warn!(error = %e, "reconnect attempt failed");
                *retry_count += 1;
                *current_delay = std::cmp::min(
                    Duration::from_secs_f64(current_delay.as_secs_f64() * policy.multiplier),
                    policy.max_delay,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::Mutex;

    struct RecordingSink {
        events: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn on_event(&self, payload: Value) {
            self.events.lock().await.push(payload);
        }
    }

    fn sink() -> Arc<RecordingSink> {
        Arc::new(RecordingSink {
            events: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn sync_id_parses_both_encodings() {
        assert_eq!(frame_sync_id(&json!({ "syncId": "12" })), Some(12));
        assert_eq!(frame_sync_id(&json!({ "syncId": 12 })), Some(12));
        assert_eq!(frame_sync_id(&json!({ "syncId": "-1" })), Some(-1));
        assert_eq!(frame_sync_id(&json!({ "noSyncId": 0 })), None);
    }

    #[tokio::test]
    async fn reply_frames_resolve_pending_slots() {
        let correlations = CorrelationTable::new();
        let recording = sink();
        let as_sink: Arc<dyn EventSink> = recording.clone();

        let id = correlations.next_id();
        let rx = correlations.subscribe(id);

        let frame = json!({ "syncId": id.to_string(), "data": { "code": 0, "messageId": 5 } });
        route_frame(frame, &correlations, &as_sink).await;

        let reply = correlations
            .await_reply(id, rx, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply["messageId"], 5);
        assert!(recording.events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn push_frames_go_to_the_sink() {
        let correlations = CorrelationTable::new();
        let recording = sink();
        let as_sink: Arc<dyn EventSink> = recording.clone();

        let frame = json!({ "syncId": "-1", "data": { "type": "GroupMessage" } });
        route_frame(frame, &correlations, &as_sink).await;

        let events = recording.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "GroupMessage");
    }

    #[tokio::test]
    async fn unknown_reply_is_discarded_not_dispatched() {
        let correlations = CorrelationTable::new();
        let recording = sink();
        let as_sink: Arc<dyn EventSink> = recording.clone();

        let frame = json!({ "syncId": "999", "data": { "code": 0 } });
        route_frame(frame, &correlations, &as_sink).await;

        assert!(recording.events.lock().await.is_empty());
        assert_eq!(correlations.pending_count(), 0);
    }
}
