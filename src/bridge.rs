// context-bridge -- connection manager / lifecycle state machine
//
// One async mutex guards the lifecycle state together with the connection
// halves. Every transition happens through `Bridge` methods while that lock
// is held. Dialing runs outside the lock so callers racing a (re)connect get
// `NotConnected` immediately instead of waiting on the handshake.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::compression::CompressionAnnotator;
use crate::config::BridgeConfig;
use crate::context::ContextVector;
use crate::error::{BridgeError, Result};
use crate::protocol::{Envelope, Inbound, OP_CONTEXT_RESPONSE, OP_CONTEXT_SYNC};
use crate::state::BridgeState;
use crate::stats::{BridgeStats, StatsSnapshot};
use crate::translator::{now_secs, ContextTranslator};
use crate::workers;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Read half of one connection, tagged with the generation it belongs to.
pub(crate) struct ReadHalf {
    pub generation: u64,
    pub stream: SplitStream<WsStream>,
    /// Cancelled when this connection is torn down (or the bridge stops).
    pub closed: CancellationToken,
}

/// Everything behind the bridge lock.
struct Link {
    state: BridgeState,
    writer: Option<SplitSink<WsStream, Message>>,
    /// Read half waiting for the reader worker to pick it up.
    pending_reader: Option<ReadHalf>,
    closed: CancellationToken,
    /// Bumped on every successful dial.
    generation: u64,
}

pub struct Bridge {
    pub(crate) config: BridgeConfig,
    url: Url,
    auth_header: HeaderValue,
    translator: ContextTranslator,
    annotator: CompressionAnnotator,
    pub(crate) stats: BridgeStats,
    link: Mutex<Link>,
    /// Consecutive failed reconnect attempts; reset on every successful dial.
    reconnect_streak: AtomicU32,
    pub(crate) shutdown: CancellationToken,
    reader_ready: Notify,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started_at: Instant,
}

impl Bridge {
    /// Validate `config` and build an idle bridge in `Initializing`.
    pub fn new(config: BridgeConfig) -> Result<Arc<Self>> {
        let url = config.validate()?;
        let auth_header = HeaderValue::from_str(&format!("Bearer {}", config.bearer_token))
            .map_err(|_| BridgeError::Config("bearer credential contains invalid header characters".into()))?;

        let translator = ContextTranslator::new(
            config.source_tag.clone(),
            config.preserve_metadata,
            config.strict_mapping,
        );
        let shutdown = CancellationToken::new();

        tracing::info!(
            endpoint = %url,
            compression = config.enable_compression,
            preserve_metadata = config.preserve_metadata,
            strict_mapping = translator.strict_mapping(),
            "bridge: initialised"
        );

        Ok(Arc::new(Self {
            url,
            auth_header,
            translator,
            annotator: CompressionAnnotator::new(),
            stats: BridgeStats::new(),
            link: Mutex::new(Link {
                state: BridgeState::Initializing,
                writer: None,
                pending_reader: None,
                closed: shutdown.child_token(),
                generation: 0,
            }),
            reconnect_streak: AtomicU32::new(0),
            reader_ready: Notify::new(),
            workers: Mutex::new(Vec::new()),
            started_at: Instant::now(),
            shutdown,
            config,
        }))
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Dial the endpoint and start the background workers.
    /// A no-op once `Connected`; a dial failure leaves the bridge in `Error`.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut link = self.link.lock().await;
            match link.state {
                BridgeState::Connected => return Ok(()),
                BridgeState::Stopping | BridgeState::Disconnected => return Err(BridgeError::Stopped),
                BridgeState::Connecting | BridgeState::Reconnecting => {
                    return Err(BridgeError::InvalidState(format!(
                        "start while {} is already in progress",
                        link.state
                    )));
                }
                BridgeState::Initializing | BridgeState::Error => {}
            }
            self.transition(&mut link, BridgeState::Connecting);
        }

        let dialed = self.dial().await;

        {
            let mut link = self.link.lock().await;
            if link.state != BridgeState::Connecting {
                // Stopped while dialing; dropping the socket closes it.
                return Err(BridgeError::Stopped);
            }
            match dialed {
                Ok(ws) => {
                    self.reconnect_streak.store(0, Ordering::SeqCst);
                    self.install(&mut link, ws, false);
                }
                Err(e) => {
                    tracing::error!(error_code = e.code(), "bridge: connect to {} failed: {}", self.url, e);
                    self.transition(&mut link, BridgeState::Error);
                    return Err(e);
                }
            }
        }

        let mut handles = self.workers.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(BridgeError::Stopped);
        }
        if handles.is_empty() {
            handles.push(workers::spawn_reader(self.clone()));
            handles.push(workers::spawn_heartbeat(self.clone()));
            handles.push(workers::spawn_reconnector(self.clone()));
            tracing::info!("bridge: background workers started");
        }
        Ok(())
    }

    /// Stop the bridge: cancel workers, close the connection, and wait for
    /// every worker to exit. Terminal for this instance; idempotent.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut link = self.link.lock().await;
            if link.state == BridgeState::Disconnected {
                return Ok(());
            }
            self.transition(&mut link, BridgeState::Stopping);
            self.shutdown.cancel();
            link.pending_reader = None;
            if let Some(mut writer) = link.writer.take() {
                let closing = async {
                    let _ = writer.send(Message::Close(None)).await;
                    let _ = writer.close().await;
                };
                if tokio::time::timeout(self.config.operation_timeout, closing).await.is_err() {
                    tracing::warn!("bridge: close handshake timed out, dropping connection");
                }
            }
        }

        // Held across the joins so a concurrent `stop` returns only after
        // the workers are gone.
        let mut handles = self.workers.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!("bridge: worker exited abnormally: {}", e);
            }
        }

        let mut link = self.link.lock().await;
        self.transition(&mut link, BridgeState::Disconnected);
        self.stats.record_disconnected();
        self.abandon_pending("bridge stopped");
        tracing::info!("bridge: stopped");
        Ok(())
    }

    // ── Observation ─────────────────────────────────────────────────────

    pub async fn state(&self) -> BridgeState {
        self.link.lock().await.state
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(&self.translator)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Protocol-level probe (WebSocket ping). Fails fast when not connected.
    pub async fn health_check(&self) -> Result<bool> {
        let mut link = self.link.lock().await;
        let state = link.state;
        let generation = link.generation;
        if state != BridgeState::Connected {
            return Err(BridgeError::NotConnected(state));
        }
        let Some(writer) = link.writer.as_mut() else {
            return Err(BridgeError::NotConnected(state));
        };

        let sent = writer.send(Message::Ping(Default::default())).await;
        match sent {
            Ok(()) => Ok(true),
            Err(e) => {
                let reason = format!("health probe failed: {e}");
                self.disconnect_locked(&mut link, generation, &reason);
                Err(BridgeError::Transport(reason))
            }
        }
    }

    // ── Caller-facing sends ─────────────────────────────────────────────

    /// Push a context to the remote platform as a `context_sync` frame.
    pub async fn sync_context(&self, context: &ContextVector) -> Result<()> {
        self.ensure_connected().await?;
        let remote = self.translator.to_remote(context)?;
        let envelope = Envelope::new(OP_CONTEXT_SYNC, now_secs()).with_context(Some(remote));
        self.send_envelope(envelope).await
    }

    /// Send a named operation. `data.operation_id` is generated when absent and
    /// sent in string form when numeric; the id is returned so the caller can
    /// match the `operation_response`.
    pub async fn send_operation(
        &self,
        name: &str,
        mut data: Map<String, Value>,
        context: Option<&ContextVector>,
    ) -> Result<String> {
        self.ensure_connected().await?;
        if name.trim().is_empty() {
            return Err(BridgeError::Validation("operation name is required".into()));
        }
        let operation_id = match data.get("operation_id") {
            None | Some(Value::Null) => Uuid::new_v4().to_string(),
            Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(BridgeError::Validation(format!(
                    "operation_id must be a non-empty string or a number, got {other}"
                )));
            }
        };
        // Responses are matched by string id, so the wire always carries one.
        data.insert("operation_id".into(), Value::String(operation_id.clone()));
        let remote = context.map(|c| self.translator.to_remote(c)).transpose()?;

        let envelope = Envelope::new(name, now_secs())
            .with_data(data)
            .with_context(remote);

        self.stats.track_pending(&operation_id);
        if let Err(e) = self.send_envelope(envelope).await {
            self.stats.forget_pending(&operation_id);
            return Err(e);
        }
        Ok(operation_id)
    }

    async fn ensure_connected(&self) -> Result<()> {
        let state = self.state().await;
        if state == BridgeState::Connected {
            Ok(())
        } else {
            Err(BridgeError::NotConnected(state))
        }
    }

    async fn send_envelope(&self, envelope: Envelope) -> Result<()> {
        let envelope = if self.config.enable_compression {
            self.annotator.annotate(envelope)?
        } else {
            envelope
        };
        self.write_frame(&envelope).await
    }

    // ── Internal primitives (used by workers) ───────────────────────────

    /// Serialize and write one frame under the lock. A write failure tears
    /// the connection down and moves the bridge to `Reconnecting`.
    pub(crate) async fn write_frame(&self, envelope: &Envelope) -> Result<()> {
        let frame = envelope.to_frame()?;

        let mut link = self.link.lock().await;
        let state = link.state;
        let generation = link.generation;
        if state != BridgeState::Connected {
            return Err(BridgeError::NotConnected(state));
        }
        let Some(writer) = link.writer.as_mut() else {
            return Err(BridgeError::NotConnected(state));
        };

        let sent = writer.send(Message::Text(frame.into())).await;
        match sent {
            Ok(()) => {
                self.stats.record_sent(&envelope.operation);
                Ok(())
            }
            Err(e) => {
                let reason = format!("write of '{}' failed: {e}", envelope.operation);
                self.disconnect_locked(&mut link, generation, &reason);
                Err(BridgeError::Transport(reason))
            }
        }
    }

    /// Wait for the read half of the next connection.
    pub(crate) async fn next_read_half(&self) -> ReadHalf {
        loop {
            if let Some(half) = self.link.lock().await.pending_reader.take() {
                return half;
            }
            self.reader_ready.notified().await;
        }
    }

    /// Shared disconnect handling for the reader and heartbeat workers.
    pub(crate) async fn handle_disconnect(&self, generation: u64, reason: &str) {
        let mut link = self.link.lock().await;
        self.disconnect_locked(&mut link, generation, reason);
    }

    fn disconnect_locked(&self, link: &mut Link, generation: u64, reason: &str) {
        if generation != link.generation || link.state != BridgeState::Connected {
            // Stale report, already reconnecting, or shutting down.
            return;
        }
        tracing::warn!("bridge: connection lost ({}), scheduling reconnect", reason);
        link.closed.cancel();
        link.writer = None;
        link.pending_reader = None;
        self.stats.record_disconnected();
        self.abandon_pending("connection lost");
        self.transition(link, BridgeState::Reconnecting);
    }

    /// One reconnector tick. Only acts while `Reconnecting`.
    pub(crate) async fn attempt_reconnect(&self) {
        let attempt = self.reconnect_streak.fetch_add(1, Ordering::SeqCst) + 1;
        let ceiling = self.config.max_reconnect_attempts;

        if attempt > ceiling {
            let mut link = self.link.lock().await;
            if link.state == BridgeState::Reconnecting {
                tracing::error!(
                    "reconnector: giving up after {} attempts, bridge needs a restart",
                    ceiling
                );
                self.transition(&mut link, BridgeState::Error);
            }
            return;
        }

        self.stats.record_reconnect_attempt();
        tracing::info!("reconnector: attempt {}/{} to {}", attempt, ceiling, self.url);
        let dialed = self.dial().await;

        let mut link = self.link.lock().await;
        if link.state != BridgeState::Reconnecting {
            return;
        }
        match dialed {
            Ok(ws) => {
                self.reconnect_streak.store(0, Ordering::SeqCst);
                self.install(&mut link, ws, true);
                tracing::info!("reconnector: reconnected after {} attempt(s)", attempt);
            }
            Err(e) => tracing::warn!(error_code = e.code(), "reconnector: attempt {} failed: {}", attempt, e),
        }
    }

    // ── Inbound ─────────────────────────────────────────────────────────

    /// Parse, unwrap and dispatch one inbound text frame. Protocol errors are
    /// logged and the frame dropped; they never change bridge state.
    pub(crate) async fn handle_frame(&self, text: &str) {
        let envelope = match Envelope::from_frame(text).and_then(|e| self.annotator.unwrap(e)) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error_code = e.code(), "reader: dropping frame: {}", e);
                self.stats.record_dropped();
                return;
            }
        };

        let now = now_secs();
        self.stats.record_received(&envelope.operation, now);

        match Inbound::classify(&envelope) {
            Ok(Inbound::HeartbeatAck) => {
                tracing::debug!("reader: heartbeat acknowledged");
                self.stats.record_heartbeat_ack(now);
            }
            Ok(Inbound::ContextSyncAck) => {
                tracing::debug!("reader: context sync acknowledged");
            }
            Ok(Inbound::ContextRequest { request_id }) => {
                if let Err(e) = self.respond_to_context_request(&request_id).await {
                    tracing::warn!(request_id = %request_id, error_code = e.code(), "reader: context response failed: {}", e);
                }
            }
            Ok(Inbound::OperationResponse { operation_id, success, error }) => {
                let known = self.stats.resolve_pending(&operation_id, success);
                if success {
                    tracing::info!(operation_id = %operation_id, known, "reader: operation succeeded");
                } else {
                    tracing::warn!(
                        operation_id = %operation_id,
                        known,
                        "reader: operation failed: {}",
                        error.as_deref().unwrap_or("no error given")
                    );
                }
            }
            Ok(Inbound::Unknown(op)) => {
                tracing::warn!(operation = %op, "reader: unrecognized operation, dropping");
                self.stats.record_dropped();
            }
            Err(e) => {
                tracing::warn!(operation = %envelope.operation, error_code = e.code(), "reader: dropping frame: {}", e);
                self.stats.record_dropped();
            }
        }
    }

    async fn respond_to_context_request(&self, request_id: &str) -> Result<()> {
        let remote = self.translator.to_remote(&self.current_context())?;
        let mut data = Map::new();
        data.insert("request_id".into(), Value::String(request_id.to_string()));
        let envelope = Envelope::new(OP_CONTEXT_RESPONSE, now_secs())
            .with_data(data)
            .with_context(Some(remote));
        self.send_envelope(envelope).await
    }

    /// Fresh context describing this bridge, sent in answer to `context_request`.
    pub fn current_context(&self) -> ContextVector {
        ContextVector::new(
            self.config.agent_id.clone(),
            OP_CONTEXT_RESPONSE,
            now_secs(),
            self.url.host_str().unwrap_or("unknown"),
            "context_request",
            "websocket",
            1.0,
        )
        .with_meta("bridge_version", env!("CARGO_PKG_VERSION"))
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    /// Responses are only matched on the connection that carried the request.
    fn abandon_pending(&self, reason: &str) {
        let abandoned = self.stats.abandon_pending();
        if abandoned > 0 {
            tracing::warn!(abandoned, "bridge: {}, dropping pending operations", reason);
        }
    }

    fn transition(&self, link: &mut Link, next: BridgeState) {
        if link.state == next {
            return;
        }
        if !link.state.can_transition_to(next) {
            tracing::warn!(from = %link.state, to = %next, "bridge: refusing illegal transition");
            return;
        }
        tracing::info!(from = %link.state, to = %next, "bridge: state transition");
        link.state = next;
    }

    fn install(&self, link: &mut Link, ws: WsStream, reconnect: bool) {
        let (writer, stream) = ws.split();
        link.generation += 1;
        link.closed = self.shutdown.child_token();
        link.writer = Some(writer);
        link.pending_reader = Some(ReadHalf {
            generation: link.generation,
            stream,
            closed: link.closed.clone(),
        });
        self.transition(link, BridgeState::Connected);
        self.stats.record_connected(now_secs(), reconnect);
        self.reader_ready.notify_one();
        tracing::info!(generation = link.generation, "bridge: connected to {}", self.url);
    }

    async fn dial(&self) -> Result<WsStream> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| BridgeError::Connect(format!("bad upgrade request for {}: {e}", self.url)))?;
        request.headers_mut().insert(AUTHORIZATION, self.auth_header.clone());

        let timeout = self.config.operation_timeout;
        let handshake = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request));

        tokio::select! {
            _ = self.shutdown.cancelled() => Err(BridgeError::Stopped),
            res = handshake => match res {
                Ok(Ok((ws, _response))) => Ok(ws),
                Ok(Err(e)) => Err(BridgeError::Connect(format!("{}: {e}", self.url))),
                Err(_) => Err(BridgeError::Connect(format!(
                    "handshake with {} timed out after {}s",
                    self.url,
                    timeout.as_secs_f64()
                ))),
            },
        }
    }
}
