// context-bridge -- background workers
//
// Three long-running tasks spawned by `Bridge::start`:
// - reader: receives frames and dispatches them
// - heartbeat: probes the live connection on a fixed interval
// - reconnector: re-dials while the bridge is `Reconnecting`
//
// All of them exit when the bridge's shutdown token is cancelled.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;

use crate::bridge::{Bridge, ReadHalf};
use crate::error::BridgeError;
use crate::protocol::{Envelope, OP_HEARTBEAT};
use crate::state::BridgeState;
use crate::translator::now_secs;

/// Pause between losing one connection and waiting for the next.
const READ_BACKOFF: Duration = Duration::from_secs(1);

// ── Reader ──────────────────────────────────────────────────────────────────

pub fn spawn_reader(bridge: Arc<Bridge>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!("reader: started");
        loop {
            let half = tokio::select! {
                _ = bridge.shutdown.cancelled() => break,
                half = bridge.next_read_half() => half,
            };

            read_connection(&bridge, half).await;

            tokio::select! {
                _ = bridge.shutdown.cancelled() => break,
                _ = tokio::time::sleep(READ_BACKOFF) => {}
            }
        }
        tracing::debug!("reader: exited");
    })
}

/// Drain one connection until it fails or is torn down.
async fn read_connection(bridge: &Bridge, half: ReadHalf) {
    let ReadHalf { generation, mut stream, closed } = half;

    loop {
        tokio::select! {
            _ = closed.cancelled() => return,
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => bridge.handle_frame(text.as_str()).await,
                Some(Ok(Message::Binary(bytes))) => {
                    tracing::warn!(len = bytes.len(), "reader: dropping binary frame");
                    bridge.stats.record_dropped();
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("peer closed: {} {}", u16::from(f.code), f.reason.as_str()))
                        .unwrap_or_else(|| "peer closed".to_string());
                    bridge.handle_disconnect(generation, &reason).await;
                    return;
                }
                // Ping/Pong are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    bridge.handle_disconnect(generation, &format!("read failed: {e}")).await;
                    return;
                }
                None => {
                    bridge.handle_disconnect(generation, "stream ended").await;
                    return;
                }
            },
        }
    }
}

// ── Heartbeat ───────────────────────────────────────────────────────────────

pub fn spawn_heartbeat(bridge: Arc<Bridge>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = bridge.config.heartbeat_interval;
        tracing::debug!("heartbeat: started (interval={}s)", period.as_secs_f64());

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; the first probe goes out one period in.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = bridge.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if bridge.state().await != BridgeState::Connected {
                continue;
            }

            let mut data = Map::new();
            data.insert("agent_id".into(), Value::String(bridge.config.agent_id.clone()));
            let probe = Envelope::new(OP_HEARTBEAT, now_secs()).with_data(data);

            // write_frame hands failures to the shared disconnect handling.
            match bridge.write_frame(&probe).await {
                Ok(()) => bridge.stats.record_heartbeat(),
                Err(BridgeError::NotConnected(_)) => {}
                Err(e) => tracing::warn!(error_code = e.code(), "heartbeat: probe failed: {}", e),
            }
        }
        tracing::debug!("heartbeat: exited");
    })
}

// ── Reconnector ─────────────────────────────────────────────────────────────

pub fn spawn_reconnector(bridge: Arc<Bridge>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = bridge.config.reconnect_interval;
        tracing::debug!("reconnector: started (interval={}s)", period.as_secs_f64());

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = bridge.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if bridge.state().await == BridgeState::Reconnecting {
                bridge.attempt_reconnect().await;
            }
        }
        tracing::debug!("reconnector: exited");
    })
}
