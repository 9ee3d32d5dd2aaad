// context-bridge -- bridge statistics
//
// Counters are atomics so workers and callers can bump them without the
// connection lock. Per-operation tallies use a std Mutex: they are touched
// for a few nanoseconds and never held across an await.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use crate::translator::ContextTranslator;

#[derive(Debug, Default)]
pub struct BridgeStats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    reconnection_attempts: AtomicU64,
    successful_reconnects: AtomicU64,
    heartbeats_sent: AtomicU64,
    frames_dropped: AtomicU64,
    operations_succeeded: AtomicU64,
    operations_failed: AtomicU64,
    operations_abandoned: AtomicU64,
    unmatched_responses: AtomicU64,
    /// Epoch seconds; 0 means "never".
    last_message_at: AtomicI64,
    last_heartbeat_ack_at: AtomicI64,
    connected_since: AtomicI64,
    tallies: Mutex<Tallies>,
}

#[derive(Debug, Default)]
struct Tallies {
    sent: BTreeMap<String, u64>,
    received: BTreeMap<String, u64>,
    pending: HashSet<String>,
}

/// Point-in-time copy handed to monitoring callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub reconnection_attempts: u64,
    pub successful_reconnects: u64,
    pub heartbeats_sent: u64,
    pub frames_dropped: u64,
    pub operations_succeeded: u64,
    pub operations_failed: u64,
    /// Pending when their connection dropped; no response will be matched.
    pub operations_abandoned: u64,
    /// `operation_response` frames for ids this bridge was not waiting on.
    pub unmatched_responses: u64,
    pub pending_operations: usize,
    pub translation_successes: u64,
    pub translation_failures: u64,
    pub last_message_at: Option<i64>,
    pub last_heartbeat_ack_at: Option<i64>,
    pub connected_since: Option<i64>,
    pub operations_sent: BTreeMap<String, u64>,
    pub operations_received: BTreeMap<String, u64>,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn tallies(&self) -> std::sync::MutexGuard<'_, Tallies> {
        self.tallies.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn record_sent(&self, operation: &str) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        *self.tallies().sent.entry(operation.to_string()).or_default() += 1;
    }

    pub fn record_received(&self, operation: &str, at: i64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.last_message_at.store(at, Ordering::Relaxed);
        *self.tallies().received.entry(operation.to_string()).or_default() += 1;
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat_ack(&self, at: i64) {
        self.last_heartbeat_ack_at.store(at, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connected(&self, at: i64, reconnect: bool) {
        self.connected_since.store(at, Ordering::Relaxed);
        if reconnect {
            self.successful_reconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_disconnected(&self) {
        self.connected_since.store(0, Ordering::Relaxed);
    }

    pub fn track_pending(&self, operation_id: &str) {
        self.tallies().pending.insert(operation_id.to_string());
    }

    /// Drop an id whose send never made it onto the wire.
    pub fn forget_pending(&self, operation_id: &str) {
        self.tallies().pending.remove(operation_id);
    }

    /// Resolve a pending operation. Returns `false` for ids this bridge is not
    /// waiting on; those only bump `unmatched_responses`.
    pub fn resolve_pending(&self, operation_id: &str, success: bool) -> bool {
        let known = self.tallies().pending.remove(operation_id);
        let counter = match (known, success) {
            (false, _) => &self.unmatched_responses,
            (true, true) => &self.operations_succeeded,
            (true, false) => &self.operations_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        known
    }

    /// Drop every pending id. Called when the connection they were sent on is
    /// gone; returns how many were abandoned.
    pub fn abandon_pending(&self) -> usize {
        let abandoned = {
            let mut tallies = self.tallies();
            let n = tallies.pending.len();
            tallies.pending.clear();
            n
        };
        self.operations_abandoned.fetch_add(abandoned as u64, Ordering::Relaxed);
        abandoned
    }

    pub fn snapshot(&self, translator: &ContextTranslator) -> StatsSnapshot {
        let tallies = self.tallies();
        let opt = |v: &AtomicI64| Some(v.load(Ordering::Relaxed)).filter(|t| *t > 0);
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            reconnection_attempts: self.reconnection_attempts.load(Ordering::Relaxed),
            successful_reconnects: self.successful_reconnects.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            operations_succeeded: self.operations_succeeded.load(Ordering::Relaxed),
            operations_failed: self.operations_failed.load(Ordering::Relaxed),
            operations_abandoned: self.operations_abandoned.load(Ordering::Relaxed),
            unmatched_responses: self.unmatched_responses.load(Ordering::Relaxed),
            pending_operations: tallies.pending.len(),
            translation_successes: translator.successes(),
            translation_failures: translator.failures(),
            last_message_at: opt(&self.last_message_at),
            last_heartbeat_ack_at: opt(&self.last_heartbeat_ack_at),
            connected_since: opt(&self.connected_since),
            operations_sent: tallies.sent.clone(),
            operations_received: tallies.received.clone(),
        }
    }
}
