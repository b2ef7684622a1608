//! Telemetry source capability and shared runtime state.
//!
//! Every ingestion strategy implements [`TelemetrySource`]: it delivers
//! normalized records into a [`TelemetryBuffer`] until told to stop. The push
//! and pull adapters in [`crate::sources`] are the two implementations; the
//! buffer and query logic exist once and are shared by both.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;

use crate::buffer::TelemetryBuffer;

/// How an adapter obtains data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Driven by inbound feed messages.
    Push,
    /// Driven by periodic re-fetch of a full dataset.
    Pull,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Pull => write!(f, "pull"),
        }
    }
}

/// Metadata about a running source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub name: &'static str,
    pub kind: SourceKind,
    /// Human-readable endpoint (feed address, dataset URL or path).
    pub endpoint: String,
}

/// Trait that every ingestion strategy implements.
pub trait TelemetrySource: Send + Sync {
    /// Source metadata.
    fn info(&self) -> SourceInfo;

    /// Shared ingestion counters.
    fn stats(&self) -> &Arc<IngestStats>;

    /// Deliver records into `buffer` until `shutdown` fires. Transient
    /// failures are logged and retried; this only returns on shutdown.
    fn run(
        &self,
        buffer: Arc<TelemetryBuffer>,
        shutdown: ShutdownSignal,
    ) -> impl Future<Output = ()> + Send;
}

// ---------------------------------------------------------------------------
// Ingestion counters
// ---------------------------------------------------------------------------

/// Lock-free ingestion counters, shared between an adapter and its observers.
#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    accepted: AtomicU64,
    dropped_malformed: AtomicU64,
    source_errors: AtomicU64,
    reloads: AtomicU64,
    unchanged_fetches: AtomicU64,
    last_ingest_unix_ms: AtomicU64,
}

impl IngestStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn record_received(&self, n: u64) {
        self.received.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_accepted(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.accepted.fetch_add(n, Ordering::Relaxed);
        let now = Utc::now().timestamp_millis().max(0) as u64;
        self.last_ingest_unix_ms.store(now, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, n: u64) {
        self.dropped_malformed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_source_error(&self) {
        self.source_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reload(&self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unchanged(&self) {
        self.unchanged_fetches.fetch_add(1, Ordering::Relaxed);
    }

    /// Counters as plain data.
    pub fn snapshot(&self) -> IngestSnapshot {
        let last = self.last_ingest_unix_ms.load(Ordering::Relaxed);
        IngestSnapshot {
            received: self.received.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
            unchanged_fetches: self.unchanged_fetches.load(Ordering::Relaxed),
            last_ingest_unix_ms: (last > 0).then_some(last),
        }
    }
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IngestSnapshot {
    /// Messages or dataset rows seen.
    pub received: u64,
    /// Records that passed normalization.
    pub accepted: u64,
    /// Messages or rows dropped as malformed.
    pub dropped_malformed: u64,
    /// Failed connects, lost connections and failed fetches.
    pub source_errors: u64,
    /// Full-dataset reconciliations applied (pull only).
    pub reloads: u64,
    /// Fetches skipped because the dataset had not changed (pull only).
    pub unchanged_fetches: u64,
    /// Wall clock of the last accepted record.
    pub last_ingest_unix_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Shutdown signalling
// ---------------------------------------------------------------------------

/// Receiving half of the process shutdown flag.
pub type ShutdownSignal = watch::Receiver<bool>;

/// Create a shutdown flag. Send `true` (or drop the sender) to stop every
/// holder of a receiver.
pub fn shutdown_channel() -> (watch::Sender<bool>, ShutdownSignal) {
    watch::channel(false)
}

/// Resolve once shutdown is requested or the sender is gone.
pub async fn wait_for_shutdown(signal: &mut ShutdownSignal) {
    loop {
        let stopped = *signal.borrow_and_update();
        if stopped || signal.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `delay`, returning `true` early if shutdown was requested.
pub async fn sleep_or_shutdown(delay: Duration, signal: &mut ShutdownSignal) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = wait_for_shutdown(signal) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot() {
        let stats = IngestStats::new();
        assert_eq!(stats.snapshot(), IngestSnapshot::default());

        stats.record_received(3);
        stats.record_accepted(2);
        stats.record_dropped(1);
        stats.record_source_error();
        stats.record_reload();
        stats.record_unchanged();

        let snap = stats.snapshot();
        assert_eq!(snap.received, 3);
        assert_eq!(snap.accepted, 2);
        assert_eq!(snap.dropped_malformed, 1);
        assert_eq!(snap.source_errors, 1);
        assert_eq!(snap.reloads, 1);
        assert_eq!(snap.unchanged_fetches, 1);
        assert!(snap.last_ingest_unix_ms.is_some());
    }

    #[test]
    fn test_source_kind_display() {
        assert_eq!(SourceKind::Push.to_string(), "push");
        assert_eq!(SourceKind::Pull.to_string(), "pull");
    }

    #[tokio::test]
    async fn test_sleep_interrupted_by_shutdown() {
        let (tx, mut rx) = shutdown_channel();
        tx.send(true).unwrap();
        assert!(sleep_or_shutdown(Duration::from_secs(60), &mut rx).await);
    }

    #[tokio::test]
    async fn test_sleep_completes_without_shutdown() {
        let (_tx, mut rx) = shutdown_channel();
        assert!(!sleep_or_shutdown(Duration::from_millis(5), &mut rx).await);
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_shutdown() {
        let (tx, mut rx) = shutdown_channel();
        drop(tx);
        wait_for_shutdown(&mut rx).await;
    }
}
