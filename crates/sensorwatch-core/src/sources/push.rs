//! Push ingestion: a long-lived feed subscription.
//!
//! Each inbound message is one JSON object. Malformed messages are dropped and
//! counted; connection loss is retried with doubling backoff until shutdown.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::buffer::TelemetryBuffer;
use crate::config::PushConfig;
use crate::error::{Error, Result};
use crate::record::RawReading;
use crate::source::{
    IngestStats, ShutdownSignal, SourceInfo, SourceKind, TelemetrySource, sleep_or_shutdown,
    wait_for_shutdown,
};

// ---------------------------------------------------------------------------
// Feed abstraction
// ---------------------------------------------------------------------------

/// A publish/subscribe endpoint that can be (re)connected.
pub trait Feed: Send + Sync {
    type Subscription: FeedSubscription;

    /// Address shown in logs and [`SourceInfo`].
    fn endpoint(&self) -> String;

    /// Open a new subscription.
    fn connect(&self) -> impl std::future::Future<Output = Result<Self::Subscription>> + Send;

    /// Whether a new subscription can follow one that ended. A feed that
    /// returns `false` is idle after its stream closes, until shutdown.
    fn reconnectable(&self) -> bool {
        true
    }
}

/// An open subscription yielding raw message payloads.
pub trait FeedSubscription: Send {
    /// Next payload, or `Ok(None)` once the feed closed the stream.
    fn next_message(
        &mut self,
    ) -> impl std::future::Future<Output = Result<Option<Vec<u8>>>> + Send;
}

/// Newline-delimited JSON over TCP.
#[derive(Debug, Clone)]
pub struct LineFeed {
    addr: String,
}

impl LineFeed {
    /// `addr` is `HOST:PORT`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

/// Open [`LineFeed`] connection.
pub struct LineSubscription {
    reader: BufReader<TcpStream>,
    line: Vec<u8>,
}

impl Feed for LineFeed {
    type Subscription = LineSubscription;

    fn endpoint(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    async fn connect(&self) -> Result<LineSubscription> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| Error::SourceUnavailable(format!("connect {}: {e}", self.addr)))?;
        Ok(LineSubscription {
            reader: BufReader::new(stream),
            line: Vec::new(),
        })
    }
}

impl FeedSubscription for LineSubscription {
    /// Raw line bytes without the terminator. Decoding is left to the
    /// adapter, so a line that is not UTF-8 is dropped as malformed instead of
    /// failing the connection.
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        self.line.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.line)
            .await
            .map_err(|e| Error::SourceUnavailable(format!("feed read failed: {e}")))?;
        if read == 0 {
            return Ok(None);
        }
        if self.line.last() == Some(&b'\n') {
            self.line.pop();
            if self.line.last() == Some(&b'\r') {
                self.line.pop();
            }
        }
        Ok(Some(self.line.clone()))
    }
}

/// In-process feed backed by a channel, for a producer in the same process.
///
/// It can be connected once. When every sender is dropped the stream ends and
/// the adapter stays idle until shutdown instead of reconnecting.
pub struct ChannelFeed {
    receiver: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
}

impl ChannelFeed {
    /// Create a feed and the sender that publishes into it.
    pub fn new(depth: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (
            tx,
            Self {
                receiver: Mutex::new(Some(rx)),
            },
        )
    }
}

/// Open [`ChannelFeed`] subscription.
pub struct ChannelSubscription {
    receiver: mpsc::Receiver<Vec<u8>>,
}

impl Feed for ChannelFeed {
    type Subscription = ChannelSubscription;

    fn endpoint(&self) -> String {
        "channel".to_string()
    }

    async fn connect(&self) -> Result<ChannelSubscription> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::SourceUnavailable("channel feed already consumed".into()))?;
        Ok(ChannelSubscription { receiver })
    }

    fn reconnectable(&self) -> bool {
        false
    }
}

impl FeedSubscription for ChannelSubscription {
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.receiver.recv().await)
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Reconnect delays: start at `initial`, double per failure, cap at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from(&PushConfig::default())
    }
}

impl From<&PushConfig> for Backoff {
    fn from(config: &PushConfig) -> Self {
        Self {
            initial: config.reconnect_initial,
            max: config.reconnect_max,
        }
    }
}

/// Push-driven source over any [`Feed`].
pub struct PushAdapter<F> {
    feed: F,
    backoff: Backoff,
    stats: Arc<IngestStats>,
}

impl<F: Feed> PushAdapter<F> {
    pub fn new(feed: F, backoff: Backoff) -> Self {
        Self {
            feed,
            backoff,
            stats: IngestStats::new(),
        }
    }

    /// Parse, normalize and append one payload.
    ///
    /// A malformed payload is dropped: the buffer is left unchanged, the drop
    /// is counted and logged, and the error is returned for the caller's
    /// information only.
    pub fn ingest_message(&self, payload: &[u8], buffer: &TelemetryBuffer) -> Result<()> {
        self.stats.record_received(1);
        let parsed = RawReading::from_json(payload).and_then(|raw| raw.normalize(Utc::now()));
        match parsed {
            Ok(record) => {
                buffer.append(record);
                self.stats.record_accepted(1);
                Ok(())
            }
            Err(e) => {
                self.stats.record_dropped(1);
                warn!("dropping feed message: {e}");
                Err(e)
            }
        }
    }

    /// Drain one subscription until it ends, fails, or shutdown fires.
    /// Returns `true` on shutdown.
    async fn drain(
        &self,
        subscription: &mut F::Subscription,
        buffer: &TelemetryBuffer,
        shutdown: &mut ShutdownSignal,
    ) -> bool {
        loop {
            let next = tokio::select! {
                msg = subscription.next_message() => msg,
                _ = wait_for_shutdown(shutdown) => return true,
            };
            match next {
                Ok(Some(payload)) => {
                    if payload.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    // Already counted and logged.
                    let _ = self.ingest_message(&payload, buffer);
                }
                Ok(None) => {
                    warn!("feed {} closed the stream", self.feed.endpoint());
                    self.stats.record_source_error();
                    return false;
                }
                Err(e) => {
                    warn!("{e}");
                    self.stats.record_source_error();
                    return false;
                }
            }
        }
    }
}

impl<F: Feed> TelemetrySource for PushAdapter<F> {
    fn info(&self) -> SourceInfo {
        SourceInfo {
            name: "push",
            kind: SourceKind::Push,
            endpoint: self.feed.endpoint(),
        }
    }

    fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    async fn run(&self, buffer: Arc<TelemetryBuffer>, mut shutdown: ShutdownSignal) {
        let endpoint = self.feed.endpoint();
        let mut delay = self.backoff.initial;
        info!("subscribing to feed {endpoint}");

        loop {
            let connected = tokio::select! {
                res = self.feed.connect() => res,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            match connected {
                Ok(mut subscription) => {
                    info!("connected to feed {endpoint}");
                    delay = self.backoff.initial;
                    if self.drain(&mut subscription, &buffer, &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                    self.stats.record_source_error();
                }
            }

            if !self.feed.reconnectable() {
                info!("feed {endpoint} ended; idle until shutdown");
                wait_for_shutdown(&mut shutdown).await;
                break;
            }

            debug!("reconnecting to {endpoint} in {delay:?}");
            if sleep_or_shutdown(delay, &mut shutdown).await {
                break;
            }
            delay = self.backoff.next(delay);
        }

        info!("push adapter for {endpoint} stopped");
    }
}
