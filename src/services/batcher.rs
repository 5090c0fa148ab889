//! Interval batching between encoders and sink writers
//!
//! Decouples arrival cadence from write cadence: items accumulate in an
//! unbounded in-memory cache and are emitted as one batch per timer tick.
//! Input chunks are flattened, so an encoder may hand over one item or many
//! per record. On input close the cache is flushed exactly once before the
//! output channel is dropped, so a graceful shutdown loses nothing that was
//! admitted.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};

/// Default flush interval for the primary (time-series) leg
pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 5000;
/// Default flush interval for the remote-API leg
pub const DEFAULT_TSP_BATCH_INTERVAL_MS: u64 = 10_000;

/// Accumulates items and emits them as one batch per interval
pub struct Batcher<T> {
    cache: Vec<T>,
    interval: Duration,
    /// Sink leg name, for logging only
    leg: &'static str,
}

impl<T: Send + 'static> Batcher<T> {
    pub fn new(interval_ms: u64, leg: &'static str) -> Self {
        Self { cache: Vec::new(), interval: Duration::from_millis(interval_ms), leg }
    }

    /// Consume input chunks until the channel closes, emitting batches on
    /// every non-empty tick and once more on close
    pub async fn run(mut self, mut rx: mpsc::Receiver<Vec<T>>, tx: mpsc::Sender<Vec<T>>) {
        // First tick one full interval from now, not immediately
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        debug!(leg = %self.leg, interval_ms = %self.interval.as_millis(), "batcher_started");

        loop {
            tokio::select! {
                chunk = rx.recv() => {
                    match chunk {
                        Some(items) => self.cache.extend(items),
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&tx).await;
                }
            }
        }

        info!(leg = %self.leg, "batcher_draining");
        self.flush(&tx).await;
        // Dropping tx signals completion downstream
    }

    async fn flush(&mut self, tx: &mpsc::Sender<Vec<T>>) {
        if self.cache.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.cache);
        info!(leg = %self.leg, items = %batch.len(), "batch_flush");
        // Writer backpressure only stalls this leg
        let _ = tx.send(batch).await;
    }
}
