//! Sink interface shared by all backend writers
//!
//! A sink accepts one batch at a time and reports its outcome through
//! logging only; no backpressure or error signal flows back into the
//! pipeline. Whether failed batches should be requeued is unresolved
//! upstream, so a failed write means the batch is gone from the hub's
//! perspective.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

/// Backend writer for one batch type
#[async_trait]
pub trait Sink<T>: Send {
    /// Name of the sink leg, for logging
    fn name(&self) -> &'static str;

    /// Write one batch; failures are logged by the implementation
    async fn write(&self, batch: Vec<T>);
}

/// Drain flushed batches into a sink until the batch channel closes
pub async fn drain<T: Send, S: Sink<T>>(mut rx: mpsc::Receiver<Vec<T>>, sink: S) {
    while let Some(batch) = rx.recv().await {
        sink.write(batch).await;
    }
    info!(leg = %sink.name(), "sink_closed");
}
