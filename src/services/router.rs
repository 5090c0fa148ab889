//! Output routing - fan-out of the deduplicated record stream to sink legs
//!
//! Each configured backend gets an independent chain of tasks
//! (encode -> batch -> write) joined by bounded channels. Fan-out uses
//! `try_send`, so a slow or failing leg drops its own records instead of
//! blocking the others.

use crate::domain::types::DecodedRecord;
use crate::infra::config::Config;
use crate::io::influx::{InfluxEncoder, InfluxWriter, Point};
use crate::io::sink;
use crate::io::tsp::{TspEncoder, TspMeasurement, TspWriter};
use crate::services::batcher::Batcher;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Entry point of one sink pipeline
pub struct SinkLeg {
    name: &'static str,
    tx: mpsc::Sender<DecodedRecord>,
    dropped: u64,
    /// Rate limit for drop warnings
    last_drop_warn: Instant,
}

impl SinkLeg {
    pub fn new(name: &'static str, tx: mpsc::Sender<DecodedRecord>) -> Self {
        Self { name, tx, dropped: 0, last_drop_warn: Instant::now() - Duration::from_secs(2) }
    }

    fn send(&mut self, record: DecodedRecord) {
        if self.tx.try_send(record).is_err() {
            self.dropped += 1;
            if self.last_drop_warn.elapsed() >= Duration::from_secs(1) {
                warn!(leg = %self.name, dropped = %self.dropped, "sink_leg_backlogged");
                self.last_drop_warn = Instant::now();
            }
        }
    }
}

/// Fans the record stream out to the configured sink legs
pub struct OutputRouter {
    legs: Vec<SinkLeg>,
}

impl OutputRouter {
    pub fn new(legs: Vec<SinkLeg>) -> Self {
        Self { legs }
    }

    /// Build the built-in legs from config and spawn their tasks
    ///
    /// The returned handles complete only after the leg has flushed and its
    /// writer has drained, so joining them finishes the shutdown sequence.
    pub fn from_config(config: &Config) -> (Self, Vec<JoinHandle<()>>) {
        let mut legs = Vec::new();
        let mut handles = Vec::new();

        if let Some(influx_config) = config.influx() {
            let encoder = InfluxEncoder::new(influx_config);
            let writer = InfluxWriter::new(influx_config);
            let (record_tx, mut record_rx) = mpsc::channel::<DecodedRecord>(256);
            let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<Point>>(64);
            let (batch_tx, batch_rx) = mpsc::channel::<Vec<Point>>(8);

            handles.push(tokio::spawn(async move {
                while let Some(record) = record_rx.recv().await {
                    let point = encoder.encode(&record);
                    if point.is_empty() {
                        // Nothing measurable in the payload
                        debug!(device = %record.peripheral, "influx_point_empty");
                        continue;
                    }
                    if chunk_tx.send(vec![point]).await.is_err() {
                        break;
                    }
                }
            }));
            handles
                .push(tokio::spawn(Batcher::new(influx_config.interval_ms, "influx").run(chunk_rx, batch_tx)));
            handles.push(tokio::spawn(sink::drain(batch_rx, writer)));
            legs.push(SinkLeg::new("influx", record_tx));
        }

        if let Some(tsp_config) = config.tsp() {
            let encoder = TspEncoder::new(tsp_config);
            let writer = TspWriter::new(tsp_config);
            let (record_tx, mut record_rx) = mpsc::channel::<DecodedRecord>(256);
            let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<TspMeasurement>>(64);
            let (batch_tx, batch_rx) = mpsc::channel::<Vec<TspMeasurement>>(8);

            handles.push(tokio::spawn(async move {
                while let Some(record) = record_rx.recv().await {
                    let measurements = encoder.encode(&record);
                    if measurements.is_empty() {
                        continue;
                    }
                    if chunk_tx.send(measurements).await.is_err() {
                        break;
                    }
                }
            }));
            handles
                .push(tokio::spawn(Batcher::new(tsp_config.interval_ms, "tsp").run(chunk_rx, batch_tx)));
            handles.push(tokio::spawn(sink::drain(batch_rx, writer)));
            legs.push(SinkLeg::new("tsp", record_tx));
        }

        (Self::new(legs), handles)
    }

    pub fn leg_count(&self) -> usize {
        self.legs.len()
    }

    /// Hand one record to every leg
    pub fn route(&mut self, record: DecodedRecord) {
        for leg in &mut self.legs {
            leg.send(record.clone());
        }
    }
}
