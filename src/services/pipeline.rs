//! The record pipeline - decode, deduplicate, route
//!
//! Consumes raw advertisements from the source channel until it closes.
//! Every stage recovers locally: a bad payload or a duplicate drops that one
//! record and the loop carries on. When the channel closes the router is
//! dropped, which closes every sink leg and lets them flush.

use crate::domain::ruuvi;
use crate::domain::types::RawAdvertisement;
use crate::services::deduplicator::SequenceDeduplicator;
use crate::services::router::OutputRouter;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Central record processor fed by the advertisement source
pub struct Pipeline {
    dedup: SequenceDeduplicator,
    router: OutputRouter,
}

impl Pipeline {
    pub fn new(router: OutputRouter) -> Self {
        Self { dedup: SequenceDeduplicator::new(), router }
    }

    /// Process advertisements until the source channel closes
    pub async fn run(mut self, mut rx: mpsc::Receiver<RawAdvertisement>) {
        while let Some(advertisement) = rx.recv().await {
            let record = match ruuvi::decode(&advertisement) {
                Ok(record) => record,
                Err(e) => {
                    warn!(device = %advertisement.peripheral, error = %e, "decode_failed");
                    continue;
                }
            };

            if !self.dedup.admit(&record) {
                continue;
            }

            self.router.route(record);
        }

        info!("pipeline_drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{DecodedRecord, PeripheralInfo};
    use crate::services::router::SinkLeg;
    use bytes::Bytes;

    const DF5_SAMPLE: [u8; 24] = [
        0x05, 0x13, 0x14, 0x2c, 0xf8, 0xff, 0xff, 0xff, 0xf0, 0xff, 0xf4, 0x03, 0xec, 0xc4, 0x16,
        0x52, 0x0e, 0x1b, 0xc6, 0x91, 0x3c, 0x66, 0x24, 0x7d,
    ];

    fn advertisement(device: &str, payload: &[u8]) -> RawAdvertisement {
        RawAdvertisement {
            peripheral: PeripheralInfo::new(device, None),
            payload: Bytes::copy_from_slice(payload),
            captured_at: 1_700_000_000_000,
        }
    }

    fn with_sequence(mut payload: [u8; 24], sequence: u16) -> [u8; 24] {
        payload[16..18].copy_from_slice(&sequence.to_be_bytes());
        payload
    }

    async fn run_pipeline(
        advertisements: Vec<RawAdvertisement>,
    ) -> tokio::sync::mpsc::Receiver<DecodedRecord> {
        let (leg_tx, leg_rx) = mpsc::channel(64);
        let pipeline = Pipeline::new(OutputRouter::new(vec![SinkLeg::new("test", leg_tx)]));

        let (adv_tx, adv_rx) = mpsc::channel(64);
        for advertisement in advertisements {
            adv_tx.send(advertisement).await.unwrap();
        }
        drop(adv_tx);

        pipeline.run(adv_rx).await;
        leg_rx
    }

    #[tokio::test]
    async fn test_decode_dedup_route() {
        let mut downstream = run_pipeline(vec![
            advertisement("aa11", &with_sequence(DF5_SAMPLE, 1)),
            advertisement("aa11", &with_sequence(DF5_SAMPLE, 1)), // duplicate
            advertisement("aa11", &with_sequence(DF5_SAMPLE, 2)),
        ])
        .await;

        assert_eq!(downstream.recv().await.unwrap().sequence, Some(1));
        assert_eq!(downstream.recv().await.unwrap().sequence, Some(2));
        assert!(downstream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_bad_payloads_yield_nothing_downstream() {
        let mut downstream = run_pipeline(vec![
            advertisement("aa11", &[0x7f, 0x00]),       // unknown format
            advertisement("aa11", &[0xac, 0x00]),       // unsupported format
            advertisement("aa11", &[0x05, 0x13, 0x14]), // truncated
        ])
        .await;

        assert!(downstream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_devices_dedup_independently() {
        let mut downstream = run_pipeline(vec![
            advertisement("aa11", &with_sequence(DF5_SAMPLE, 5)),
            advertisement("bb22", &with_sequence(DF5_SAMPLE, 5)),
        ])
        .await;

        assert_eq!(downstream.recv().await.unwrap().peripheral.id, "aa11");
        assert_eq!(downstream.recv().await.unwrap().peripheral.id, "bb22");
    }
}
