//! MQTT client for receiving beacon advertisement reports
//!
//! Ruuvi gateways re-publish BLE advertisements over MQTT as small JSON
//! reports. This client is one concrete advertisement source; anything that
//! can push reports into the `RuuviListener` works in its place.

use crate::domain::types::{epoch_ms, PeripheralInfo};
use crate::infra::config::Config;
use crate::io::listener::RuuviListener;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// One advertisement report as published by a gateway
#[derive(Debug, Deserialize)]
pub struct AdvertisementReport {
    /// Peripheral identifier assigned by the scanning adapter
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Hex-encoded manufacturer data, identifier included
    pub data: String,
    /// Capture time (epoch ms); reports without one are stamped on arrival
    #[serde(default)]
    pub ts: Option<u64>,
}

/// Start the MQTT client and feed reports to the listener
///
/// Runs until the shutdown signal flips. Malformed reports are logged and
/// dropped; connection errors back off and retry.
pub async fn start_mqtt_source(
    config: &Config,
    mut listener: RuuviListener,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut mqttoptions = MqttOptions::new("ruuvi-hub", config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.mqtt_topic(), QoS::AtMostOnce).await?;

    info!(topic = %config.mqtt_topic(), host = %config.mqtt_host(), port = %config.mqtt_port(), "MQTT source subscribed");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let received_at = epoch_ms();
                        match parse_report(&publish.payload) {
                            Ok((peripheral, manufacturer_data, captured_at)) => {
                                listener.observe(
                                    peripheral,
                                    &manufacturer_data,
                                    captured_at.unwrap_or(received_at),
                                );
                            }
                            Err(e) => {
                                warn!(topic = %publish.topic, error = %e, "invalid_advertisement_report");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "MQTT error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Parse one report payload into listener input
fn parse_report(
    payload: &[u8],
) -> Result<(PeripheralInfo, Vec<u8>, Option<u64>), Box<dyn std::error::Error + Send + Sync>> {
    let report: AdvertisementReport = serde_json::from_slice(payload)?;
    let manufacturer_data = hex::decode(report.data.trim())?;
    debug!(id = %report.id, bytes = %manufacturer_data.len(), "advertisement_report");
    Ok((PeripheralInfo::new(report.id, report.name), manufacturer_data, report.ts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_report() {
        let payload = br#"{"id":"aa11","name":"Sauna","data":"99040501","ts":1700000000000}"#;
        let (peripheral, data, ts) = parse_report(payload).unwrap();

        assert_eq!(peripheral.id, "aa11");
        assert_eq!(peripheral.local_name.as_deref(), Some("Sauna"));
        assert_eq!(data, vec![0x99, 0x04, 0x05, 0x01]);
        assert_eq!(ts, Some(1_700_000_000_000));
    }

    #[test]
    fn test_parse_report_defaults() {
        let payload = br#"{"id":"aa11","data":"9904"}"#;
        let (peripheral, data, ts) = parse_report(payload).unwrap();

        assert_eq!(peripheral.local_name, None);
        assert_eq!(data, vec![0x99, 0x04]);
        assert_eq!(ts, None);
    }

    #[test]
    fn test_parse_report_rejects_bad_payloads() {
        assert!(parse_report(b"not json").is_err());
        assert!(parse_report(br#"{"id":"aa11","data":"zz"}"#).is_err());
        assert!(parse_report(br#"{"data":"9904"}"#).is_err());
    }
}
