//! ruuvi-hub - RuuviTag telemetry hub
//!
//! Ingests beacon advertisement reports, decodes and deduplicates the
//! measurements and routes time-batched records to the configured backends.
//!
//! Module structure:
//! - `domain/` - Core types and RuuviTag broadcast decoders
//! - `io/` - External interfaces (MQTT source, Influx, TSP)
//! - `services/` - Pipeline stages (dedup, batching, routing)
//! - `infra/` - Infrastructure (Config)

use clap::Parser;
use ruuvi_hub::infra::Config;
use ruuvi_hub::io::listener::RuuviListener;
use ruuvi_hub::services::{OutputRouter, Pipeline};
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// RuuviTag telemetry hub
#[derive(Parser, Debug)]
#[command(name = "ruuvi-hub", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/hub.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("ruuvi-hub starting");

    let args = Args::parse();

    // A bad config or a missing sink must stop us before the source starts
    let config = Config::from_file(&args.config)?;
    config.validate()?;

    info!(
        config_file = %config.config_file(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        mqtt_topic = %config.mqtt_topic(),
        scan_mode = %config.scan_mode(),
        service_uuids = ?config.service_uuids(),
        filters = %config.filters().len(),
        influx = %config.influx().is_some(),
        tsp = %config.tsp().is_some(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Sink legs spawn now; their handles complete after the final flush
    let (router, sink_handles) = OutputRouter::from_config(&config);
    info!(sinks = %router.leg_count(), "output_router_ready");

    // Advertisement channel (bounded; the listener drops on overflow)
    let (advertisement_tx, advertisement_rx) = mpsc::channel(1024);
    let listener = RuuviListener::new(&config, advertisement_tx);

    // Start the MQTT advertisement source
    let mqtt_config = config.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    let source = tokio::spawn(async move {
        if let Err(e) =
            ruuvi_hub::io::mqtt::start_mqtt_source(&mqtt_config, listener, mqtt_shutdown).await
        {
            tracing::error!(error = %e, "MQTT source error");
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run the pipeline - consumes advertisements until the source stops
    Pipeline::new(router).run(advertisement_rx).await;

    // Source is gone; wait for every leg to flush and every writer to drain
    source.await.ok();
    for handle in sink_handles {
        handle.await.ok();
    }

    info!("ruuvi-hub shutdown complete");
    Ok(())
}
