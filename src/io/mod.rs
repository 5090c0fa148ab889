//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT client receiving gateway advertisement reports
//! - `listener` - Advertisement intake (filters, discovery bookkeeping)
//! - `sink` - Backend writer interface shared by all sinks
//! - `influx` - InfluxDB point encoding and line-protocol writes
//! - `tsp` - Time Series Platform measurement binding and dispatch

pub mod influx;
pub mod listener;
pub mod mqtt;
pub mod sink;
pub mod tsp;

// Re-export commonly used types
pub use influx::{InfluxEncoder, InfluxWriter, Point};
pub use listener::RuuviListener;
pub use sink::Sink;
pub use tsp::{TspEncoder, TspMeasurement, TspWriter};
