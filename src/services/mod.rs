//! Services - the stream-processing stages
//!
//! This module contains the core pipeline logic:
//! - `pipeline` - Decode, deduplicate and route incoming advertisements
//! - `deduplicator` - Per-device measurement sequence deduplication
//! - `batcher` - Interval batching between encoders and sink writers
//! - `router` - Fan-out of the record stream to independent sink legs

pub mod batcher;
pub mod deduplicator;
pub mod pipeline;
pub mod router;

// Re-export commonly used types
pub use batcher::Batcher;
pub use deduplicator::SequenceDeduplicator;
pub use pipeline::Pipeline;
pub use router::{OutputRouter, SinkLeg};
