//! Kafka consumer worker: health reporting, the consumption loop, and the
//! telemetry it feeds. `main.rs` wires these together for the binary.

pub mod pipeline;
pub mod signals;
pub mod source;
pub mod worker;

pub use pipeline::{process_batch, BatchOutcome};
pub use signals::install_shutdown_handler;
pub use source::{FetchBatch, FetchError, FetchedRecord, KafkaSource, RecordSource, SourceError};
pub use worker::{consume, run, serve, start_services, ConsumeSummary, ConsumerError};
