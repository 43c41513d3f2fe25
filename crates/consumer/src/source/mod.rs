use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

mod kafka;
mod types;

pub use kafka::{KafkaSource, SourceError};
pub use types::{FetchBatch, FetchError, FetchedRecord};

/// Something the consumption loop can poll for batches.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Waits for the next batch. Must return promptly (an empty batch is fine)
    /// once `shutdown` is cancelled.
    async fn poll(&self, shutdown: &CancellationToken) -> FetchBatch;
}
