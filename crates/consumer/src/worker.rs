use std::future::Future;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use courier_domain::{
    config::{ConfigError, ConfigProvider},
    services::{
        ConsumptionMetrics, HealthError, HealthRegistry, ServingStatus, Telemetry, TelemetryError,
    },
};

use crate::{
    pipeline::{process_batch, BatchOutcome},
    source::{RecordSource, SourceError},
};

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("health error: {0}")]
    Health(#[from] HealthError),
    #[error("error initializing telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("error consuming from message queue: {0}")]
    Source(#[from] SourceError),
}

/// Totals for one run of [`consume`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeSummary {
    pub consumed: usize,
    pub failed_batches: usize,
}

/// Drives the consumer from health start-up to telemetry shutdown.
///
/// `open_source` runs once readiness is SERVING; production passes
/// [`crate::source::KafkaSource::open`]. Health and telemetry failures are
/// returned before anything is consumed and the health registry keeps running
/// so the caller decides when to stop it.
pub async fn run<P, F, Fut, S>(
    provider: &P,
    registry: &HealthRegistry,
    open_source: F,
    shutdown: CancellationToken,
) -> Result<ConsumeSummary, ConsumerError>
where
    P: ConfigProvider + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<S, SourceError>>,
    S: RecordSource,
{
    let telemetry = start_services(provider, registry).await?;
    serve(provider, registry, &telemetry, open_source, &shutdown).await
}

/// Starts the health server, then the telemetry pipeline.
pub async fn start_services<P>(
    provider: &P,
    registry: &HealthRegistry,
) -> Result<Telemetry, ConsumerError>
where
    P: ConfigProvider + ?Sized,
{
    registry.start(provider).await?;
    Ok(Telemetry::init(provider).await?)
}

/// Marks the process ready, opens the source and consumes until `shutdown`
/// fires. `telemetry` is shut down exactly once however this ends.
pub async fn serve<P, F, Fut, S>(
    provider: &P,
    registry: &HealthRegistry,
    telemetry: &Telemetry,
    open_source: F,
    shutdown: &CancellationToken,
) -> Result<ConsumeSummary, ConsumerError>
where
    P: ConfigProvider + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<S, SourceError>>,
    S: RecordSource,
{
    let outcome = consume_when_ready(provider, registry, telemetry, open_source, shutdown).await;
    telemetry.shutdown_logged().await;
    outcome
}

async fn consume_when_ready<P, F, Fut, S>(
    provider: &P,
    registry: &HealthRegistry,
    telemetry: &Telemetry,
    open_source: F,
    shutdown: &CancellationToken,
) -> Result<ConsumeSummary, ConsumerError>
where
    P: ConfigProvider + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<S, SourceError>>,
    S: RecordSource,
{
    registry.set_readiness(ServingStatus::Serving).await?;
    let source = open_source().await?;

    debug!(
        topics = ?provider.message_queue_topics(),
        group = provider.message_queue_group_id(),
        "listening for messages"
    );
    Ok(consume(&source, telemetry, shutdown).await)
}

/// Polls `source` until `shutdown` is cancelled. Fetch errors never end the
/// loop and the next poll follows immediately.
pub async fn consume<S, M>(source: &S, metrics: &M, shutdown: &CancellationToken) -> ConsumeSummary
where
    S: RecordSource + ?Sized,
    M: ConsumptionMetrics + ?Sized,
{
    let mut summary = ConsumeSummary::default();

    loop {
        let batch = source.poll(shutdown).await;
        // Anything delivered alongside the cancellation is dropped.
        if shutdown.is_cancelled() {
            info!(
                consumed = summary.consumed,
                failed_batches = summary.failed_batches,
                "consumer stopped"
            );
            break;
        }

        match process_batch(metrics, &batch) {
            BatchOutcome::Consumed(count) => summary.consumed += count,
            BatchOutcome::Failed(_) => summary.failed_batches += 1,
        }
    }

    summary
}
