//! Consumer binary that tails the configured Kafka topics.

use std::io;

use courier_consumer::{install_shutdown_handler, run, ConsumerError, KafkaSource};
use courier_domain::{
    load,
    services::{init_tracing, HealthRegistry, LogConfig},
    AppConfig,
};
use tracing::info;

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[consumer] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), ConsumerError> {
    let config = load()?;
    init_tracing(&LogConfig::from_env(config.as_ref()))?;

    let config: &AppConfig = &config;
    let registry = HealthRegistry::new();
    let shutdown = install_shutdown_handler();
    let outcome = run(config, &registry, || KafkaSource::open(config), shutdown).await;
    registry.shutdown();

    let summary = outcome?;
    info!(
        consumed = summary.consumed,
        failed_batches = summary.failed_batches,
        "consumer exited"
    );
    Ok(())
}
