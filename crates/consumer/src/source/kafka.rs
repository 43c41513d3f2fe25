use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use courier_domain::{
    certs::{CertError, TlsMaterial},
    ConfigProvider,
};
use rdkafka::{
    config::ClientConfig,
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    Message,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{FetchBatch, FetchError, FetchedRecord, RecordSource};

const PING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("message queue TLS material: {0}")]
    Tls(#[from] CertError),
    #[error("error creating kafka client: {0}")]
    Client(String),
    #[error("error pinging kafka client: {0}")]
    Ping(String),
}

/// Kafka consumer-group member subscribed to every configured topic over
/// mutual TLS. The client leaves the group when dropped.
pub struct KafkaSource {
    consumer: Arc<StreamConsumer>,
}

impl KafkaSource {
    pub fn connect<P>(provider: &P) -> Result<Self, SourceError>
    where
        P: ConfigProvider + ?Sized,
    {
        let tls = TlsMaterial::from_pem(
            provider.message_queue_client_ca(),
            provider.message_queue_client_cert(),
            provider.message_queue_client_cert_key(),
        )?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", provider.message_queue_url())
            .set("group.id", provider.message_queue_group_id())
            .set("client.id", provider.app_name())
            .set("security.protocol", "ssl")
            .set("ssl.ca.pem", tls.ca_pem())
            .set("ssl.certificate.pem", tls.cert_pem())
            .set("ssl.key.pem", tls.key_pem())
            .create()
            .map_err(|err| SourceError::Client(err.to_string()))?;

        let topics: Vec<&str> = provider
            .message_queue_topics()
            .iter()
            .map(String::as_str)
            .collect();
        consumer
            .subscribe(&topics)
            .map_err(|err| SourceError::Client(err.to_string()))?;

        Ok(Self {
            consumer: Arc::new(consumer),
        })
    }

    /// Connects and pings, so the returned source is known to reach the brokers.
    pub async fn open<P>(provider: &P) -> Result<Self, SourceError>
    where
        P: ConfigProvider + ?Sized,
    {
        let source = Self::connect(provider)?;
        source.ping().await?;
        Ok(source)
    }

    /// Fetches cluster metadata to prove the brokers are reachable.
    pub async fn ping(&self) -> Result<(), SourceError> {
        let consumer = Arc::clone(&self.consumer);
        let metadata = tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(None, PING_TIMEOUT)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|err| SourceError::Ping(err.to_string()))?
        .map_err(|err| SourceError::Ping(err.to_string()))?;

        debug!(brokers = metadata, "message queue reachable");
        Ok(())
    }
}

#[async_trait]
impl RecordSource for KafkaSource {
    async fn poll(&self, shutdown: &CancellationToken) -> FetchBatch {
        tokio::select! {
            _ = shutdown.cancelled() => FetchBatch::default(),
            received = self.consumer.recv() => match received {
                Ok(message) => FetchBatch::from_records(vec![FetchedRecord::new(
                    message.topic(),
                    message.partition(),
                    message.payload().unwrap_or_default(),
                )]),
                Err(err) => FetchBatch::from_errors(vec![fetch_error(&err)]),
            },
        }
    }
}

fn fetch_error(err: &KafkaError) -> FetchError {
    let partition = match err {
        KafkaError::PartitionEOF(partition) => *partition,
        _ => -1,
    };
    FetchError::new(String::new(), partition, err.to_string())
}
