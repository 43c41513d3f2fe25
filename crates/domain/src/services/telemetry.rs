use std::{
    env,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use once_cell::sync::OnceCell;
use opentelemetry::{
    global,
    metrics::{Counter, MeterProvider as _},
    propagation::{TextMapCompositePropagator, TextMapPropagator},
    trace::TracerProvider as _,
    InstrumentationScope,
};
use opentelemetry_otlp::{MetricExporter, SpanExporter, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracer, SdkTracerProvider},
    Resource,
};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::certs::{CertError, TlsMaterial};
use crate::config::ConfigProvider;

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();

pub const LOG_FILTER_VAR: &str = "COURIER_LOG_FILTER";
pub const CONSUMED_MESSAGE_COUNTER: &str = "consumed.message";

const METRICS_PATH: &str = "/v1/metrics";
const TRACES_PATH: &str = "/v1/traces";

/// Log subscriber options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    log_filter: String,
}

impl LogConfig {
    /// Development stages log at `debug`, everything else at `info`, unless
    /// `COURIER_LOG_FILTER` is set.
    pub fn from_env<P>(provider: &P) -> Self
    where
        P: ConfigProvider + ?Sized,
    {
        Self::new(provider, env::var(LOG_FILTER_VAR).ok())
    }

    pub fn new<P>(provider: &P, filter_override: Option<String>) -> Self
    where
        P: ConfigProvider + ?Sized,
    {
        let log_filter = filter_override
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| {
                if provider.is_development() {
                    "debug".to_string()
                } else {
                    "info".to_string()
                }
            });
        Self { log_filter }
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }
}

/// Installs the JSON log subscriber once per process.
pub fn init_tracing(config: &LogConfig) -> Result<(), TelemetryError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_new(config.log_filter())
        .map_err(|err| TelemetryError::InvalidLogFilter(err.to_string()))?;

    if SUBSCRIBER_INSTALLED.set(()).is_ok() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
            .map_err(|err| TelemetryError::Tracing(err.to_string()))?;
    }

    Ok(())
}

/// Sink for the per-record consumption count.
pub trait ConsumptionMetrics: Send + Sync {
    fn record_consumed(&self);
}

/// Owned handle on the OpenTelemetry pipeline: the `consumed.message`
/// counter, a tracer, and the providers to flush on shutdown.
#[derive(Clone)]
pub struct Telemetry {
    consumed: Counter<u64>,
    tracer: SdkTracer,
    meter_provider: SdkMeterProvider,
    tracer_provider: SdkTracerProvider,
    shut_down: Arc<AtomicBool>,
}

impl Telemetry {
    /// Builds the exporters, installs the global providers and propagators,
    /// and binds the consumption counter. Exporter construction blocks, so it
    /// runs off the async workers.
    pub async fn init<P>(provider: &P) -> Result<Self, TelemetryError>
    where
        P: ConfigProvider + ?Sized,
    {
        let settings = PipelineSettings::from_provider(provider);
        tokio::task::spawn_blocking(move || build_pipeline(settings))
            .await
            .map_err(|err| TelemetryError::Join(err.to_string()))?
    }

    pub fn tracer(&self) -> &SdkTracer {
        &self.tracer
    }

    /// Flushes and stops both providers. Only the first call does any work.
    pub fn shutdown(&self) -> Result<(), TelemetryError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut failures = Vec::new();
        if let Err(err) = self.tracer_provider.shutdown() {
            failures.push(format!("tracer provider: {err}"));
        }
        if let Err(err) = self.meter_provider.shutdown() {
            failures.push(format!("meter provider: {err}"));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TelemetryError::Shutdown(failures.join("; ")))
        }
    }

    /// Whether [`Telemetry::shutdown`] has already run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Runs [`Telemetry::shutdown`] on the blocking pool and logs any failure
    /// instead of returning it.
    pub async fn shutdown_logged(&self) {
        let telemetry = self.clone();
        match tokio::task::spawn_blocking(move || telemetry.shutdown()).await {
            Ok(Ok(())) => info!("telemetry pipeline shut down"),
            Ok(Err(err)) => error!(error = %err, "error shutting down the telemetry pipeline"),
            Err(err) => error!(error = %err, "telemetry shutdown task failed"),
        }
    }
}

impl ConsumptionMetrics for Telemetry {
    fn record_consumed(&self) {
        self.consumed.add(1, &[]);
    }
}

struct PipelineSettings {
    app_name: String,
    collector_url: String,
    stdout_metrics: bool,
    ca: Vec<u8>,
    cert: Vec<u8>,
    key: Vec<u8>,
}

impl PipelineSettings {
    fn from_provider<P>(provider: &P) -> Self
    where
        P: ConfigProvider + ?Sized,
    {
        Self {
            app_name: provider.app_name().to_owned(),
            collector_url: provider.otel_http_receiver_url().to_owned(),
            stdout_metrics: provider.otel_stdout_exporter_enabled(),
            ca: provider.consumer_ca().to_vec(),
            cert: provider.consumer_cert().to_vec(),
            key: provider.consumer_cert_key().to_vec(),
        }
    }
}

fn build_pipeline(settings: PipelineSettings) -> Result<Telemetry, TelemetryError> {
    let propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>> = vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ];
    global::set_text_map_propagator(TextMapCompositePropagator::new(propagators));

    let resource = Resource::builder()
        .with_service_name(settings.app_name.clone())
        .build();

    let tracer_provider = build_tracer_provider(&settings, resource.clone())?;
    let meter_provider = match build_meter_provider(&settings, resource) {
        Ok(provider) => provider,
        Err(err) => {
            if let Err(shutdown_err) = tracer_provider.shutdown() {
                error!(error = %shutdown_err, "error shutting down the tracer provider");
            }
            return Err(err);
        }
    };
    global::set_tracer_provider(tracer_provider.clone());
    global::set_meter_provider(meter_provider.clone());

    let scope = InstrumentationScope::builder(settings.app_name).build();
    let tracer = tracer_provider.tracer_with_scope(scope.clone());
    let consumed = meter_provider
        .meter_with_scope(scope)
        .u64_counter(CONSUMED_MESSAGE_COUNTER)
        .with_description("count of messages consumed")
        .build();

    Ok(Telemetry {
        consumed,
        tracer,
        meter_provider,
        tracer_provider,
        shut_down: Arc::new(AtomicBool::new(false)),
    })
}

fn build_tracer_provider(
    settings: &PipelineSettings,
    resource: Resource,
) -> Result<SdkTracerProvider, TelemetryError> {
    let exporter = SpanExporter::builder()
        .with_http()
        .with_endpoint(signal_endpoint(&settings.collector_url, "http", TRACES_PATH))
        .build()
        .map_err(|err| TelemetryError::Exporter(err.to_string()))?;

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build())
}

fn build_meter_provider(
    settings: &PipelineSettings,
    resource: Resource,
) -> Result<SdkMeterProvider, TelemetryError> {
    if settings.stdout_metrics {
        let reader = PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default()).build();
        return Ok(SdkMeterProvider::builder()
            .with_resource(resource)
            .with_reader(reader)
            .build());
    }

    let tls = TlsMaterial::from_pem(&settings.ca, &settings.cert, &settings.key)?;
    let exporter = MetricExporter::builder()
        .with_http()
        .with_http_client(mtls_client(&tls)?)
        .with_endpoint(signal_endpoint(&settings.collector_url, "https", METRICS_PATH))
        .build()
        .map_err(|err| TelemetryError::Exporter(err.to_string()))?;

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(PeriodicReader::builder(exporter).build())
        .build())
}

fn mtls_client(tls: &TlsMaterial) -> Result<reqwest::blocking::Client, TelemetryError> {
    let ca = reqwest::Certificate::from_pem(tls.ca_pem().as_bytes())
        .map_err(|err| TelemetryError::Client(err.to_string()))?;
    let identity = reqwest::Identity::from_pem(&tls.identity_pem())
        .map_err(|err| TelemetryError::Client(err.to_string()))?;

    reqwest::blocking::Client::builder()
        .use_rustls_tls()
        .add_root_certificate(ca)
        .identity(identity)
        .build()
        .map_err(|err| TelemetryError::Client(err.to_string()))
}

/// Collector URLs may be given as bare `host:port`; the scheme defaults per
/// signal and the signal path is appended.
pub fn signal_endpoint(collector_url: &str, default_scheme: &str, path: &str) -> String {
    let base = collector_url.trim().trim_end_matches('/');
    if base.contains("://") {
        format!("{base}{path}")
    } else {
        format!("{default_scheme}://{base}{path}")
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidLogFilter(String),
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
    #[error("telemetry TLS material: {0}")]
    Tls(#[from] CertError),
    #[error("failed to build collector client: {0}")]
    Client(String),
    #[error("failed to build exporter: {0}")]
    Exporter(String),
    #[error("telemetry setup task failed: {0}")]
    Join(String),
    #[error("error shutting down the telemetry pipeline: {0}")]
    Shutdown(String),
}
