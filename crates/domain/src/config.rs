//! Environment-driven configuration for the consumer binary.

use std::{env, sync::Arc};

use once_cell::sync::{Lazy, OnceCell};
use thiserror::Error;

use crate::env::{populate, EnvBinding, EnvKind, EnvSource, ProcessEnv};

pub const PRODUCTION: &str = "production";
pub const STAGING: &str = "staging";

/// Set to skip `.env` hydration (tests, containers with injected env).
pub const SKIP_DOTENV_VAR: &str = "COURIER_SKIP_DOTENV";

/// Read-only view of the process configuration.
pub trait ConfigProvider: Send + Sync {
    fn stage(&self) -> &str;
    fn app_name(&self) -> &str;
    fn consumer_ca(&self) -> &[u8];
    fn consumer_cert(&self) -> &[u8];
    fn consumer_cert_key(&self) -> &[u8];
    fn healthcheck_port(&self) -> u16;
    fn healthcheck_service_prefix(&self) -> &str;
    fn message_queue_client_ca(&self) -> &[u8];
    fn message_queue_client_cert(&self) -> &[u8];
    fn message_queue_client_cert_key(&self) -> &[u8];
    fn message_queue_group_id(&self) -> &str;
    fn message_queue_topics(&self) -> &[String];
    fn message_queue_url(&self) -> &str;
    fn otel_http_receiver_url(&self) -> &str;
    fn otel_stdout_exporter_enabled(&self) -> bool;

    /// Anything that is neither production nor staging.
    fn is_development(&self) -> bool {
        self.stage() != PRODUCTION && self.stage() != STAGING
    }
}

/// Process configuration populated from the environment. Fields are only
/// reachable through [`ConfigProvider`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    app_name: String,
    consumer_ca: String,
    consumer_cert: String,
    consumer_cert_key: String,
    healthcheck_port: u16,
    healthcheck_service_prefix: String,
    message_queue_client_ca: String,
    message_queue_client_cert: String,
    message_queue_client_cert_key: String,
    message_queue_group_id: String,
    message_queue_topics_raw: String,
    message_queue_url: String,
    otel_http_receiver_url: String,
    otel_stdout_exporter_raw: String,
    stage: String,

    message_queue_topics: Vec<String>,
    otel_stdout_exporter_enabled: bool,
}

static BINDINGS: Lazy<Vec<EnvBinding<AppConfig>>> = Lazy::new(|| {
    vec![
        text("APP_NAME", |c, v| c.app_name = v),
        text("CONSUMER_CA", |c, v| c.consumer_ca = v),
        text("CONSUMER_CRT", |c, v| c.consumer_cert = v),
        text("CONSUMER_KEY", |c, v| c.consumer_cert_key = v),
        EnvBinding::new(
            "HEALTHCHECK_PORT",
            EnvKind::U16,
            |c: &mut AppConfig, v: u16| c.healthcheck_port = v,
        ),
        text("HEALTHCHECK_SERVICE_PREFIX", |c, v| {
            c.healthcheck_service_prefix = v
        }),
        text("MESSAGE_QUEUE_CA", |c, v| c.message_queue_client_ca = v),
        text("MESSAGE_QUEUE_CRT", |c, v| c.message_queue_client_cert = v),
        text("MESSAGE_QUEUE_KEY", |c, v| c.message_queue_client_cert_key = v),
        text("MESSAGE_QUEUE_GROUP_ID", |c, v| c.message_queue_group_id = v),
        text("MESSAGE_QUEUE_TOPICS", |c, v| c.message_queue_topics_raw = v),
        text("MESSAGE_QUEUE_URL", |c, v| c.message_queue_url = v),
        text("OTEL_HTTP_RECEIVER_URL", |c, v| c.otel_http_receiver_url = v),
        text("OTEL_STDOUT_EXPORTER_ENABLED", |c, v| {
            c.otel_stdout_exporter_raw = v
        }),
        text("STAGE", |c, v| c.stage = v),
    ]
});

fn text(key: &'static str, set: fn(&mut AppConfig, String)) -> EnvBinding<AppConfig> {
    EnvBinding::new(key, EnvKind::Text, set)
}

static APP_CONFIG: OnceCell<Result<Arc<AppConfig>, ConfigError>> = OnceCell::new();

/// Loads the process configuration once. Every caller, concurrent or later,
/// gets the same result, including the same error.
pub fn load() -> Result<Arc<AppConfig>, ConfigError> {
    APP_CONFIG
        .get_or_init(|| AppConfig::load_from_env().map(Arc::new))
        .clone()
}

impl AppConfig {
    /// Hydrates `.env` (if present) and reads every required variable.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source<S>(source: &S) -> Result<Self, ConfigError>
    where
        S: EnvSource + ?Sized,
    {
        let mut config: Self = populate(source, BINDINGS.as_slice())?;
        config.message_queue_topics = split_topic_list(&config.message_queue_topics_raw);
        config.otel_stdout_exporter_enabled = config.otel_stdout_exporter_raw == "true";
        Ok(config)
    }

    /// Names of every variable the loader requires, in load order.
    pub fn required_vars() -> impl Iterator<Item = &'static str> {
        BINDINGS.iter().map(EnvBinding::key)
    }
}

/// Topic lists are comma-delimited, unlike the generic space-delimited list
/// coercion.
pub fn split_topic_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::to_owned).collect()
}

impl ConfigProvider for AppConfig {
    fn stage(&self) -> &str {
        &self.stage
    }

    fn app_name(&self) -> &str {
        &self.app_name
    }

    fn consumer_ca(&self) -> &[u8] {
        self.consumer_ca.as_bytes()
    }

    fn consumer_cert(&self) -> &[u8] {
        self.consumer_cert.as_bytes()
    }

    fn consumer_cert_key(&self) -> &[u8] {
        self.consumer_cert_key.as_bytes()
    }

    fn healthcheck_port(&self) -> u16 {
        self.healthcheck_port
    }

    fn healthcheck_service_prefix(&self) -> &str {
        &self.healthcheck_service_prefix
    }

    fn message_queue_client_ca(&self) -> &[u8] {
        self.message_queue_client_ca.as_bytes()
    }

    fn message_queue_client_cert(&self) -> &[u8] {
        self.message_queue_client_cert.as_bytes()
    }

    fn message_queue_client_cert_key(&self) -> &[u8] {
        self.message_queue_client_cert_key.as_bytes()
    }

    fn message_queue_group_id(&self) -> &str {
        &self.message_queue_group_id
    }

    fn message_queue_topics(&self) -> &[String] {
        &self.message_queue_topics
    }

    fn message_queue_url(&self) -> &str {
        &self.message_queue_url
    }

    fn otel_http_receiver_url(&self) -> &str {
        &self.otel_http_receiver_url
    }

    fn otel_stdout_exporter_enabled(&self) -> bool {
        self.otel_stdout_exporter_enabled
    }
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os(SKIP_DOTENV_VAR).is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv(err.to_string())),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unable to find environment variable named `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid value in `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("unsupported configuration type for `{key}`: {kind} value cannot populate `{target}`")]
    UnsupportedType {
        key: &'static str,
        kind: EnvKind,
        target: &'static str,
    },
    #[error("failed to load .env file: {0}")]
    Dotenv(String),
}
