//! Domain-level building blocks for the consumer: environment-driven
//! configuration, TLS material, backoff helpers, and the health and telemetry
//! services the worker drives.

pub mod backoff;
pub mod certs;
pub mod config;
pub mod env;
pub mod services;

pub use config::{load, AppConfig, ConfigError, ConfigProvider};
