//! Shared runtime services: gRPC health reporting and telemetry wiring.

pub mod health;
pub mod telemetry;

pub use health::*;
pub use telemetry::*;
