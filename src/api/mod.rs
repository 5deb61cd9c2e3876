// Service lifecycle and tracing setup.

pub mod engine_api;
pub mod telemetry;
