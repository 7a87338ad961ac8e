//! Guardrail: a telemetry contract validator, drift/anomaly detection
//! pipeline, and alert manager for e-commerce product feeds.

pub mod alerts;
pub mod anomaly;
pub mod api;
pub mod config;
pub mod drift;
pub mod kalman;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod validator;
pub mod violations;

pub use api::AppState;
pub use config::GuardrailConfig;
