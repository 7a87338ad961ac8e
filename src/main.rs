//! Guardrail server entrypoint: loads configuration, wires the four
//! detection engines into shared state, and serves the HTTP surface.

mod alerts;
mod anomaly;
mod api;
mod config;
mod drift;
mod kalman;
mod metrics;
mod middleware;
mod models;
mod validator;
mod violations;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::alerts::AlertManager;
use crate::anomaly::AnomalyDetector;
use crate::api::AppState;
use crate::config::GuardrailConfig;
use crate::drift::DriftDetector;
use crate::kalman::ConversionKalmanFilter;
use crate::validator::ContractValidator;
use crate::violations::ViolationLogger;

#[derive(Parser, Debug)]
#[command(name = "guardrail", about = "E-commerce telemetry contract and drift guardrail")]
struct Cli {
    /// Path to a TOML config file. Defaults to config/default.toml if present.
    #[arg(long, env = "GUARDRAIL_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address override, takes precedence over config and GUARDRAIL_BIND_ADDR.
    #[arg(long, env = "GUARDRAIL_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    let cli = Cli::parse();
    init_tracing();

    let config_path = cli.config.or_else(default_config_path);
    let mut config = GuardrailConfig::load(config_path.as_deref()).context("loading configuration")?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    let config = Arc::new(config);

    info!(bind_addr = %config.bind_addr, "starting guardrail");

    let prometheus_handle = Arc::new(metrics::install_recorder().context("installing Prometheus recorder")?);

    let validator = Arc::new(ContractValidator::new(&config));
    let drift_detector = Arc::new(DriftDetector::new(&config));
    let kalman_filter = Arc::new(ConversionKalmanFilter::new(config.kalman.clone()));
    let anomaly_detector = Arc::new(AnomalyDetector::new(config.anomaly.clone()));
    let alert_manager = Arc::new(AlertManager::new(config.alert_ttl_seconds));
    let violation_logger = Arc::new(ViolationLogger::new(&config.violations_file));

    let state = AppState {
        config: config.clone(),
        validator,
        drift_detector: drift_detector.clone(),
        kalman_filter,
        anomaly_detector,
        alert_manager,
        violation_logger,
        prometheus_handle,
        processed_count: Arc::new(AtomicU64::new(0)),
    };

    // Records-per-second is sampled on a fixed schedule, decoupled from the
    // request path itself (rather than piggybacking on ingest calls as the
    // original source does) so it reflects real calendar-time throughput.
    {
        let processed_count = state.processed_count.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            let mut last_total = 0u64;
            loop {
                ticker.tick().await;
                let total = processed_count.load(Ordering::Relaxed);
                let rate = (total.saturating_sub(last_total)) as f64 / 10.0;
                last_total = total;
                metrics::set_records_per_second(rate);
            }
        });
    }

    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(crate::middleware::logging::request_logging_simple));

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!("guardrail listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    let candidate = PathBuf::from("config/default.toml");
    candidate.exists().then_some(candidate)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "guardrail_backend=info,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    let _ = dotenv();
}
