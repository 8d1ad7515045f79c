//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Scan progress per watcher
//! - Detected bridge events
//! - Transaction submission and commitment
//! - Signing rounds and batch outcomes

use crate::error::{RelayerError, RelayerResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

lazy_static! {
    pub static ref SCAN_HEIGHT: GaugeVec = register_gauge_vec!(
        "bridge_scan_height",
        "Last block height committed by each watcher",
        &["watcher"]
    ).unwrap();

    pub static ref EVENTS_DETECTED: CounterVec = register_counter_vec!(
        "bridge_events_detected_total",
        "Bridge events detected by kind",
        &["watcher", "kind"]
    ).unwrap();

    pub static ref TASK_ERRORS: CounterVec = register_counter_vec!(
        "bridge_task_errors_total",
        "Failed task iterations by error kind",
        &["task", "kind"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "bridge_transactions_submitted_total",
        "Total transactions broadcast",
        &["chain"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "bridge_transactions_failed_total",
        "Total broadcasts that failed",
        &["chain", "kind"]
    ).unwrap();

    pub static ref TX_OUTCOMES: CounterVec = register_counter_vec!(
        "bridge_transaction_outcomes_total",
        "Commitment outcomes of broadcast transactions",
        &["chain", "outcome"]
    ).unwrap();

    pub static ref SIGNATURE_ROUNDS: CounterVec = register_counter_vec!(
        "bridge_signature_rounds_total",
        "Multisig signing rounds by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref ASSETS_REGISTERED: CounterVec = register_counter_vec!(
        "bridge_assets_registered_total",
        "Bridge cells created for new assets",
        &[]
    ).unwrap();

    pub static ref BATCH_INTENTS: CounterVec = register_counter_vec!(
        "bridge_batch_intents_total",
        "Intents processed by direction and final status",
        &["direction", "status"]
    ).unwrap();

    pub static ref BATCH_LATENCY: HistogramVec = register_histogram_vec!(
        "bridge_batch_latency_seconds",
        "Time from batch pickup to settlement",
        &["direction"],
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Config(format!("bind metrics on {addr}: {e}")))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| RelayerError::Internal(format!("metrics server: {e}")))
    }
}

pub async fn metrics_handler() -> Result<String, StatusCode> {
    gather().map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Text exposition of every registered metric
pub fn gather() -> RelayerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| RelayerError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| RelayerError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_block_scanned(watcher: &str, height: u64) {
    SCAN_HEIGHT.with_label_values(&[watcher]).set(height as f64);
}

pub fn record_event(watcher: &str, kind: &str) {
    EVENTS_DETECTED.with_label_values(&[watcher, kind]).inc();
}

pub fn record_task_error(task: &str, kind: &str) {
    TASK_ERRORS.with_label_values(&[task, kind]).inc();
}

pub fn record_tx_submitted(chain: &str) {
    TX_SUBMITTED.with_label_values(&[chain]).inc();
}

pub fn record_tx_failed(chain: &str, kind: &str) {
    TX_FAILED.with_label_values(&[chain, kind]).inc();
}

pub fn record_tx_outcome(chain: &str, outcome: &str) {
    TX_OUTCOMES.with_label_values(&[chain, outcome]).inc();
}

pub fn record_signature_round(outcome: &str) {
    SIGNATURE_ROUNDS.with_label_values(&[outcome]).inc();
}

pub fn record_assets_registered(count: usize) {
    ASSETS_REGISTERED.with_label_values(&[]).inc_by(count as f64);
}

pub fn record_batch(direction: &str, status: &str, intents: usize) {
    BATCH_INTENTS
        .with_label_values(&[direction, status])
        .inc_by(intents as f64);
}

pub fn record_batch_latency(direction: &str, latency_secs: f64) {
    BATCH_LATENCY
        .with_label_values(&[direction])
        .observe(latency_secs);
}
