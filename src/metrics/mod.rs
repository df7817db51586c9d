//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Operation lifecycle (started, completed, failed, state transitions)
//! - Transactions submitted per chain
//! - Approvals sent vs skipped and the last fee quote
//! - Poll attempts and transport retries
//! - Chain endpoint health

use crate::bridge::{OperationKind, OperationState};
use crate::chain::ChainRole;
use crate::error::{BridgeError, BridgeResult, ErrorKind};

use axum::{http::StatusCode, routing::get, Router};
use ethers::types::U256;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Operation metrics
    pub static ref OPERATIONS_STARTED: CounterVec = register_counter_vec!(
        "zkbridge_operations_started_total",
        "Total operations started by kind",
        &["kind"]
    ).unwrap();

    pub static ref OPERATIONS_COMPLETED: CounterVec = register_counter_vec!(
        "zkbridge_operations_completed_total",
        "Total operations that reached their final success state",
        &["kind"]
    ).unwrap();

    pub static ref OPERATIONS_FAILED: CounterVec = register_counter_vec!(
        "zkbridge_operations_failed_total",
        "Total operations failed by kind and error",
        &["kind", "error"]
    ).unwrap();

    pub static ref OPERATIONS_IN_FLIGHT: GaugeVec = register_gauge_vec!(
        "zkbridge_operations_in_flight",
        "Operations currently being driven",
        &["kind"]
    ).unwrap();

    pub static ref STATE_TRANSITIONS: CounterVec = register_counter_vec!(
        "zkbridge_state_transitions_total",
        "Operation state transitions",
        &["kind", "state"]
    ).unwrap();

    pub static ref OPERATION_LATENCY: HistogramVec = register_histogram_vec!(
        "zkbridge_operation_duration_seconds",
        "Time from start to terminal state",
        &["kind"],
        vec![10.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 10800.0, 43200.0]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "zkbridge_transactions_submitted_total",
        "Bridge transactions submitted",
        &["chain", "kind"]
    ).unwrap();

    pub static ref APPROVALS: CounterVec = register_counter_vec!(
        "zkbridge_approvals_total",
        "Allowance checks by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref LAST_FEE_QUOTE: Gauge = register_gauge!(
        "zkbridge_last_fee_quote",
        "Last quoted L2 execution fee in the gas token's smallest unit"
    ).unwrap();

    // Polling metrics
    pub static ref POLL_ATTEMPTS: CounterVec = register_counter_vec!(
        "zkbridge_poll_attempts_total",
        "Status poll evaluations",
        &["what"]
    ).unwrap();

    pub static ref TRANSPORT_RETRIES: CounterVec = register_counter_vec!(
        "zkbridge_transport_retries_total",
        "Poll evaluations retried after a transport failure",
        &["what"]
    ).unwrap();

    // Health metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "zkbridge_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain"]
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

    pub async fn run(&self) -> BridgeResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| BridgeError::Config(format!("cannot bind metrics port: {}", e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| BridgeError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

/// Text exposition of the default registry
pub fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

pub(crate) async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))
}

// Helper functions to record metrics

pub fn record_operation_started(kind: OperationKind) {
    OPERATIONS_STARTED
        .with_label_values(&[&kind.to_string()])
        .inc();
    OPERATIONS_IN_FLIGHT
        .with_label_values(&[&kind.to_string()])
        .inc();
}

pub fn record_operation_completed(kind: OperationKind, duration_secs: f64) {
    OPERATIONS_COMPLETED
        .with_label_values(&[&kind.to_string()])
        .inc();
    operation_ended(kind, duration_secs);
}

pub fn record_operation_failed(kind: OperationKind, error: Option<ErrorKind>, duration_secs: f64) {
    let error = error.map_or_else(|| "unknown".to_string(), |e| e.to_string());
    OPERATIONS_FAILED
        .with_label_values(&[&kind.to_string(), &error])
        .inc();
    operation_ended(kind, duration_secs);
}

/// An operation left for a later resume
pub fn record_operation_suspended(kind: OperationKind) {
    OPERATIONS_IN_FLIGHT
        .with_label_values(&[&kind.to_string()])
        .dec();
}

fn operation_ended(kind: OperationKind, duration_secs: f64) {
    OPERATIONS_IN_FLIGHT
        .with_label_values(&[&kind.to_string()])
        .dec();
    OPERATION_LATENCY
        .with_label_values(&[&kind.to_string()])
        .observe(duration_secs);
}

pub fn record_transition(kind: OperationKind, state: OperationState) {
    STATE_TRANSITIONS
        .with_label_values(&[&kind.to_string(), &state.to_string()])
        .inc();
}

pub fn record_submission(chain: ChainRole, kind: OperationKind) {
    TX_SUBMITTED
        .with_label_values(&[&chain.to_string(), &kind.to_string()])
        .inc();
}

pub fn record_approval(sent: bool) {
    APPROVALS
        .with_label_values(&[if sent { "sent" } else { "skipped" }])
        .inc();
}

pub fn record_fee_quote(fee: U256) {
    // f64 gauge: very large fees lose precision
    let fee = fee.to_string().parse::<f64>().unwrap_or(f64::MAX);
    LAST_FEE_QUOTE.set(fee);
}

pub fn record_poll(what: &str) {
    POLL_ATTEMPTS.with_label_values(&[what]).inc();
}

pub fn record_transport_retry(what: &str) {
    TRANSPORT_RETRIES.with_label_values(&[what]).inc();
}

pub fn record_chain_health(chain: ChainRole, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}
