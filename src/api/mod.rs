//! HTTP API for health checks, operation status, and monitoring

use crate::bridge::{BalanceReport, BridgeOperation, BridgedToken, L2TransactionStatus, OperationResult};
use crate::chain::ChainRole;
use crate::config::ApiConfig;
use crate::coordination::{BridgeEngine, CancelSignal};
use crate::error::{BridgeError, BridgeResult};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::H256;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BridgeEngine>,
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, engine: Arc<BridgeEngine>) -> BridgeResult<()> {
    let app = router(AppState { engine });

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| BridgeError::Config(format!("cannot bind API address {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| BridgeError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/operations", get(list_operations))
        .route("/operations/:id", get(get_operation))
        .route("/operations/:id/cancel", post(cancel_operation))
        .route("/l2/transactions/:hash", get(l2_transaction_status))
        .route("/balances/:token", get(balances))
        .route("/metrics", get(crate::metrics::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - both chain endpoints answer
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let ctx = state.engine.context();
    let mut details = Vec::with_capacity(2);
    for client in [&ctx.l1, &ctx.l2] {
        let endpoint = client.endpoint();
        let healthy = client.gas_price().await.is_ok();
        crate::metrics::record_chain_health(endpoint.role, healthy);
        details.push(ChainHealth {
            role: endpoint.role,
            chain_id: endpoint.chain_id,
            healthy,
        });
    }

    let ready = details.iter().all(|c| c.healthy);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            running_operations: state.engine.running(),
            chains: details,
        }),
    )
}

async fn list_operations(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.operations())
}

async fn get_operation(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    if let Some(op) = state.engine.get(id) {
        return Json(OperationView::InFlight(op)).into_response();
    }
    match state.engine.result(id) {
        Some(result) => Json(OperationView::Finished(result)).into_response(),
        None => not_found(format!("operation {} not found", id)),
    }
}

async fn cancel_operation(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    if state.engine.cancel(id) {
        info!(operation_id = %id, "Cancellation requested over API");
        StatusCode::ACCEPTED.into_response()
    } else {
        not_found(format!("operation {} is not running", id))
    }
}

async fn l2_transaction_status(State(state): State<AppState>, Path(hash): Path<H256>) -> Response {
    let ctx = state.engine.context();
    let poller = ctx.status_poller(CancelSignal::never());
    match L2TransactionStatus::inspect(ctx, &poller, hash).await {
        Ok(Some(status)) => Json(status).into_response(),
        Ok(None) => not_found(format!("transaction {:?} not known to L2", hash)),
        Err(e) => error_response(&e),
    }
}

async fn balances(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    let ctx = state.engine.context();
    let token = if token.eq_ignore_ascii_case("base") {
        BridgedToken::Base
    } else {
        match ctx.tokens.get(&token) {
            Some(pair) => BridgedToken::Erc20(pair),
            None => return not_found(format!("unknown token {}", token)),
        }
    };

    let poller = ctx.status_poller(CancelSignal::never());
    match BalanceReport::snapshot(ctx, &poller, state.engine.owner(), &token).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(&e),
    }
}

fn not_found(message: String) -> Response {
    (StatusCode::NOT_FOUND, Json(ErrorResponse { error: message })).into_response()
}

fn error_response(err: &BridgeError) -> Response {
    let status = if err.is_retryable() {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    running_operations: usize,
    chains: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    role: ChainRole,
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
#[serde(tag = "status", content = "operation", rename_all = "snake_case")]
enum OperationView {
    InFlight(BridgeOperation),
    Finished(OperationResult),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OperationRequest, RequestKind};
    use crate::state::OperationStore;
    use crate::testing::SimBridge;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(sim: &SimBridge, dir: &tempfile::TempDir) -> (Router, Arc<BridgeEngine>) {
        let store = Arc::new(OperationStore::open(dir.path().join("ops.json")).unwrap());
        let engine = Arc::new(BridgeEngine::new(sim.context(), sim.credential(), store));
        (
            router(AppState {
                engine: engine.clone(),
            }),
            engine,
        )
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let sim = SimBridge::eth_based();
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&sim, &dir);

        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_ready_reports_both_chains() {
        let sim = SimBridge::eth_based();
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&sim, &dir);

        let (status, body) = get_json(app, "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chains"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_operation_is_404() {
        let sim = SimBridge::eth_based();
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&sim, &dir);

        let (status, _) = get_json(app, &format!("/operations/{}", Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_operation_reports_result() {
        let sim = SimBridge::eth_based();
        let dir = tempfile::tempdir().unwrap();
        let (app, engine) = app(&sim, &dir);

        let op = engine
            .plan(&OperationRequest {
                kind: RequestKind::Deposit,
                token: "base".to_string(),
                amount: "1000".to_string(),
                recipient: None,
                l2_tx_hash: None,
            })
            .unwrap();
        let id = op.id;
        engine.submit(op).await.unwrap();

        let (status, body) = get_json(app.clone(), &format!("/operations/{}", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "finished");
        assert_eq!(body["operation"]["final_state"], "completed");

        let (_, list) = get_json(app, "/operations").await;
        assert!(list.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_l2_transaction_is_404() {
        let sim = SimBridge::eth_based();
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&sim, &dir);

        let uri = format!("/l2/transactions/{:?}", H256::repeat_byte(0x42));
        let (status, _) = get_json(app, &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let sim = SimBridge::eth_based();
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&sim, &dir);
        crate::metrics::record_approval(true);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("zkbridge_approvals_total"));
    }
}
