//! HTTP API for health checks, intent lookups and the committee signing endpoint

use crate::config::ApiConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::metrics;
use crate::multisig::{SignRequest, SignResponse, SignerService};
use crate::state::{Ledger, LedgerStats};
use crate::types::H256;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn Ledger>,
    pub signer: Arc<SignerService>,
    pub started: Instant,
}

impl AppState {
    pub fn new(ledger: Arc<dyn Ledger>, signer: Arc<SignerService>) -> Self {
        Self {
            ledger,
            signer,
            started: Instant::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/stats", get(get_stats))
        .route("/mints/:id", get(get_mint))
        .route("/unlocks/:hash", get(get_unlock))
        .route("/sign", post(sign))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server until `shutdown` fires
pub async fn run_server(
    config: &ApiConfig,
    state: AppState,
    shutdown: CancellationToken,
) -> RelayerResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Config(format!("bind api on {addr}: {e}")))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| RelayerError::Internal(format!("api server: {e}")))
}

/// Health check endpoint - basic liveness
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
        signer: format!("{:#x}", state.signer.signer_id()),
    })
}

/// Readiness check - the ledger must answer
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.ledger.health_check().await.is_ok();
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready: database,
            database,
        }),
    )
}

async fn get_stats(State(state): State<AppState>) -> Response {
    match state.ledger.stats().await {
        Ok(stats) => Json(StatsResponse {
            ledger: stats,
            signatures_served: state.signer.signed_count(),
        })
        .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn get_mint(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.ledger.get_mint(&id).await {
        Ok(Some(mint)) => Json(mint).into_response(),
        Ok(None) => not_found(format!("mint {id}")),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn get_unlock(State(state): State<AppState>, Path(hash): Path<String>) -> Response {
    let Ok(burn_hash) = hash.parse::<H256>() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            &RelayerError::InvalidPayload(format!("not a transaction hash: {hash}")),
        );
    };
    match state.ledger.get_unlock(&burn_hash).await {
        Ok(Some(unlock)) => Json(unlock).into_response(),
        Ok(None) => not_found(format!("unlock {hash}")),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

/// Co-sign a transaction for the coordinator of a signing round
async fn sign(State(state): State<AppState>, Json(request): Json<SignRequest>) -> Response {
    match state.signer.handle(&request) {
        Ok(response) => Json::<SignResponse>(response).into_response(),
        Err(e) => {
            warn!(round = %request.round_id, error = %e, "Refused signing request");
            error_response(StatusCode::BAD_REQUEST, &e)
        }
    }
}

fn not_found(what: String) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "not_found".to_string(),
            message: format!("{what} not found"),
        }),
    )
        .into_response()
}

fn error_response(status: StatusCode, error: &RelayerError) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.kind().to_string(),
            message: error.to_string(),
        }),
    )
        .into_response()
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    signer: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
}

#[derive(Serialize)]
struct StatsResponse {
    ledger: LedgerStats,
    signatures_served: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multisig::recover_signer;
    use crate::state::MemoryLedger;
    use crate::testing;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn state() -> (AppState, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new());
        let signer = Arc::new(SignerService::new(Arc::new(testing::signer(1))));
        (AppState::new(ledger.clone(), signer), ledger)
    }

    async fn call(state: AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_sign(request: &SignRequest) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/sign")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(request).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_signer() {
        let (state, _) = state();
        let (status, body) = call(state, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(
            body["signer"],
            format!("{:#x}", testing::signer(1).id())
        );
    }

    #[tokio::test]
    async fn ready_with_healthy_ledger() {
        let (state, _) = state();
        let (status, body) = call(state, get("/ready")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
    }

    #[tokio::test]
    async fn mint_lookup() {
        let (state, ledger) = state();
        let (event, intent) = testing::lock_event("0xabc", 42);
        ledger.create_lock_and_mint(&event, &intent).await.unwrap();

        let (status, body) = call(state.clone(), get("/mints/0xabc")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "todo");
        assert_eq!(body["recipient"], testing::CKB_RECIPIENT);

        let (status, body) = call(state.clone(), get("/mints/0xmissing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, body) = call(state, get("/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ledger"]["mints"]["todo"], 1);
    }

    #[tokio::test]
    async fn unlock_lookup_rejects_malformed_hash() {
        let (state, ledger) = state();
        let (event, intent) = testing::burn_event(5, crate::types::Chain::Eth);
        ledger.create_burn_and_unlock(&event, &intent).await.unwrap();

        let uri = format!("/unlocks/{:#x}", event.ckb_tx_hash);
        let (status, body) = call(state.clone(), get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "todo");

        let (status, _) = call(state, get("/unlocks/zz")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sign_endpoint_cosigns_valid_requests() {
        let (state, _) = state();
        let tx = testing::balanced_tx();
        let digest = tx.signing_digest();
        let request = SignRequest {
            round_id: Uuid::new_v4(),
            digest,
            tx,
        };

        let (status, body) = call(state.clone(), post_sign(&request)).await;
        assert_eq!(status, StatusCode::OK);
        let response: SignResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.signer_id, testing::signer(1).id());
        assert_eq!(
            recover_signer(&digest, &response.signature).unwrap(),
            response.signer_id
        );

        let forged = SignRequest {
            digest: H256::repeat_byte(1),
            ..request
        };
        let (status, body) = call(state, post_sign(&forged)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "signing");
    }
}
