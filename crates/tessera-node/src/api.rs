//! HTTP API for the Tessera node.
//!
//! Clients submit opaque transactions and query committed state. Submission
//! blocks until the ordering service has taken the transaction; it does not
//! wait for the transaction to be committed.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tessera_consensus::{BridgeError, SubmissionSender};
use tessera_state::{BlockRecord, SharedState};
use tessera_types::{Account, Address, Receipt, StateHash, Transaction, TransactionId};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::observability::{metrics_middleware, METRICS};

/// Diagnostic info of the ordering service behind the node.
pub type EngineInfo = Arc<dyn Fn() -> BTreeMap<String, String> + Send + Sync>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Committed state, read by query handlers.
    pub state: SharedState,
    /// Producer side of the submission queue.
    pub submitter: SubmissionSender,
    /// Ordering service info for `/info`.
    pub engine_info: EngineInfo,
}

impl AppState {
    /// Creates handler state.
    pub fn new(state: SharedState, submitter: SubmissionSender, engine_info: EngineInfo) -> Self {
        Self {
            state,
            submitter,
            engine_info,
        }
    }
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("ordering service unavailable")]
    Unavailable,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::QueueClosed | BridgeError::SubmissionTaken => ApiError::Unavailable,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Response to a transaction submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Hex-encoded transaction id.
    pub tx_hash: TransactionId,
}

/// An account as returned by the API.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub address: Address,
    pub balance: u64,
    pub nonce: u64,
}

impl AccountResponse {
    fn new(address: Address, account: Account) -> Self {
        Self {
            address,
            balance: account.balance,
            nonce: account.nonce,
        }
    }
}

/// Node status.
#[derive(Debug, Serialize, Deserialize)]
pub struct InfoResponse {
    pub height: u64,
    pub state_hash: StateHash,
    pub engine: BTreeMap<String, String>,
}

/// Creates the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/info", get(info))
        // Submission
        .route("/tx", post(submit_tx))
        .route("/rawtx", post(submit_tx))
        // Queries
        .route("/tx/{tx_hash}", get(get_receipt))
        .route("/account/{address}", get(get_account))
        .route("/accounts", get(list_accounts))
        .route("/block/{index}", get(get_block))
        .layer(axum::middleware::from_fn(metrics_middleware))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Browsers may call the API from any origin; the origin is echoed back.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ORIGIN,
        ])
}

/// Binds the API listener.
pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "API listening");
    Ok(listener)
}

/// Serves the API on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics() -> Result<Response, ApiError> {
    let body = METRICS
        .encode()
        .map_err(|e| ApiError::Internal(format!("metrics encoding failed: {e}")))?;
    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/openmetrics-text; version=1.0.0; charset=utf-8"),
        )],
        body,
    )
        .into_response())
}

async fn info(State(app): State<AppState>) -> Json<InfoResponse> {
    let (height, state_hash) = app.state.read(|s| (s.height(), s.state_hash()));
    Json(InfoResponse {
        height,
        state_hash,
        engine: (app.engine_info)(),
    })
}

async fn submit_tx(
    State(app): State<AppState>,
    body: Bytes,
) -> Result<Json<SubmitResponse>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty transaction".into()));
    }
    let tx = Transaction::new(body);
    let tx_hash = tx.id();

    app.submitter.submit(tx).await?;
    METRICS.transactions_submitted.inc();
    tracing::debug!(%tx_hash, "transaction taken by ordering service");

    Ok(Json(SubmitResponse { tx_hash }))
}

async fn get_receipt(
    State(app): State<AppState>,
    Path(tx_hash): Path<String>,
) -> Result<Json<Receipt>, ApiError> {
    let id = TransactionId::from_hex(&tx_hash)
        .map_err(|e| ApiError::BadRequest(format!("invalid transaction hash: {e}")))?;
    app.state
        .read(|s| s.receipt(&id).cloned())
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("transaction {id}")))
}

async fn get_account(
    State(app): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<AccountResponse>, ApiError> {
    let address = address
        .parse::<Address>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let account = app.state.read(|s| s.account(&address));
    Ok(Json(AccountResponse::new(address, account)))
}

async fn list_accounts(State(app): State<AppState>) -> Json<Vec<AccountResponse>> {
    Json(app.state.read(|s| {
        s.accounts()
            .iter()
            .map(|(address, account)| AccountResponse::new(*address, *account))
            .collect::<Vec<_>>()
    }))
}

async fn get_block(
    State(app): State<AppState>,
    Path(index): Path<String>,
) -> Result<Json<BlockRecord>, ApiError> {
    let index: u64 = index
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid block index: {index}")))?;
    app.state
        .read(|s| s.block(index).cloned())
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("block {index}")))
}
