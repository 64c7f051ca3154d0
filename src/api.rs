use crate::error::Error;
use crate::ledger::{Block, HistoryEntry, MineOutcome, ResourceLedger};
use crate::transaction::{Transaction, TransactionRequest};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub type SharedLedger = Arc<Mutex<ResourceLedger>>;

pub struct AppState {
    pub ledger: SharedLedger,
}

pub enum ApiError {
    Validation(String),
    Internal(Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(e) => {
                error!("Ledger request failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Internal(err)
    }
}

pub fn router(ledger: SharedLedger) -> Router {
    let state = Arc::new(AppState { ledger });

    Router::new()
        .route("/api/health", get(health))
        .route("/api/ledger/transactions", post(add_transaction))
        .route("/api/ledger/mine", post(mine_block))
        .route("/api/ledger/chain", get(get_chain))
        .route("/api/ledger/pending", get(get_pending))
        .route(
            "/api/ledger/resources/:resource_id/history",
            get(get_resource_history),
        )
        .route("/api/ledger/verify", get(verify_chain))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_api_server(
    address: SocketAddr,
    ledger: SharedLedger,
) -> crate::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("API server running on http://{}", address);
    axum::serve(listener, router(ledger)).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "operational", "version": env!("CARGO_PKG_VERSION") }))
}

async fn add_transaction(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<TransactionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    let invalid = payload.invalid_fields();
    let accepted = state.ledger.lock().await.add_transaction(payload);
    if accepted {
        Ok((StatusCode::CREATED, Json(json!({ "status": "accepted" }))))
    } else {
        Err(ApiError::Validation(format!(
            "Invalid transaction fields: {}",
            invalid.join(", ")
        )))
    }
}

async fn mine_block(State(state): State<Arc<AppState>>) -> Result<Json<MineOutcome>, ApiError> {
    let outcome = state.ledger.lock().await.mine_block()?;
    Ok(Json(outcome))
}

async fn get_chain(State(state): State<Arc<AppState>>) -> Json<Vec<Block>> {
    let chain = state.ledger.lock().await.chain().to_vec();
    Json(chain)
}

async fn get_pending(State(state): State<Arc<AppState>>) -> Json<Vec<Transaction>> {
    let pending = state.ledger.lock().await.pending_transactions().to_vec();
    Json(pending)
}

async fn get_resource_history(
    State(state): State<Arc<AppState>>,
    Path(resource_id): Path<String>,
) -> Json<Vec<HistoryEntry>> {
    Json(state.ledger.lock().await.get_resource_history(&resource_id))
}

async fn verify_chain(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let ledger = state.ledger.lock().await;
    Json(json!({ "valid": ledger.verify_chain(), "length": ledger.len() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn shared_ledger() -> SharedLedger {
        Arc::new(Mutex::new(ResourceLedger::new().unwrap()))
    }

    async fn send(
        ledger: &SharedLedger,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        dispatch(ledger, request).await
    }

    async fn dispatch(ledger: &SharedLedger, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(ledger.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let ledger = shared_ledger();
        let (status, body) = send(&ledger, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "operational");
    }

    #[tokio::test]
    async fn test_submit_mine_and_verify() {
        let ledger = shared_ledger();
        let tx = json!({
            "resource": "oxygen",
            "amount": 10,
            "source": "tank_a",
            "destination": "hab_1",
        });
        let (status, body) = send(&ledger, "POST", "/api/ledger/transactions", Some(tx)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "accepted");

        let (_, pending) = send(&ledger, "GET", "/api/ledger/pending", None).await;
        assert_eq!(pending.as_array().unwrap().len(), 1);

        let (status, body) = send(&ledger, "POST", "/api/ledger/mine", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["transactions_count"], 1);
        let block_hash = body["block_hash"].clone();

        let (_, body) = send(&ledger, "POST", "/api/ledger/mine", None).await;
        assert_eq!(body, json!({ "status": "no_transactions" }));

        let (_, chain) = send(&ledger, "GET", "/api/ledger/chain", None).await;
        assert_eq!(chain.as_array().unwrap().len(), 2);
        assert_eq!(chain[1]["hash"], block_hash);

        let (_, history) =
            send(&ledger, "GET", "/api/ledger/resources/oxygen/history", None).await;
        assert_eq!(history.as_array().unwrap().len(), 1);
        assert_eq!(history[0]["amount"], 10.0);
        assert_eq!(history[0]["block_hash"], block_hash);

        let (_, verify) = send(&ledger, "GET", "/api/ledger/verify", None).await;
        assert_eq!(verify, json!({ "valid": true, "length": 2 }));
    }

    #[tokio::test]
    async fn test_missing_fields_is_bad_request() {
        let ledger = shared_ledger();
        let tx = json!({ "resource": "water", "amount": 5 });
        let (status, body) = send(&ledger, "POST", "/api/ledger/transactions", Some(tx)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid transaction fields: source, destination");
        assert!(ledger.lock().await.pending_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_resource_history_is_empty() {
        let ledger = shared_ledger();
        let (status, history) =
            send(&ledger, "GET", "/api/ledger/resources/food/history", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history, json!([]));
    }

    #[tokio::test]
    async fn test_malformed_body_uses_error_shape() {
        let ledger = shared_ledger();
        let tx = json!({
            "resource": "oxygen",
            "amount": "10",
            "source": "tank_a",
            "destination": "hab_1",
        });
        let (status, body) = send(&ledger, "POST", "/api/ledger/transactions", Some(tx)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let request = Request::builder()
            .method("POST")
            .uri("/api/ledger/transactions")
            .header("content-type", "application/json")
            .body(Body::from("{ not json"))
            .unwrap();
        let (status, body) = dispatch(&ledger, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let request = Request::builder()
            .method("POST")
            .uri("/api/ledger/transactions")
            .body(Body::from("resource=oxygen"))
            .unwrap();
        let (status, body) = dispatch(&ledger, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        assert!(ledger.lock().await.pending_transactions().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submit_and_mine_loses_nothing() {
        const SUBMISSIONS: usize = 64;
        let ledger = shared_ledger();

        let mut tasks = Vec::new();
        for i in 0..SUBMISSIONS {
            let submit_ledger = ledger.clone();
            tasks.push(tokio::spawn(async move {
                let tx = json!({
                    "resource": "water",
                    "amount": i,
                    "source": format!("tank_{}", i),
                    "destination": "hab_1",
                });
                let (status, _) =
                    send(&submit_ledger, "POST", "/api/ledger/transactions", Some(tx)).await;
                assert_eq!(status, StatusCode::CREATED);
            }));
            if i % 4 == 0 {
                let ledger = ledger.clone();
                tasks.push(tokio::spawn(async move {
                    let (status, _) = send(&ledger, "POST", "/api/ledger/mine", None).await;
                    assert_eq!(status, StatusCode::OK);
                }));
            }
        }
        for task in tasks {
            task.await.unwrap();
        }

        let ledger = ledger.lock().await;
        let mut sources: Vec<String> = ledger
            .chain()
            .iter()
            .flat_map(|block| block.transactions.iter())
            .chain(ledger.pending_transactions().iter())
            .map(|tx| tx.source.clone())
            .collect();
        assert_eq!(sources.len(), SUBMISSIONS);
        sources.sort();
        sources.dedup();
        assert_eq!(sources.len(), SUBMISSIONS);
        assert!(ledger.chain().iter().skip(1).all(|block| !block.transactions.is_empty()));
        assert!(ledger.verify_chain());
    }
}
