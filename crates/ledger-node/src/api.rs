use crate::constants::ELECTION_SYSTEM;
use crate::reconcile::Trigger;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ledger_core::{
    store::{Checkpoint, CheckpointStore, PendingRecord, PendingStore, VoteKey, VoteRecord, VoteStore},
    tally::ElectionResults,
    Block, Chain, ChainExport, Payload, Transaction,
};
use ledger_storage::SledStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub chain: Arc<Chain>,
    pub store: Arc<SledStore>,
    pub trigger: Trigger,
}

pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, err.into().to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Run a sled call or a full-chain scan off the async workers.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize, Deserialize)]
pub struct Head {
    pub index: u64,
    pub hash: String,
    pub length: usize,
    pub difficulty: u32,
}

#[derive(Serialize, Deserialize)]
pub struct Validity {
    pub valid: bool,
    pub length: usize,
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct TxIn {
    pub sender: String,
    pub recipient: String,
    #[serde(default)]
    pub payload: Payload,
}

#[derive(Serialize, Deserialize)]
pub struct TxAccepted {
    pub id: String,
    pub next_index: u64,
}

#[derive(Deserialize)]
pub struct VoteIn {
    pub voter_id: String,
    pub election_id: String,
    pub candidate: String,
    pub candidate_id: String,
}

#[derive(Serialize, Deserialize)]
pub struct VoteQueued {
    pub pending_id: String,
}

#[derive(Serialize, Deserialize)]
pub struct Balance {
    pub address: String,
    pub balance: i64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(Health { status: "ok" }) }))
        .route("/chain", get(chain_snapshot))
        .route("/chain/head", get(head))
        .route("/chain/valid", get(validity))
        .route("/chain/export", get(export))
        .route("/pool", get(pool))
        .route("/checkpoint", get(checkpoint))
        .route("/transactions", post(add_transaction))
        .route("/votes", post(cast_vote))
        .route("/mine", post(mine))
        .route("/elections/{id}/results", get(election_results))
        .route("/elections/{id}/counts", get(vote_counts))
        .route("/balances/{address}", get(balance))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn chain_snapshot(State(state): State<AppState>) -> Json<Vec<Block>> {
    Json(state.chain.snapshot().iter().map(|b| Block::clone(b)).collect())
}

async fn head(State(state): State<AppState>) -> Json<Head> {
    let latest = state.chain.latest();
    Json(Head {
        index: latest.index,
        hash: latest.hash.clone(),
        length: state.chain.len(),
        difficulty: state.chain.difficulty(),
    })
}

async fn validity(State(state): State<AppState>) -> ApiResult<Json<Validity>> {
    let blocks = state.chain.snapshot();
    let validity = blocking(move || {
        let result = ledger_core::verify::verify_chain(&blocks);
        Ok(Validity {
            valid: result.is_ok(),
            length: blocks.len(),
            error: result.err().map(|e| e.to_string()),
        })
    })
    .await?;
    Ok(Json(validity))
}

async fn export(State(state): State<AppState>) -> Json<ChainExport> {
    Json(state.chain.to_export())
}

async fn pool(State(state): State<AppState>) -> Json<Vec<Transaction>> {
    Json(state.chain.pending())
}

async fn checkpoint(State(state): State<AppState>) -> ApiResult<Json<Checkpoint>> {
    let store = state.store.clone();
    let checkpoint = blocking(move || store.checkpoint()).await?;
    Ok(Json(checkpoint.unwrap_or_default()))
}

async fn add_transaction(
    State(state): State<AppState>,
    Json(tx): Json<TxIn>,
) -> (StatusCode, Json<TxAccepted>) {
    let tx = Transaction::new(tx.sender, tx.recipient, tx.payload);
    let id = tx.id.clone();
    let next_index = state.chain.submit(tx);
    (StatusCode::ACCEPTED, Json(TxAccepted { id, next_index }))
}

async fn cast_vote(
    State(state): State<AppState>,
    Json(vote): Json<VoteIn>,
) -> ApiResult<(StatusCode, Json<VoteQueued>)> {
    let key = VoteKey::new(vote.voter_id, vote.election_id, vote.candidate_id);
    let store = state.store.clone();
    let pending_id = blocking(move || {
        if store.vote(&key)?.is_some() {
            return Ok(None);
        }
        store.insert_vote(&VoteRecord::new(key.clone()))?;
        let record = PendingRecord::vote(&key, &vote.candidate, ELECTION_SYSTEM);
        store.enqueue(&record)?;
        Ok(Some(record.id))
    })
    .await?;

    match pending_id {
        Some(pending_id) => {
            info!(%pending_id, "vote queued for the ledger");
            Ok((StatusCode::ACCEPTED, Json(VoteQueued { pending_id })))
        }
        None => Err(ApiError(
            StatusCode::CONFLICT,
            "vote already recorded".to_string(),
        )),
    }
}

async fn mine(State(state): State<AppState>) -> StatusCode {
    state.trigger.fire();
    StatusCode::ACCEPTED
}

async fn election_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ElectionResults>> {
    let chain = state.chain.clone();
    Ok(Json(blocking(move || Ok(chain.get_election_results(&id))).await?))
}

async fn vote_counts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BTreeMap<String, u64>>> {
    let chain = state.chain.clone();
    Ok(Json(blocking(move || Ok(chain.get_vote_count(&id))).await?))
}

async fn balance(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Json<Balance>> {
    let chain = state.chain.clone();
    Ok(Json(
        blocking(move || {
            let balance = chain.get_balance(&address);
            Ok(Balance { address, balance })
        })
        .await?,
    ))
}
