//! REST API handlers for node operations

use crate::core::{Block, LedgerEntry, Transaction, TxError, UnspentTxOut};
use crate::network::{Node, NodeStatus};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub node: Arc<Node>,
}

impl ApiState {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

fn api_error(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: error.into(),
        }),
    )
}

#[derive(Debug, Serialize)]
pub struct MiningResponse {
    pub mining: bool,
    /// False when mining was already in the requested state
    pub changed: bool,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerResponse {
    pub connection_id: u64,
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct PeerInfoResponse {
    pub id: u64,
    pub address: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLocation {
    pub txid: String,
    pub block_index: u64,
    pub tx_index: u64,
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    pub private_key: String,
    pub receiver: String,
    pub amount: f64,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET / - Node status
pub async fn get_status(State(state): State<ApiState>) -> Json<NodeStatus> {
    Json(state.node.status().await)
}

/// GET /block-idx/{index} - Get block by index
pub async fn get_block(State(state): State<ApiState>, Path(index): Path<u64>) -> ApiResult<Block> {
    let chain = state.node.blockchain.read().await;
    chain
        .get(index)
        .cloned()
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "invalid block"))
}

/// GET /block-idx/{index}/details - Block with resolved inputs
pub async fn get_block_details(
    State(state): State<ApiState>,
    Path(index): Path<u64>,
) -> ApiResult<Block> {
    let chain = state.node.blockchain.read().await;
    chain
        .block_details(index)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "invalid block"))
}

/// GET /startMining
pub async fn start_mining(State(state): State<ApiState>) -> Json<MiningResponse> {
    let changed = state.node.start_mining().await;
    Json(MiningResponse {
        mining: state.node.is_mining(),
        changed,
    })
}

/// GET /stopMining
pub async fn stop_mining(State(state): State<ApiState>) -> Json<MiningResponse> {
    let changed = state.node.stop_mining().await;
    Json(MiningResponse {
        mining: state.node.is_mining(),
        changed,
    })
}

/// GET /quit - Ask the node to shut down
pub async fn quit(State(state): State<ApiState>) -> Json<MessageResponse> {
    log::info!("Shutdown requested over REST");
    state.node.request_shutdown();
    Json(MessageResponse {
        message: "shutting down".to_string(),
    })
}

/// GET /addPeer/{address} - Open an outbound peer connection
pub async fn add_peer(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<PeerResponse> {
    match state.node.connect_to(&address).await {
        Ok(connection_id) => Ok(Json(PeerResponse {
            connection_id,
            address,
        })),
        Err(e) => Err(api_error(StatusCode::BAD_GATEWAY, e.to_string())),
    }
}

/// GET /peers - Connected peers
pub async fn list_peers(State(state): State<ApiState>) -> Json<Vec<PeerInfoResponse>> {
    let peers = state.node.peer_manager.get_all_peer_info().await;
    Json(
        peers
            .into_iter()
            .map(|p| PeerInfoResponse {
                id: p.id,
                address: p.addr,
                role: p.role.to_string(),
            })
            .collect(),
    )
}

/// GET /api/balance/{address}
pub async fn get_balance(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> Json<BalanceResponse> {
    let balance = state.node.blockchain.read().await.balance_of(&address);
    Json(BalanceResponse { address, balance })
}

/// GET /api/ledger/{address}
pub async fn get_ledger(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> Json<Vec<LedgerEntry>> {
    Json(state.node.blockchain.read().await.ledger_for(&address))
}

/// GET /api/unspent/{address}
pub async fn get_unspent(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> Json<Vec<UnspentTxOut>> {
    Json(state.node.blockchain.read().await.compute_unspent(&address))
}

/// GET /api/transactions/{txid} - Locate a mined transaction
pub async fn get_transaction(
    State(state): State<ApiState>,
    Path(txid): Path<String>,
) -> ApiResult<TransactionLocation> {
    let location = state.node.blockchain.read().await.find_transaction(&txid);
    match location {
        Some((block_index, tx_index)) => Ok(Json(TransactionLocation {
            txid,
            block_index,
            tx_index,
        })),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Transaction {} not found", txid),
        )),
    }
}

/// POST /api/transactions - Build and queue a transaction
pub async fn create_transaction(
    State(state): State<ApiState>,
    Json(req): Json<CreateTransactionRequest>,
) -> ApiResult<Transaction> {
    state
        .node
        .submit_transaction(&req.private_key, &req.receiver, req.amount)
        .await
        .map(Json)
        .map_err(|e: TxError| api_error(StatusCode::BAD_REQUEST, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::network::NodeConfig;
    use crate::storage::JsonStore;

    fn test_state(dir: &std::path::Path, reward_address: &str) -> ApiState {
        let config = NodeConfig {
            port: 0,
            initial_difficulty: 0,
            allow_reset: false,
            miner_id: "api-test".into(),
            reward_address: reward_address.into(),
            bootstrap_peers: vec![],
        };
        let store = JsonStore::new(dir).unwrap();
        ApiState::new(Node::new(config, Box::new(store)).unwrap())
    }

    async fn mine_one(state: &ApiState) {
        let Json(started) = start_mining(State(state.clone())).await;
        assert!(started.changed);
        while state.node.status().await.height == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let Json(stopped) = stop_mining(State(state.clone())).await;
        assert!(!stopped.mining);
    }

    #[tokio::test]
    async fn test_get_block() {
        let temp_dir = tempfile::tempdir().unwrap();
        let state = test_state(temp_dir.path(), "miner");

        let Json(genesis) = get_block(State(state.clone()), Path(0)).await.unwrap();
        assert_eq!(genesis, Block::genesis());

        let (status, Json(error)) = get_block(State(state.clone()), Path(7)).await.unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error.error, "invalid block");

        let (status, _) = get_block_details(State(state), Path(7)).await.unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transaction_endpoints() {
        let temp_dir = tempfile::tempdir().unwrap();
        let key = KeyPair::generate();
        let state = test_state(temp_dir.path(), &key.address());
        mine_one(&state).await;

        let Json(balance) = get_balance(State(state.clone()), Path(key.address())).await;
        let Json(unspent) = get_unspent(State(state.clone()), Path(key.address())).await;
        assert!(balance.balance >= 57.0);
        assert_eq!(
            unspent.iter().map(|u| u.amount).sum::<f64>(),
            balance.balance
        );

        let request = CreateTransactionRequest {
            private_key: key.private_key_hex(),
            receiver: "bob".into(),
            amount: 20.0,
        };
        let Json(tx) = create_transaction(State(state.clone()), Json(request))
            .await
            .unwrap();
        assert_eq!(tx.tx_outs[0].address, "bob");
        assert_eq!(state.node.status().await.pending_transactions, 1);

        let request = CreateTransactionRequest {
            private_key: key.private_key_hex(),
            receiver: "bob".into(),
            amount: 1_000_000.0,
        };
        let (status, _) = create_transaction(State(state.clone()), Json(request))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let coinbase_id = state.node.blockchain.read().await.get(1).unwrap().transactions[0]
            .id
            .clone();
        let Json(location) = get_transaction(State(state.clone()), Path(coinbase_id))
            .await
            .unwrap();
        assert_eq!((location.block_index, location.tx_index), (1, 0));

        let Json(ledger) = get_ledger(State(state.clone()), Path(key.address())).await;
        assert!(ledger.iter().all(|entry| entry.amount == 57.0));

        let (status, _) = get_transaction(State(state), Path("missing".into()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_quit_signals_shutdown() {
        let temp_dir = tempfile::tempdir().unwrap();
        let state = test_state(temp_dir.path(), "miner");
        let signal = state.node.shutdown_signal();

        quit(State(state)).await;
        tokio::time::timeout(std::time::Duration::from_secs(1), signal)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_add_unreachable_peer() {
        let temp_dir = tempfile::tempdir().unwrap();
        let state = test_state(temp_dir.path(), "miner");

        let (status, _) = add_peer(State(state.clone()), Path("127.0.0.1:1".into()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let Json(peers) = list_peers(State(state)).await;
        assert!(peers.is_empty());
    }
}
