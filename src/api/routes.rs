//! REST API routes configuration

use crate::api::handlers::{self, ApiState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    // Configure CORS for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::get_status))
        // Blocks
        .route("/block-idx/{index}", get(handlers::get_block))
        .route(
            "/block-idx/{index}/details",
            get(handlers::get_block_details),
        )
        // Node control
        .route("/startMining", get(handlers::start_mining))
        .route("/stopMining", get(handlers::stop_mining))
        .route("/quit", get(handlers::quit))
        // Peers
        .route("/addPeer/{address}", get(handlers::add_peer))
        .route("/peers", get(handlers::list_peers))
        // Accounts and transactions
        .route("/api/balance/{address}", get(handlers::get_balance))
        .route("/api/ledger/{address}", get(handlers::get_ledger))
        .route("/api/unspent/{address}", get(handlers::get_unspent))
        .route("/api/transactions", post(handlers::create_transaction))
        .route("/api/transactions/{txid}", get(handlers::get_transaction))
        .with_state(state)
        .layer(cors)
}
