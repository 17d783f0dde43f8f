//! P2P Node implementation
//!
//! The node owns the shared chain and ties together the miner, the
//! reconciler, the peer transport and persistence. Two paths mutate the
//! chain: the mining loop on a blocking thread and the peer message
//! handler. Both take the same write lock for every read-then-mutate
//! sequence, and neither holds it across a nonce search or a network send.

use crate::core::{create_transaction, Blockchain, Replacement, Transaction, TxError};
use crate::mining::{MineOutcome, Miner};
use crate::network::message::{
    EnvelopeError, Frame, Request, Response, CHAIN, ID1_NOT_FOUND, SUMMARY, UNKNOWN_MESSAGE,
};
use crate::network::peer::{ConnectionId, PeerError, PeerManager, PeerMessage, Role};
use crate::network::server::{connect_to_peer, handle_connection, peer_url, Server};
use crate::network::sync::{ReconcileOutcome, Reconciler, SummaryAction};
use crate::storage::{ChainDatabase, StorageError};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;

/// Capacity of the channel carrying frames from all peers to the node
const MESSAGE_CHANNEL_CAPACITY: usize = 1000;

/// P2P Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// WebSocket port to listen on; 0 picks a free port
    pub port: u16,
    /// Difficulty of the first mined block
    pub initial_difficulty: u32,
    /// Adopt peer chains with a different genesis block
    pub allow_reset: bool,
    pub miner_id: String,
    /// Receives coinbase rewards
    pub reward_address: String,
    /// Peers to connect to on start
    pub bootstrap_peers: Vec<String>,
}

/// Node status information
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub mining: bool,
    pub height: u64,
    pub tail_hash: String,
    pub cumulative_difficulty: u64,
    pub next_difficulty: u32,
    pub pending_transactions: usize,
    pub peers: usize,
    pub miner_id: String,
    pub reward_address: String,
}

/// The main P2P node
pub struct Node {
    pub config: NodeConfig,
    pub blockchain: Arc<RwLock<Blockchain>>,
    pub peer_manager: Arc<PeerManager>,
    miner: Miner,
    reconciler: Reconciler,
    database: Box<dyn ChainDatabase>,
    /// Single-slot holding area for a replacement awaiting application
    staged: Mutex<Option<Replacement>>,
    mining: AtomicBool,
    mining_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    message_tx: mpsc::Sender<PeerMessage>,
    message_rx: tokio::sync::Mutex<Option<mpsc::Receiver<PeerMessage>>>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Node {
    /// Create a node over the chain stored in `database`
    pub fn new(
        config: NodeConfig,
        database: Box<dyn ChainDatabase>,
    ) -> Result<Arc<Self>, StorageError> {
        let mut chain = Blockchain::empty();
        database.initialize(&mut chain)?;

        let miner = Miner::new(
            &config.miner_id,
            chain.next_difficulty(config.initial_difficulty),
        );
        log::info!(
            "Chain loaded: height {}, next difficulty {}",
            chain.tail().map(|b| b.index).unwrap_or_default(),
            miner.difficulty()
        );

        let (message_tx, message_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Arc::new(Self {
            reconciler: Reconciler::new(config.allow_reset),
            config,
            blockchain: Arc::new(RwLock::new(chain)),
            peer_manager: Arc::new(PeerManager::new()),
            miner,
            database,
            staged: Mutex::new(None),
            mining: AtomicBool::new(false),
            mining_task: tokio::sync::Mutex::new(None),
            message_tx,
            message_rx: tokio::sync::Mutex::new(Some(message_rx)),
            tasks: tokio::sync::Mutex::new(Vec::new()),
            shutdown_tx,
        }))
    }

    /// Start accepting peers, dispatching their messages and connecting
    /// to the bootstrap peers. Returns the address the peer server is
    /// bound to.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, PeerError> {
        let mut message_rx = self
            .message_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| PeerError::ConnectionFailed("node already started".into()))?;

        let server = Server::bind(self.config.port).await?;
        let local_addr = server.local_addr()?;
        log::info!("Node started on {}", local_addr);

        let node = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = server.accept() => match accepted {
                        Ok((ws, addr)) => {
                            log::info!("Incoming connection from {}", addr);
                            node.on_inbound(ws, addr).await;
                        }
                        Err(e) => log::warn!("Accept error: {}", e),
                    },
                    _ = stopped(&mut shutdown) => break,
                }
            }
            log::info!("Peer server stopped");
        });

        let node = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let dispatch_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(message) = message_rx.recv() => node.handle_message(message).await,
                    _ = stopped(&mut shutdown) => break,
                }
            }
        });

        self.tasks.lock().await.extend([accept_task, dispatch_task]);

        for peer in &self.config.bootstrap_peers {
            if let Err(e) = self.connect_to(peer).await {
                log::warn!("Could not connect to {}: {}", peer, e);
            }
        }

        Ok(local_addr)
    }

    async fn on_inbound<S>(&self, ws: tokio_tungstenite::WebSocketStream<S>, addr: SocketAddr)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let connection = handle_connection(
            ws,
            addr.to_string(),
            Role::Inbound,
            Arc::clone(&self.peer_manager),
            self.message_tx.clone(),
        )
        .await;

        match connection {
            Ok(id) => self.send_summary(id).await,
            Err(e) => log::warn!("Rejected connection from {}: {}", addr, e),
        }
    }

    /// Open an outbound connection, ask the peer for its summary and
    /// announce ours
    pub async fn connect_to(&self, addr: &str) -> Result<ConnectionId, PeerError> {
        let url = peer_url(addr);
        log::info!("Connecting to peer: {}", url);

        let ws = connect_to_peer(&url).await?;
        let id = handle_connection(
            ws,
            url,
            Role::Outbound,
            Arc::clone(&self.peer_manager),
            self.message_tx.clone(),
        )
        .await?;

        self.send_request(id, &Request::Summary).await;
        self.send_summary(id).await;
        Ok(id)
    }

    // =========================================================================
    // Message handling
    // =========================================================================

    async fn handle_message(&self, message: PeerMessage) {
        log::trace!("Frame from connection {}: {}", message.from, message.text);

        match Frame::classify(&message.text) {
            Frame::Request(request) => {
                let response = self.answer(request).await;
                self.send_response(message.from, &response).await;
            }
            Frame::Response(response) => self.handle_response(message.from, response).await,
            Frame::Unparseable => match message.role {
                Role::Inbound => {
                    log::warn!("Malformed request on connection {}", message.from);
                    let response = self.answer(Err(EnvelopeError::Malformed)).await;
                    self.send_response(message.from, &response).await;
                }
                Role::Outbound => {
                    log::warn!("Malformed response on connection {}", message.from);
                }
            },
        }
    }

    /// Build the response to a peer request
    async fn answer(&self, request: Result<Request, EnvelopeError>) -> Response {
        let request = match request {
            Ok(request) => request,
            Err(EnvelopeError::Malformed) => {
                return Response::error(None, EnvelopeError::Malformed.to_string())
            }
            Err(e) => return Response::error(Some(CHAIN), e.to_string()),
        };

        let chain = self.blockchain.read().await;
        match request {
            Request::Summary => summary_of(&chain)
                .unwrap_or_else(|| Response::error(Some(SUMMARY), "empty chain")),
            Request::Chain(None) => Response::Chain(chain.blocks().to_vec()),
            Request::Chain(Some(range)) => match chain.range(range.first, range.last) {
                Some(blocks) => Response::Chain(blocks),
                None => Response::error(Some(CHAIN), ID1_NOT_FOUND),
            },
            Request::Unknown(kind) => Response::error(Some(kind.as_str()), UNKNOWN_MESSAGE),
        }
    }

    async fn handle_response(&self, from: ConnectionId, response: Result<Response, EnvelopeError>) {
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Malformed response on connection {}: {}", from, e);
                return;
            }
        };

        match response {
            Response::Summary {
                genesis,
                tail,
                cumdiff,
            } => {
                let action = {
                    let chain = self.blockchain.read().await;
                    self.reconciler.on_summary(&chain, &genesis, &tail, cumdiff)
                };
                match action {
                    SummaryAction::Ignore => {}
                    SummaryAction::RequestFull => {
                        self.send_request(from, &Request::Chain(None)).await
                    }
                    SummaryAction::RequestRange(range) => {
                        self.send_request(from, &Request::Chain(Some(range))).await
                    }
                }
            }
            Response::Chain(blocks) => self.reconcile(from, blocks).await,
            Response::Error { message, error } => {
                log::warn!(
                    "Peer {} answered {} with error: {}",
                    from,
                    message.as_deref().unwrap_or("request"),
                    error
                );
            }
            Response::Unknown(kind) => {
                log::debug!("Ignoring '{}' response from connection {}", kind, from);
            }
        }
    }

    async fn reconcile(&self, from: ConnectionId, blocks: Vec<crate::core::Block>) {
        let outcome = {
            let mut chain = self.blockchain.write().await;
            let outcome = self.reconciler.reconcile(&mut chain, blocks);
            if let ReconcileOutcome::Extended(count) = outcome {
                let start = chain.len().saturating_sub(count);
                for block in &chain.blocks()[start..] {
                    if let Err(e) = self.database.write(block) {
                        log::error!("Failed to persist block {}: {}", block.index, e);
                    }
                }
            }
            outcome
        };

        match outcome {
            ReconcileOutcome::Discarded | ReconcileOutcome::Extended(0) => {}
            ReconcileOutcome::Extended(_) => {
                // The tail moved under the running search
                self.miner.cancel();
                self.broadcast_summary().await;
            }
            ReconcileOutcome::Replace(replacement) => self.stage(replacement).await,
            ReconcileOutcome::RequestRange(range) => {
                self.send_request(from, &Request::Chain(Some(range))).await
            }
        }
    }

    // =========================================================================
    // Staged replacement
    // =========================================================================

    /// Hold a replacement for the mining loop, or apply it right away when
    /// nothing is mining
    async fn stage(&self, replacement: Replacement) {
        *self.staged_slot() = Some(replacement);

        if self.is_mining() {
            self.miner.cancel();
        } else {
            self.apply_pending().await;
        }
    }

    fn staged_slot(&self) -> std::sync::MutexGuard<'_, Option<Replacement>> {
        self.staged.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply any staged replacement from async context
    async fn apply_pending(&self) {
        let applied = {
            let mut chain = self.blockchain.write().await;
            self.apply_staged(&mut chain)
        };
        if applied {
            self.broadcast_summary().await;
        }
    }

    /// Apply and persist the staged replacement, if any
    fn apply_staged(&self, chain: &mut Blockchain) -> bool {
        let Some(replacement) = self.staged_slot().take() else {
            return false;
        };

        let before = (chain.len(), chain.tail().map(|b| b.hash.clone()));
        let applied = match chain.apply_replacement(replacement) {
            Ok(count) => {
                log::info!(
                    "Applied replacement of {} blocks, height now {}",
                    count,
                    chain.tail().map(|b| b.index).unwrap_or_default()
                );
                true
            }
            Err(e) => {
                log::warn!("Staged replacement rejected: {}", e);
                false
            }
        };

        // The store mirrors whatever the chain ended up as
        if before != (chain.len(), chain.tail().map(|b| b.hash.clone())) {
            let persisted = self
                .database
                .reset()
                .and_then(|()| self.database.write_chain(chain));
            if let Err(e) = persisted {
                log::error!("Failed to persist replaced chain: {}", e);
            }
        }
        applied
    }

    // =========================================================================
    // Mining
    // =========================================================================

    pub fn is_mining(&self) -> bool {
        self.mining.load(Ordering::SeqCst)
    }

    /// Start the mining loop. Returns false when it is already running.
    pub async fn start_mining(self: &Arc<Self>) -> bool {
        let mut task = self.mining_task.lock().await;
        if self.mining.swap(true, Ordering::SeqCst) {
            return false;
        }

        let node = Arc::clone(self);
        let runtime = Handle::current();
        *task = Some(tokio::task::spawn_blocking(move || node.mining_loop(runtime)));
        true
    }

    /// Stop the mining loop and wait for it to finish. Returns false when
    /// it was not running.
    pub async fn stop_mining(&self) -> bool {
        let was_mining = {
            let mut task = self.mining_task.lock().await;
            let was_mining = self.mining.swap(false, Ordering::SeqCst);
            self.miner.cancel();
            if let Some(handle) = task.take() {
                if let Err(e) = handle.await {
                    log::error!("Mining task failed: {}", e);
                }
            }
            was_mining
        };

        // A replacement staged while the loop was winding down
        self.apply_pending().await;
        was_mining
    }

    fn mining_loop(self: Arc<Self>, runtime: Handle) {
        log::info!("Mining started (miner {})", self.miner.miner_id());

        while self.is_mining() {
            self.miner.reset();
            // A stop issued before the reset must not be lost
            if !self.is_mining() {
                break;
            }

            let applied = {
                let mut chain = self.blockchain.blocking_write();
                self.apply_staged(&mut chain)
            };
            if applied {
                runtime.block_on(self.broadcast_summary());
            }

            let candidate = {
                let mut chain = self.blockchain.blocking_write();
                self.next_candidate(&mut chain)
            };
            let Some((index, previous_hash, transactions)) = candidate else {
                log::error!("Cannot mine on an empty chain");
                break;
            };

            match self
                .miner
                .mine_block(index, transactions.clone(), previous_hash)
            {
                MineOutcome::Mined(block, _stats) => {
                    let appended = {
                        let mut chain = self.blockchain.blocking_write();
                        match chain.append(block.clone()) {
                            Ok(()) => true,
                            Err(e) => {
                                log::warn!("Mined block {} rejected: {}", block.index, e);
                                chain.requeue(transactions);
                                false
                            }
                        }
                    };

                    if appended {
                        if let Err(e) = self.database.write(&block) {
                            log::error!("Failed to persist block {}: {}", block.index, e);
                        }
                        runtime.block_on(self.broadcast_summary());
                    }
                }
                MineOutcome::Aborted => {
                    let requeued = self.blockchain.blocking_write().requeue(transactions);
                    log::debug!("Requeued {} transactions", requeued);
                }
            }
        }

        self.mining.store(false, Ordering::SeqCst);
        log::info!("Mining stopped");
    }

    /// Index, previous hash and transactions of the next block to mine
    fn next_candidate(&self, chain: &mut Blockchain) -> Option<(u64, String, Vec<Transaction>)> {
        let tail = chain.tail()?;
        let index = tail.index + 1;
        let previous_hash = tail.hash.clone();

        let difficulty = chain.next_difficulty(self.config.initial_difficulty);
        let current = self.miner.difficulty();
        if difficulty > current {
            log::info!("Increasing difficulty from {} to {}", current, difficulty);
        } else if difficulty < current {
            log::info!("Decreasing difficulty from {} to {}", current, difficulty);
        }
        self.miner.set_difficulty(difficulty);

        let transactions = chain.drain_for_next_block(index, &self.config.reward_address);
        Some((index, previous_hash, transactions))
    }

    // =========================================================================
    // Transactions and status
    // =========================================================================

    /// Build a transaction from the sender's unspent outputs and queue it
    /// for the next block
    pub async fn submit_transaction(
        &self,
        sender_private_key: &str,
        receiver: &str,
        amount: f64,
    ) -> Result<Transaction, TxError> {
        let mut chain = self.blockchain.write().await;
        let tx = create_transaction(&chain, sender_private_key, receiver, amount)?;
        chain.queue_transaction(tx.clone());
        log::info!(
            "Queued transaction of {} to {} ({} pending)",
            amount,
            receiver,
            chain.pending_len()
        );
        Ok(tx)
    }

    /// Get node status
    pub async fn status(&self) -> NodeStatus {
        let (height, tail_hash, cumulative_difficulty, next_difficulty, pending_transactions) = {
            let chain = self.blockchain.read().await;
            (
                chain.tail().map(|b| b.index).unwrap_or_default(),
                chain.tail().map(|b| b.hash.clone()).unwrap_or_default(),
                chain.total_difficulty(),
                chain.next_difficulty(self.config.initial_difficulty),
                chain.pending_len(),
            )
        };

        NodeStatus {
            mining: self.is_mining(),
            height,
            tail_hash,
            cumulative_difficulty,
            next_difficulty,
            pending_transactions,
            peers: self.peer_manager.peer_count().await,
            miner_id: self.config.miner_id.clone(),
            reward_address: self.config.reward_address.clone(),
        }
    }

    // =========================================================================
    // Sending
    // =========================================================================

    async fn send_request(&self, to: ConnectionId, request: &Request) {
        match request.to_json() {
            Ok(text) => self.send_text(to, text).await,
            Err(e) => log::error!("Failed to encode request: {}", e),
        }
    }

    async fn send_response(&self, to: ConnectionId, response: &Response) {
        match response.to_json() {
            Ok(text) => self.send_text(to, text).await,
            Err(e) => log::error!("Failed to encode response: {}", e),
        }
    }

    async fn send_text(&self, to: ConnectionId, text: String) {
        if let Err(e) = self.peer_manager.send_to(to, text).await {
            log::warn!("Failed to send to connection {}: {}", to, e);
        }
    }

    async fn send_summary(&self, to: ConnectionId) {
        let summary = summary_of(&*self.blockchain.read().await);
        if let Some(summary) = summary {
            self.send_response(to, &summary).await;
        }
    }

    /// Announce our genesis, tail and weight to every peer
    pub async fn broadcast_summary(&self) {
        let summary = summary_of(&*self.blockchain.read().await);
        let Some(summary) = summary else {
            return;
        };
        match summary.to_json() {
            Ok(text) => self.peer_manager.broadcast(text).await,
            Err(e) => log::error!("Failed to encode summary: {}", e),
        }
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Ask the node to shut down; [`Node::shutdown_signal`] observers wake up
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Resolves once a shutdown has been requested
    pub fn shutdown_signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut shutdown = self.shutdown_tx.subscribe();
        async move { stopped(&mut shutdown).await }
    }

    /// Stop mining, stop serving peers and wait for every task to finish
    pub async fn shutdown(&self) {
        log::info!("Node shutting down...");
        self.stop_mining().await;
        self.request_shutdown();

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                log::error!("Node task failed: {}", e);
            }
        }
    }
}

/// Resolves once the shutdown flag is raised
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Summary response for `chain`, `None` when it has no blocks
fn summary_of(chain: &Blockchain) -> Option<Response> {
    Some(Response::Summary {
        genesis: chain.genesis()?.clone(),
        tail: chain.tail()?.clone(),
        cumdiff: chain.total_difficulty(),
    })
}
