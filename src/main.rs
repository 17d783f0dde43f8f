//! ashchain node
//!
//! Runs a mining node with a WebSocket peer server and a REST API, or
//! manages keys from the command line.

use ashchain::api::{create_router, ApiState};
use ashchain::config::{random_miner_id, Settings};
use ashchain::crypto::{address_from_private_key, KeyPair};
use ashchain::network::{Node, NodeConfig};
use ashchain::storage::JsonStore;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ashchain")]
#[command(version)]
#[command(about = "A minimal proof-of-work cryptocurrency node", long_about = None)]
struct Cli {
    /// Settings file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node
    Run {
        /// REST API port
        #[arg(long)]
        rest_port: Option<u16>,

        /// WebSocket peer port
        #[arg(long)]
        ws_port: Option<u16>,

        /// Data directory for blockchain storage
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Start mining immediately
        #[arg(long)]
        mine: bool,

        /// Peer to connect to on start (repeatable)
        #[arg(short, long = "peer")]
        peers: Vec<String>,
    },

    /// Generate a new key pair
    Keygen,

    /// Print the address of a private key
    Address {
        /// Private key (hex)
        private_key: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            rest_port,
            ws_port,
            data_dir,
            mine,
            peers,
        } => {
            let mut settings = Settings::load(cli.config.as_deref())?;
            if let Some(port) = rest_port {
                settings.rest.port = port;
            }
            if let Some(port) = ws_port {
                settings.websocket.port = port;
            }
            if let Some(dir) = data_dir {
                settings.database.folder = dir;
            }
            settings.mining.autostart |= mine;

            let mut bootstrap_peers = settings.peer_addresses()?;
            bootstrap_peers.extend(peers);

            run_node(settings, bootstrap_peers)?;
        }

        Commands::Keygen => {
            let key_pair = KeyPair::generate();
            println!("Private key: {}", key_pair.private_key_hex());
            println!("Public key:  {}", key_pair.public_key_hex());
            println!("Address:     {}", key_pair.address());
        }

        Commands::Address { private_key } => {
            println!("{}", address_from_private_key(&private_key)?);
        }
    }

    Ok(())
}

fn run_node(
    settings: Settings,
    bootstrap_peers: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let miner_id = settings.mining.miner_id.clone().unwrap_or_else(random_miner_id);
    let reward_address = match settings.mining.address.clone() {
        Some(address) => address,
        None => {
            let key_pair = KeyPair::generate();
            log::info!(
                "No mining address configured, rewards go to {} (private key {})",
                key_pair.address(),
                key_pair.private_key_hex()
            );
            key_pair.address()
        }
    };

    let config = NodeConfig {
        port: settings.websocket.port,
        initial_difficulty: settings.chain.difficulty,
        allow_reset: settings.chain.reset.enable,
        miner_id,
        reward_address,
        bootstrap_peers,
    };

    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let store = JsonStore::new(&settings.database.folder)?;
        let node = Node::new(config, Box::new(store))?;
        node.start().await?;

        if settings.mining.autostart {
            node.start_mining().await;
        }

        let app = create_router(ApiState::new(node.clone()));
        let addr = format!("0.0.0.0:{}", settings.rest.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        log::info!("REST API listening on http://{}", addr);

        let shutdown = node.shutdown_signal();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
        });

        tokio::select! {
            _ = tokio::signal::ctrl_c() => log::info!("Interrupted"),
            _ = node.shutdown_signal() => {}
        }

        node.shutdown().await;
        match server.await {
            Ok(Err(e)) => log::error!("REST server error: {}", e),
            Err(e) => log::error!("REST server task failed: {}", e),
            Ok(Ok(())) => {}
        }
        log::info!("Node stopped");

        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    Ok(())
}
