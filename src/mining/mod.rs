//! Mining module for block creation

pub mod miner;

pub use miner::{MineOutcome, Miner, MiningStats};
