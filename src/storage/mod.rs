//! Storage module for blockchain persistence

pub mod persistence;

pub use persistence::{ChainDatabase, JsonStore, StorageError};
