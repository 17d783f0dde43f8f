//! Blockchain persistence layer
//!
//! The node talks to storage through [`ChainDatabase`]. [`JsonStore`]
//! keeps one pretty-printed JSON file per block, so appending a block
//! writes a single small file.

use crate::core::{Block, Blockchain};
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Persistence collaborator of the node.
///
/// Failures are reported to the caller, which logs them; the in-memory
/// chain is never rolled back because of a failed write.
pub trait ChainDatabase: Send + Sync {
    /// Replace `chain` with the stored chain, seeding the genesis block
    /// when nothing is stored yet
    fn initialize(&self, chain: &mut Blockchain) -> Result<(), StorageError>;

    /// Store one block
    fn write(&self, block: &Block) -> Result<(), StorageError>;

    /// Store every block of `chain`
    fn write_chain(&self, chain: &Blockchain) -> Result<(), StorageError> {
        for block in chain.blocks() {
            self.write(block)?;
        }
        Ok(())
    }

    /// Forget everything stored
    fn reset(&self) -> Result<(), StorageError>;
}

const BLOCKS_DIR: &str = "blocks";

/// File-per-block JSON store under `<folder>/blocks`
#[derive(Debug, Clone)]
pub struct JsonStore {
    blocks_dir: PathBuf,
}

impl JsonStore {
    /// Open (creating if needed) the store rooted at `folder`
    pub fn new(folder: impl AsRef<Path>) -> Result<Self, StorageError> {
        let blocks_dir = folder.as_ref().join(BLOCKS_DIR);
        fs::create_dir_all(&blocks_dir)?;
        Ok(Self { blocks_dir })
    }

    fn block_path(&self, index: u64) -> PathBuf {
        self.blocks_dir.join(format!("block-{:010}.json", index))
    }

    /// Block files sorted by index
    fn block_files(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.blocks_dir)? {
            let path = entry?.path();
            let is_block = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("block-") && n.ends_with(".json"));
            if is_block {
                files.push(path);
            }
        }
        // Zero-padded names sort by index
        files.sort();
        Ok(files)
    }

    /// Read every stored block in index order
    pub fn load(&self) -> Result<Vec<Block>, StorageError> {
        self.block_files()?
            .iter()
            .map(|path| {
                let reader = BufReader::new(fs::File::open(path)?);
                Ok(serde_json::from_reader(reader)?)
            })
            .collect()
    }
}

impl ChainDatabase for JsonStore {
    fn initialize(&self, chain: &mut Blockchain) -> Result<(), StorageError> {
        let blocks = self.load()?;

        if blocks.is_empty() {
            log::info!("Creating new blockchain...");
            *chain = Blockchain::new();
            return self.write_chain(chain);
        }

        log::info!("Loading existing blockchain ({} blocks)...", blocks.len());
        if blocks[0].index != 0 {
            return Err(StorageError::InvalidData(format!(
                "stored chain starts at block {}",
                blocks[0].index
            )));
        }

        let loaded = Blockchain::from_blocks(blocks);
        if !loaded.is_valid_chain() {
            return Err(StorageError::InvalidData(
                "stored chain failed validation".to_string(),
            ));
        }

        *chain = loaded;
        Ok(())
    }

    fn write(&self, block: &Block) -> Result<(), StorageError> {
        let path = self.block_path(block.index);

        // Write to temporary file first
        let temp_path = path.with_extension("tmp");
        let writer = BufWriter::new(fs::File::create(&temp_path)?);
        serde_json::to_writer_pretty(writer, block)?;

        // Atomic rename
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn reset(&self) -> Result<(), StorageError> {
        if self.blocks_dir.exists() {
            fs::remove_dir_all(&self.blocks_dir)?;
        }
        fs::create_dir_all(&self.blocks_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;

    fn extend(chain: &mut Blockchain, count: usize) {
        for _ in 0..count {
            let tail = chain.tail().unwrap();
            let index = tail.index + 1;
            let block = Block::with_timestamp(
                index,
                tail.hash.clone(),
                tail.timestamp + 1000,
                vec![Transaction::coinbase(index, "miner")],
                0,
                "node",
            );
            chain.append(block).unwrap();
        }
    }

    #[test]
    fn test_initialize_seeds_genesis() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(temp_dir.path()).unwrap();

        let mut chain = Blockchain::empty();
        store.initialize(&mut chain).unwrap();
        assert_eq!(chain.blocks(), &[Block::genesis()]);
        assert!(temp_dir.path().join("blocks/block-0000000000.json").exists());
    }

    #[test]
    fn test_save_load_blockchain() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(temp_dir.path()).unwrap();

        let mut chain = Blockchain::empty();
        store.initialize(&mut chain).unwrap();
        extend(&mut chain, 12);
        for block in &chain.blocks()[1..] {
            store.write(block).unwrap();
        }

        let reopened = JsonStore::new(temp_dir.path()).unwrap();
        let mut loaded = Blockchain::empty();
        reopened.initialize(&mut loaded).unwrap();
        assert_eq!(loaded.blocks(), chain.blocks());
    }

    #[test]
    fn test_reset_and_write_chain() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(temp_dir.path()).unwrap();

        let mut long = Blockchain::new();
        extend(&mut long, 5);
        store.write_chain(&long).unwrap();

        let mut short = Blockchain::new();
        extend(&mut short, 2);
        store.reset().unwrap();
        store.write_chain(&short).unwrap();

        assert_eq!(store.load().unwrap(), short.blocks());
    }

    #[test]
    fn test_invalid_stored_chain_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(temp_dir.path()).unwrap();

        let mut chain = Blockchain::new();
        extend(&mut chain, 3);
        let mut tampered = chain.blocks()[2].clone();
        tampered.nonce += 1;
        store.write_chain(&chain).unwrap();
        store.write(&tampered).unwrap();

        let mut loaded = Blockchain::empty();
        assert!(matches!(
            store.initialize(&mut loaded),
            Err(StorageError::InvalidData(_))
        ));
    }
}
