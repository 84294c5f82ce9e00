mod store;

pub use store::{QueueStore, QueueStoreConfig, StoredMessage};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
