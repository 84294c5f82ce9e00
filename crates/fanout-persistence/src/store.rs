use crate::{PersistenceError, Result};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, DB};
use std::path::PathBuf;
use tracing::{debug, info};

/// Configuration for the queue store
#[derive(Debug, Clone)]
pub struct QueueStoreConfig {
    pub data_dir: PathBuf,
}

impl Default for QueueStoreConfig {
    fn default() -> Self {
        QueueStoreConfig {
            data_dir: PathBuf::from("./broker-data"),
        }
    }
}

/// Column family names
const CF_QUEUES: &str = "queues";
const CF_MESSAGES: &str = "messages";

/// A persistent message as it sits on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: u64,
    pub body: Vec<u8>,
}

/// Durable queue declarations and unsettled persistent messages, backed by
/// RocksDB. Message keys are `queue \0 id` with the id big-endian, so a
/// forward scan over a queue prefix yields publish order.
pub struct QueueStore {
    db: DB,
    config: QueueStoreConfig,
}

impl QueueStore {
    /// Open or create the store
    pub fn open(config: QueueStoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_QUEUES, Options::default()),
            ColumnFamilyDescriptor::new(CF_MESSAGES, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, config.data_dir.join("queues"), cf_descriptors)?;

        info!("Opened queue store at {:?}", config.data_dir);

        Ok(QueueStore { db, config })
    }

    pub fn config(&self) -> &QueueStoreConfig {
        &self.config
    }

    /// Record a durable queue; idempotent
    pub fn declare_queue(&self, queue: &str) -> Result<()> {
        validate_queue_name(queue)?;
        self.db.put_cf(self.cf(CF_QUEUES)?, queue.as_bytes(), [])?;
        Ok(())
    }

    /// Names of every durable queue ever declared
    pub fn durable_queues(&self) -> Result<Vec<String>> {
        let mut queues = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_QUEUES)?, IteratorMode::Start) {
            let (key, _) = item?;
            let name = String::from_utf8(key.to_vec())
                .map_err(|e| PersistenceError::Corrupt(format!("queue name: {}", e)))?;
            queues.push(name);
        }
        Ok(queues)
    }

    /// Persist a message body under its broker-wide id
    pub fn append(&self, queue: &str, id: u64, body: &[u8]) -> Result<()> {
        let key = message_key(queue, id)?;
        self.db.put_cf(self.cf(CF_MESSAGES)?, key, body)?;
        debug!("Stored message {} on {}", id, queue);
        Ok(())
    }

    /// Forget a settled message
    pub fn remove(&self, queue: &str, id: u64) -> Result<()> {
        let key = message_key(queue, id)?;
        self.db.delete_cf(self.cf(CF_MESSAGES)?, key)?;
        Ok(())
    }

    /// All stored messages of a queue, oldest first
    pub fn load_queue(&self, queue: &str) -> Result<Vec<StoredMessage>> {
        let prefix = queue_prefix(queue)?;
        let mut messages = Vec::new();

        let iter = self.db.iterator_cf(
            self.cf(CF_MESSAGES)?,
            IteratorMode::From(&prefix, Direction::Forward),
        );
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            messages.push(StoredMessage {
                id: parse_id(&key[prefix.len()..])?,
                body: value.to_vec(),
            });
        }

        Ok(messages)
    }

    /// Highest message id on disk, across all queues
    pub fn max_message_id(&self) -> Result<Option<u64>> {
        let mut max = None;
        for item in self.db.iterator_cf(self.cf(CF_MESSAGES)?, IteratorMode::Start) {
            let (key, _) = item?;
            let split = key
                .iter()
                .position(|b| *b == 0)
                .ok_or_else(|| PersistenceError::Corrupt("message key without separator".to_string()))?;
            let id = parse_id(&key[split + 1..])?;
            max = Some(max.map_or(id, |m: u64| m.max(id)));
        }
        Ok(max)
    }

    /// Flush memtables to disk
    pub fn sync(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PersistenceError::Other(format!("{} CF not found", name)))
    }
}

fn validate_queue_name(queue: &str) -> Result<()> {
    if queue.is_empty() || queue.as_bytes().contains(&0) {
        return Err(PersistenceError::Other(format!("invalid queue name {:?}", queue)));
    }
    Ok(())
}

fn queue_prefix(queue: &str) -> Result<Vec<u8>> {
    validate_queue_name(queue)?;
    let mut prefix = Vec::with_capacity(queue.len() + 1);
    prefix.extend_from_slice(queue.as_bytes());
    prefix.push(0);
    Ok(prefix)
}

fn message_key(queue: &str, id: u64) -> Result<Vec<u8>> {
    let mut key = queue_prefix(queue)?;
    key.extend_from_slice(&id.to_be_bytes());
    Ok(key)
}

fn parse_id(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| PersistenceError::Corrupt("message id is not 8 bytes".to_string()))?;
    Ok(u64::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> QueueStore {
        QueueStore::open(QueueStoreConfig {
            data_dir: dir.path().to_path_buf(),
        })
        .unwrap()
    }

    #[test]
    fn test_append_and_load_in_order() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store.declare_queue("work").unwrap();
        store.append("work", 2, b"second").unwrap();
        store.append("work", 1, b"first").unwrap();
        store.append("work", 300, b"third").unwrap();

        let messages = store.load_queue("work").unwrap();
        let ids: Vec<u64> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 300]);
        assert_eq!(messages[0].body, b"first");
    }

    #[test]
    fn test_queues_do_not_bleed_into_each_other() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        // "work" is a prefix of "workers"; the separator keeps them apart
        store.append("work", 1, b"a").unwrap();
        store.append("workers", 2, b"b").unwrap();

        assert_eq!(store.load_queue("work").unwrap().len(), 1);
        assert_eq!(store.load_queue("workers").unwrap().len(), 1);
        assert_eq!(store.max_message_id().unwrap(), Some(2));
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store.append("results", 5, b"x").unwrap();
        store.remove("results", 5).unwrap();
        assert!(store.load_queue("results").unwrap().is_empty());
        assert_eq!(store.max_message_id().unwrap(), None);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();

        {
            let store = open(&dir);
            store.declare_queue("data_processing").unwrap();
            store.declare_queue("result_queue").unwrap();
            store.append("result_queue", 9, b"payload").unwrap();
            store.sync().unwrap();
        }

        let store = open(&dir);
        let mut queues = store.durable_queues().unwrap();
        queues.sort();
        assert_eq!(queues, vec!["data_processing", "result_queue"]);
        assert_eq!(
            store.load_queue("result_queue").unwrap(),
            vec![StoredMessage { id: 9, body: b"payload".to_vec() }]
        );
    }

    #[test]
    fn test_rejects_bad_queue_names() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        assert!(store.declare_queue("").is_err());
        assert!(store.append("bad\0name", 1, b"x").is_err());
    }
}
