use crate::queue_set::SessionId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// A worker's claim to be consuming from a queue.
///
/// The lease belongs to the session that took it and disappears with it, so a
/// crashed worker stops counting as soon as its connection drops.
#[derive(Debug, Clone)]
pub struct WorkerLease {
    pub worker_id: String,
    pub queue: String,
    pub session: SessionId,
    pub registered_at: DateTime<Utc>,
}

/// Registry of live worker leases, keyed by owning session and worker id.
///
/// Two sessions may lease the same id; each lease counts on its own.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<(SessionId, String), WorkerLease>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker; re-registering an id from the same session replaces its lease
    pub fn register(&self, worker_id: &str, queue: &str, session: SessionId) -> WorkerLease {
        let lease = WorkerLease {
            worker_id: worker_id.to_string(),
            queue: queue.to_string(),
            session,
            registered_at: Utc::now(),
        };
        self.workers
            .write()
            .insert((session, worker_id.to_string()), lease.clone());
        lease
    }

    /// Remove a lease only if `session` holds it
    pub fn deregister(&self, session: SessionId, worker_id: &str) -> Option<WorkerLease> {
        self.workers
            .write()
            .remove(&(session, worker_id.to_string()))
    }

    /// Drop every lease held by a session
    pub fn release_session(&self, session: SessionId) -> Vec<WorkerLease> {
        let mut workers = self.workers.write();
        let released: Vec<(SessionId, String)> = workers
            .keys()
            .filter(|(owner, _)| *owner == session)
            .cloned()
            .collect();

        released
            .iter()
            .filter_map(|key| workers.remove(key))
            .collect()
    }

    pub fn get(&self, session: SessionId, worker_id: &str) -> Option<WorkerLease> {
        self.workers
            .read()
            .get(&(session, worker_id.to_string()))
            .cloned()
    }

    /// Number of live leases on a queue
    pub fn count(&self, queue: &str) -> usize {
        self.workers
            .read()
            .values()
            .filter(|lease| lease.queue == queue)
            .count()
    }

    pub fn all_workers(&self) -> Vec<WorkerLease> {
        self.workers.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
