use crate::metrics::BrokerMetrics;
use crate::queue::{MessageQueue, QueuedMessage};
use crate::worker_registry::WorkerRegistry;
use crate::{BrokerError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fanout_persistence::QueueStore;
use fanout_protocol::{Delivery, DeliveryTag, StatsResponse};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Identifies one client session (a TCP connection or a local channel)
pub type SessionId = u64;

const MAX_QUEUE_NAME_LEN: usize = 255;

struct Unacked {
    queue: Arc<MessageQueue>,
    message: QueuedMessage,
    session: SessionId,
}

/// All queues of one broker plus the bookkeeping for handed-out messages.
///
/// Pure in-memory engine with optional on-disk backing; it knows nothing about
/// sockets. Every delivery is owned by the session that received it until the
/// session acks or rejects it. Closing a session puts its unsettled messages
/// back at the head of their queues, marked redelivered.
pub struct QueueSet {
    queues: DashMap<String, Arc<MessageQueue>>,
    unacked: Mutex<HashMap<DeliveryTag, Unacked>>,
    workers: WorkerRegistry,
    store: Option<QueueStore>,
    metrics: Arc<BrokerMetrics>,
    next_session: AtomicU64,
    next_tag: AtomicU64,
    next_message_id: AtomicU64,
}

impl QueueSet {
    /// In-memory only; nothing survives a restart
    pub fn in_memory(metrics: Arc<BrokerMetrics>) -> Self {
        QueueSet {
            queues: DashMap::new(),
            unacked: Mutex::new(HashMap::new()),
            workers: WorkerRegistry::new(),
            store: None,
            metrics,
            next_session: AtomicU64::new(1),
            next_tag: AtomicU64::new(1),
            next_message_id: AtomicU64::new(1),
        }
    }

    /// Backed by `store`; durable queues and their persistent messages are reloaded
    pub fn open(store: QueueStore, metrics: Arc<BrokerMetrics>) -> Result<Self> {
        let next_id = store.max_message_id()?.map_or(1, |id| id + 1);
        let queues = DashMap::new();

        for name in store.durable_queues()? {
            let queue = MessageQueue::new(name.clone(), true);
            let messages = store.load_queue(&name)?;
            info!("Recovered queue {} with {} messages", name, messages.len());

            for stored in messages {
                queue.push_back(QueuedMessage {
                    id: stored.id,
                    body: stored.body,
                    persistent: true,
                    redelivered: false,
                });
            }
            metrics.update_queue_depth(&name, queue.len(), 0);
            queues.insert(name, Arc::new(queue));
        }

        Ok(QueueSet {
            queues,
            unacked: Mutex::new(HashMap::new()),
            workers: WorkerRegistry::new(),
            store: Some(store),
            metrics,
            next_session: AtomicU64::new(1),
            next_tag: AtomicU64::new(1),
            next_message_id: AtomicU64::new(next_id),
        })
    }

    pub fn metrics(&self) -> &Arc<BrokerMetrics> {
        &self.metrics
    }

    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    pub fn open_session(&self) -> SessionId {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.metrics.sessions_open.inc();
        debug!("Session {} opened", session);
        session
    }

    /// Requeue everything the session still holds and drop its worker leases
    pub fn close_session(&self, session: SessionId) {
        let mut returned: Vec<(DeliveryTag, Unacked)> = {
            let mut unacked = self.unacked.lock();
            let tags: Vec<DeliveryTag> = unacked
                .iter()
                .filter(|(_, entry)| entry.session == session)
                .map(|(tag, _)| *tag)
                .collect();
            tags.into_iter()
                .filter_map(|tag| unacked.remove(&tag).map(|entry| (tag, entry)))
                .collect()
        };

        // Newest first, so the oldest delivery ends up at the head
        returned.sort_by(|a, b| b.0.cmp(&a.0));
        let requeued = returned.len();
        for (_, entry) in returned {
            self.requeue(entry);
        }

        let released = self.workers.release_session(session);
        for lease in &released {
            self.metrics
                .set_workers(&lease.queue, self.workers.count(&lease.queue));
        }

        self.metrics.sessions_open.dec();
        debug!(
            "Session {} closed: {} messages requeued, {} worker leases released",
            session,
            requeued,
            released.len()
        );
    }

    pub fn declare(&self, name: &str, durable: bool) -> Result<()> {
        validate_queue_name(name)?;

        match self.queues.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                if existing.get().is_durable() != durable {
                    return Err(BrokerError::DurabilityMismatch {
                        queue: name.to_string(),
                        durable: existing.get().is_durable(),
                    });
                }
            }
            Entry::Vacant(slot) => {
                if durable {
                    if let Some(store) = &self.store {
                        store.declare_queue(name)?;
                    }
                }
                slot.insert(Arc::new(MessageQueue::new(name, durable)));
                info!("Declared queue {} (durable={})", name, durable);
            }
        }

        Ok(())
    }

    /// Persistent messages on durable queues are on disk before this returns
    pub fn publish(&self, name: &str, body: Vec<u8>, persistent: bool) -> Result<()> {
        let queue = self.queue(name)?;
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let persistent = persistent && queue.is_durable() && self.store.is_some();

        if persistent {
            if let Some(store) = &self.store {
                store.append(name, id, &body)?;
            }
        }

        queue.push_back(QueuedMessage {
            id,
            body,
            persistent,
            redelivered: false,
        });

        self.metrics.published_total.with_label_values(&[name]).inc();
        self.refresh_depth(&queue);
        Ok(())
    }

    /// Hand out the head of the queue, if any
    pub fn get(&self, session: SessionId, name: &str) -> Result<Option<Delivery>> {
        let queue = self.queue(name)?;
        Ok(self.try_deliver(session, &queue))
    }

    /// Wait until a message is available and hand it out.
    ///
    /// Cancel-safe: dropping the future before it resolves takes nothing from
    /// the queue.
    pub async fn consume(&self, session: SessionId, name: &str) -> Result<Delivery> {
        let queue = self.queue(name)?;

        loop {
            let notified = queue.available().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_deliver(session, &queue) {
                return Ok(delivery);
            }

            notified.await;
        }
    }

    pub fn ack(&self, session: SessionId, tag: DeliveryTag) -> Result<()> {
        let entry = self.take_unacked(session, tag)?;
        self.forget(&entry)?;

        self.metrics
            .acked_total
            .with_label_values(&[entry.queue.name()])
            .inc();
        self.refresh_depth(&entry.queue);
        Ok(())
    }

    pub fn reject(&self, session: SessionId, tag: DeliveryTag, requeue: bool) -> Result<()> {
        let entry = self.take_unacked(session, tag)?;

        if requeue {
            self.requeue(entry);
        } else {
            self.forget(&entry)?;
            self.metrics
                .rejected_total
                .with_label_values(&[entry.queue.name()])
                .inc();
            self.refresh_depth(&entry.queue);
        }
        Ok(())
    }

    pub fn register_worker(&self, session: SessionId, worker_id: &str, queue: &str) -> Result<()> {
        self.queue(queue)?;
        self.workers.register(worker_id, queue, session);
        self.metrics.set_workers(queue, self.workers.count(queue));
        info!("Worker {} registered on {}", worker_id, queue);
        Ok(())
    }

    /// Drop the lease `session` holds for `worker_id`; other sessions' leases are untouched
    pub fn deregister_worker(&self, session: SessionId, worker_id: &str) {
        if let Some(lease) = self.workers.deregister(session, worker_id) {
            self.metrics
                .set_workers(&lease.queue, self.workers.count(&lease.queue));
            info!("Worker {} deregistered from {}", worker_id, lease.queue);
        }
    }

    pub fn worker_count(&self, queue: &str) -> Result<u64> {
        self.queue(queue)?;
        Ok(self.workers.count(queue) as u64)
    }

    pub fn stats(&self, name: &str) -> Result<StatsResponse> {
        let queue = self.queue(name)?;
        Ok(StatsResponse {
            ready: queue.len() as u64,
            unacked: self.unacked_count(name) as u64,
            workers: self.workers.count(name) as u64,
        })
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|q| q.key().clone()).collect();
        names.sort();
        names
    }

    fn queue(&self, name: &str) -> Result<Arc<MessageQueue>> {
        self.queues
            .get(name)
            .map(|queue| queue.value().clone())
            .ok_or_else(|| BrokerError::QueueNotFound(name.to_string()))
    }

    fn try_deliver(&self, session: SessionId, queue: &Arc<MessageQueue>) -> Option<Delivery> {
        let message = queue.pop_front()?;
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);

        let delivery = Delivery {
            tag,
            body: message.body.clone(),
            redelivered: message.redelivered,
        };

        self.unacked.lock().insert(
            tag,
            Unacked {
                queue: queue.clone(),
                message,
                session,
            },
        );

        self.metrics
            .delivered_total
            .with_label_values(&[queue.name()])
            .inc();
        self.refresh_depth(queue);
        Some(delivery)
    }

    fn take_unacked(&self, session: SessionId, tag: DeliveryTag) -> Result<Unacked> {
        let mut unacked = self.unacked.lock();
        let owned = unacked
            .get(&tag)
            .is_some_and(|entry| entry.session == session);
        if !owned {
            return Err(BrokerError::UnknownDeliveryTag(tag));
        }
        unacked
            .remove(&tag)
            .ok_or(BrokerError::UnknownDeliveryTag(tag))
    }

    fn requeue(&self, entry: Unacked) {
        let Unacked {
            queue, mut message, ..
        } = entry;
        message.redelivered = true;
        queue.push_front(message);

        self.metrics
            .requeued_total
            .with_label_values(&[queue.name()])
            .inc();
        self.refresh_depth(&queue);
    }

    fn forget(&self, entry: &Unacked) -> Result<()> {
        if entry.message.persistent {
            if let Some(store) = &self.store {
                store.remove(entry.queue.name(), entry.message.id)?;
            }
        }
        Ok(())
    }

    fn unacked_count(&self, name: &str) -> usize {
        self.unacked
            .lock()
            .values()
            .filter(|entry| entry.queue.name() == name)
            .count()
    }

    fn refresh_depth(&self, queue: &MessageQueue) {
        self.metrics
            .update_queue_depth(queue.name(), queue.len(), self.unacked_count(queue.name()));
    }
}

fn validate_queue_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_QUEUE_NAME_LEN || name.contains('\0') {
        return Err(BrokerError::InvalidQueueName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_persistence::QueueStoreConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    fn queue_set() -> QueueSet {
        QueueSet::in_memory(Arc::new(BrokerMetrics::new().unwrap()))
    }

    fn persistent_set(dir: &TempDir) -> QueueSet {
        let store = QueueStore::open(QueueStoreConfig {
            data_dir: dir.path().to_path_buf(),
        })
        .unwrap();
        QueueSet::open(store, Arc::new(BrokerMetrics::new().unwrap())).unwrap()
    }

    #[test]
    fn test_declare_is_idempotent() {
        let set = queue_set();
        set.declare("work", true).unwrap();
        set.declare("work", true).unwrap();
        assert_eq!(set.queue_names(), vec!["work".to_string()]);
    }

    #[test]
    fn test_declare_durability_mismatch() {
        let set = queue_set();
        set.declare("work", true).unwrap();
        assert!(matches!(
            set.declare("work", false),
            Err(BrokerError::DurabilityMismatch { durable: true, .. })
        ));
    }

    #[test]
    fn test_declare_rejects_bad_names() {
        let set = queue_set();
        assert!(matches!(set.declare("", true), Err(BrokerError::InvalidQueueName(_))));
        assert!(matches!(set.declare("a\0b", true), Err(BrokerError::InvalidQueueName(_))));
    }

    #[test]
    fn test_publish_to_undeclared_queue_fails() {
        let set = queue_set();
        assert!(matches!(
            set.publish("missing", vec![1], true),
            Err(BrokerError::QueueNotFound(_))
        ));
    }

    #[test]
    fn test_competing_consumers_each_message_once() {
        let set = queue_set();
        set.declare("work", true).unwrap();
        for i in 0..4u8 {
            set.publish("work", vec![i], true).unwrap();
        }

        let a = set.open_session();
        let b = set.open_session();
        let mut seen = Vec::new();
        for session in [a, b, a, b] {
            let delivery = set.get(session, "work").unwrap().unwrap();
            seen.push(delivery.body[0]);
            set.ack(session, delivery.tag).unwrap();
        }

        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(set.get(a, "work").unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumers_never_share_a_message() {
        const CONSUMERS: usize = 4;
        const MESSAGES: u32 = 200;

        let set = Arc::new(queue_set());
        set.declare("work", true).unwrap();

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let set = set.clone();
                let session = set.open_session();
                tokio::spawn(async move {
                    let mut bodies = Vec::new();
                    while let Ok(delivery) =
                        tokio::time::timeout(Duration::from_millis(300), set.consume(session, "work")).await
                    {
                        let delivery = delivery.unwrap();
                        bodies.push(u32::from_be_bytes(delivery.body[..4].try_into().unwrap()));
                        set.ack(session, delivery.tag).unwrap();
                        tokio::task::yield_now().await;
                    }
                    bodies
                })
            })
            .collect();

        for i in 0..MESSAGES {
            set.publish("work", i.to_be_bytes().to_vec(), true).unwrap();
        }

        let mut per_consumer = Vec::new();
        for handle in consumers {
            per_consumer.push(handle.await.unwrap());
        }

        let mut all: Vec<u32> = per_consumer.iter().flatten().copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..MESSAGES).collect::<Vec<_>>());

        for (i, left) in per_consumer.iter().enumerate() {
            for right in &per_consumer[i + 1..] {
                assert!(left.iter().all(|body| !right.contains(body)));
            }
        }

        let stats = set.stats("work").unwrap();
        assert_eq!((stats.ready, stats.unacked), (0, 0));
    }

    #[test]
    fn test_ack_from_other_session_is_refused() {
        let set = queue_set();
        set.declare("work", true).unwrap();
        set.publish("work", vec![1], true).unwrap();

        let owner = set.open_session();
        let other = set.open_session();
        let delivery = set.get(owner, "work").unwrap().unwrap();

        assert!(matches!(
            set.ack(other, delivery.tag),
            Err(BrokerError::UnknownDeliveryTag(_))
        ));
        set.ack(owner, delivery.tag).unwrap();
        assert!(matches!(
            set.ack(owner, delivery.tag),
            Err(BrokerError::UnknownDeliveryTag(_))
        ));
    }

    #[test]
    fn test_closed_session_requeues_in_order() {
        let set = queue_set();
        set.declare("work", true).unwrap();
        for i in 0..3u8 {
            set.publish("work", vec![i], true).unwrap();
        }

        let crashed = set.open_session();
        set.get(crashed, "work").unwrap().unwrap();
        set.get(crashed, "work").unwrap().unwrap();
        assert_eq!(set.stats("work").unwrap().unacked, 2);

        set.close_session(crashed);

        let survivor = set.open_session();
        let bodies: Vec<(u8, bool)> = (0..3)
            .map(|_| {
                let d = set.get(survivor, "work").unwrap().unwrap();
                (d.body[0], d.redelivered)
            })
            .collect();
        assert_eq!(bodies, vec![(0, true), (1, true), (2, false)]);
    }

    #[test]
    fn test_reject_without_requeue_discards() {
        let set = queue_set();
        set.declare("work", false).unwrap();
        set.publish("work", vec![1], false).unwrap();

        let session = set.open_session();
        let delivery = set.get(session, "work").unwrap().unwrap();
        set.reject(session, delivery.tag, false).unwrap();

        let stats = set.stats("work").unwrap();
        assert_eq!((stats.ready, stats.unacked), (0, 0));
    }

    #[test]
    fn test_reject_with_requeue_marks_redelivered() {
        let set = queue_set();
        set.declare("work", false).unwrap();
        set.publish("work", vec![1], false).unwrap();

        let session = set.open_session();
        let delivery = set.get(session, "work").unwrap().unwrap();
        assert!(!delivery.redelivered);
        set.reject(session, delivery.tag, true).unwrap();

        let again = set.get(session, "work").unwrap().unwrap();
        assert!(again.redelivered);
        assert_ne!(again.tag, delivery.tag);
    }

    #[test]
    fn test_worker_leases_follow_session() {
        let set = queue_set();
        set.declare("work", true).unwrap();

        let one = set.open_session();
        let two = set.open_session();
        set.register_worker(one, "worker-1", "work").unwrap();
        set.register_worker(two, "worker-2", "work").unwrap();
        assert_eq!(set.worker_count("work").unwrap(), 2);

        set.close_session(one);
        assert_eq!(set.worker_count("work").unwrap(), 1);

        set.deregister_worker(one, "worker-2");
        assert_eq!(set.worker_count("work").unwrap(), 1);

        set.deregister_worker(two, "worker-2");
        assert_eq!(set.worker_count("work").unwrap(), 0);
    }

    #[test]
    fn test_duplicate_worker_ids_keep_separate_leases() {
        let set = queue_set();
        set.declare("work", true).unwrap();

        let a = set.open_session();
        let b = set.open_session();
        set.register_worker(a, "worker-1", "work").unwrap();
        set.register_worker(b, "worker-1", "work").unwrap();
        assert_eq!(set.worker_count("work").unwrap(), 2);

        set.close_session(b);
        assert_eq!(set.worker_count("work").unwrap(), 1);

        set.deregister_worker(b, "worker-1");
        assert_eq!(set.worker_count("work").unwrap(), 1);
        set.deregister_worker(a, "worker-1");
        assert_eq!(set.worker_count("work").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_consume_waits_for_publish() {
        let set = Arc::new(queue_set());
        set.declare("work", true).unwrap();
        let session = set.open_session();

        let consumer = {
            let set = set.clone();
            tokio::spawn(async move { set.consume(session, "work").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        set.publish("work", b"late".to_vec(), true).unwrap();
        let delivery = consumer.await.unwrap().unwrap();
        assert_eq!(delivery.body, b"late");
    }

    #[tokio::test]
    async fn test_cancelled_consume_takes_nothing() {
        let set = queue_set();
        set.declare("work", true).unwrap();
        let session = set.open_session();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), set.consume(session, "work")).await;
        assert!(timed_out.is_err());

        set.publish("work", vec![9], true).unwrap();
        assert_eq!(set.stats("work").unwrap().ready, 1);
    }

    #[test]
    fn test_persistent_messages_survive_restart() {
        let dir = TempDir::new().unwrap();

        {
            let set = persistent_set(&dir);
            set.declare("work", true).unwrap();
            set.declare("scratch", false).unwrap();
            set.publish("work", b"kept".to_vec(), true).unwrap();
            set.publish("work", b"transient".to_vec(), false).unwrap();
            set.publish("work", b"acked".to_vec(), true).unwrap();
            set.publish("scratch", b"gone".to_vec(), true).unwrap();

            let session = set.open_session();
            // Skip past the first two, settle the third
            let first = set.get(session, "work").unwrap().unwrap();
            let second = set.get(session, "work").unwrap().unwrap();
            let third = set.get(session, "work").unwrap().unwrap();
            assert_eq!(third.body, b"acked");
            set.ack(session, third.tag).unwrap();
            set.reject(session, second.tag, true).unwrap();
            set.reject(session, first.tag, true).unwrap();
        }

        let set = persistent_set(&dir);
        assert_eq!(set.queue_names(), vec!["work".to_string()]);

        let session = set.open_session();
        let recovered = set.get(session, "work").unwrap().unwrap();
        assert_eq!(recovered.body, b"kept");
        assert!(set.get(session, "work").unwrap().is_none());

        // Ids keep growing past what was on disk
        set.publish("work", b"new".to_vec(), true).unwrap();
        assert_eq!(set.stats("work").unwrap().ready, 1);
    }
}
