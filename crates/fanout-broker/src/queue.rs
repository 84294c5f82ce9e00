use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// A message waiting in, or handed out from, a queue
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Broker-wide id, also the on-disk key for persistent messages
    pub id: u64,
    pub body: Vec<u8>,
    /// Stored on disk until settled
    pub persistent: bool,
    pub redelivered: bool,
}

/// FIFO of ready messages for one named queue
pub struct MessageQueue {
    name: String,
    durable: bool,
    ready: Mutex<VecDeque<QueuedMessage>>,
    available: Notify,
}

impl MessageQueue {
    pub fn new(name: impl Into<String>, durable: bool) -> Self {
        MessageQueue {
            name: name.into(),
            durable,
            ready: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Append a freshly published message
    pub fn push_back(&self, message: QueuedMessage) {
        self.ready.lock().push_back(message);
        self.available.notify_one();
    }

    /// Return a message to the head of the queue (requeue)
    pub fn push_front(&self, message: QueuedMessage) {
        self.ready.lock().push_front(message);
        self.available.notify_one();
    }

    pub fn pop_front(&self) -> Option<QueuedMessage> {
        self.ready.lock().pop_front()
    }

    /// Number of ready (not handed out) messages
    pub fn len(&self) -> usize {
        self.ready.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wakes consumers parked on this queue
    pub fn available(&self) -> &Notify {
        &self.available
    }
}
