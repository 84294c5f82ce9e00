use crate::Result;
use async_trait::async_trait;
use fanout_protocol::{Delivery, DeliveryTag, StatsResponse};

/// Operations a producer, worker or aggregator needs from the broker.
///
/// Every delivery handed out through a channel stays owned by that channel
/// until it is acked or rejected; if the channel goes away first the broker
/// puts the message back for someone else.
#[async_trait]
pub trait Channel: Send {
    /// Create the queue if missing; redeclaring with the same durability is a no-op
    async fn declare_queue(&mut self, queue: &str, durable: bool) -> Result<()>;

    /// Returns once the broker has accepted (and, if persistent, stored) the message
    async fn publish(&mut self, queue: &str, body: Vec<u8>, persistent: bool) -> Result<()>;

    /// Non-blocking fetch
    async fn get(&mut self, queue: &str) -> Result<Option<Delivery>>;

    /// Waits until a message is available
    async fn consume(&mut self, queue: &str) -> Result<Delivery>;

    async fn ack(&mut self, tag: DeliveryTag) -> Result<()>;

    async fn reject(&mut self, tag: DeliveryTag, requeue: bool) -> Result<()>;

    /// Take a worker lease on `queue`, held until deregistered or the channel closes
    async fn register_worker(&mut self, worker_id: &str, queue: &str) -> Result<()>;

    async fn deregister_worker(&mut self, worker_id: &str) -> Result<()>;

    /// Live worker leases on `queue`
    async fn worker_count(&mut self, queue: &str) -> Result<u64>;

    async fn queue_stats(&mut self, queue: &str) -> Result<StatsResponse>;

    async fn ping(&mut self) -> Result<()>;
}
