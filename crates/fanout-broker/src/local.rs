use crate::queue_set::{QueueSet, SessionId};
use crate::BrokerError;
use async_trait::async_trait;
use fanout_client::{Channel, ClientError, Delivery, DeliveryTag, StatsResponse};
use std::sync::Arc;

/// In-process session on a [`QueueSet`], with the same semantics as a TCP
/// connection: dropping the channel requeues whatever it still holds.
pub struct LocalChannel {
    queues: Arc<QueueSet>,
    session: SessionId,
}

impl LocalChannel {
    pub fn open(queues: Arc<QueueSet>) -> Self {
        let session = queues.open_session();
        LocalChannel { queues, session }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.queues.close_session(self.session);
    }
}

fn server_error(e: BrokerError) -> ClientError {
    ClientError::ServerError(e.to_string())
}

#[async_trait]
impl Channel for LocalChannel {
    async fn declare_queue(&mut self, queue: &str, durable: bool) -> fanout_client::Result<()> {
        self.queues.declare(queue, durable).map_err(server_error)
    }

    async fn publish(
        &mut self,
        queue: &str,
        body: Vec<u8>,
        persistent: bool,
    ) -> fanout_client::Result<()> {
        self.queues
            .publish(queue, body, persistent)
            .map_err(server_error)
    }

    async fn get(&mut self, queue: &str) -> fanout_client::Result<Option<Delivery>> {
        self.queues.get(self.session, queue).map_err(server_error)
    }

    async fn consume(&mut self, queue: &str) -> fanout_client::Result<Delivery> {
        self.queues
            .consume(self.session, queue)
            .await
            .map_err(server_error)
    }

    async fn ack(&mut self, tag: DeliveryTag) -> fanout_client::Result<()> {
        self.queues.ack(self.session, tag).map_err(server_error)
    }

    async fn reject(&mut self, tag: DeliveryTag, requeue: bool) -> fanout_client::Result<()> {
        self.queues
            .reject(self.session, tag, requeue)
            .map_err(server_error)
    }

    async fn register_worker(&mut self, worker_id: &str, queue: &str) -> fanout_client::Result<()> {
        self.queues
            .register_worker(self.session, worker_id, queue)
            .map_err(server_error)
    }

    async fn deregister_worker(&mut self, worker_id: &str) -> fanout_client::Result<()> {
        self.queues.deregister_worker(self.session, worker_id);
        Ok(())
    }

    async fn worker_count(&mut self, queue: &str) -> fanout_client::Result<u64> {
        self.queues.worker_count(queue).map_err(server_error)
    }

    async fn queue_stats(&mut self, queue: &str) -> fanout_client::Result<StatsResponse> {
        self.queues.stats(queue).map_err(server_error)
    }

    async fn ping(&mut self) -> fanout_client::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::BrokerMetrics;

    #[tokio::test]
    async fn test_drop_requeues_unsettled() {
        let queues = Arc::new(QueueSet::in_memory(Arc::new(BrokerMetrics::new().unwrap())));

        let mut producer = LocalChannel::open(queues.clone());
        producer.declare_queue("work", true).await.unwrap();
        producer.publish("work", b"job".to_vec(), true).await.unwrap();

        {
            let mut crashed = LocalChannel::open(queues.clone());
            let delivery = crashed.consume("work").await.unwrap();
            assert!(!delivery.redelivered);
        }

        let mut survivor = LocalChannel::open(queues);
        let delivery = survivor.get("work").await.unwrap().unwrap();
        assert_eq!(delivery.body, b"job");
        assert!(delivery.redelivered);
    }

    #[tokio::test]
    async fn test_errors_map_to_server_error() {
        let queues = Arc::new(QueueSet::in_memory(Arc::new(BrokerMetrics::new().unwrap())));
        let mut channel = LocalChannel::open(queues);

        match channel.get("missing").await {
            Err(ClientError::ServerError(reason)) => assert!(reason.contains("missing")),
            other => panic!("Expected server error, got {:?}", other),
        }
    }
}
