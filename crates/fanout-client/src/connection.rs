use crate::{Channel, ClientError, Result};
use async_trait::async_trait;
use fanout_protocol::{
    AckRequest, DeclareQueueRequest, Delivery, DeliveryTag, DeregisterWorkerRequest, Message,
    MessageCodec, ProtocolError, PublishRequest, QueueRequest, RegisterWorkerRequest,
    RejectRequest, StatsResponse,
};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

/// A single TCP session with the broker.
///
/// Requests are strictly sequential. If a request future is dropped before its
/// response arrives (e.g. a `consume` cancelled by a timeout) the connection
/// refuses further requests; drop it and let the broker requeue whatever it
/// had handed out.
#[derive(Debug)]
pub struct Connection {
    framed: Framed<TcpStream, MessageCodec>,
    peer: String,
    in_flight: bool,
}

impl Connection {
    /// One connection attempt, no retry
    pub async fn open(broker_address: &str) -> Result<Self> {
        let stream = TcpStream::connect(broker_address)
            .await
            .map_err(|e| ClientError::ConnectionError(e.to_string()))?;
        stream.set_nodelay(true)?;

        Ok(Connection {
            framed: Framed::new(stream, MessageCodec),
            peer: broker_address.to_string(),
            in_flight: false,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    async fn request(&mut self, message: Message) -> Result<Message> {
        if self.in_flight {
            return Err(ClientError::ConnectionError(
                "previous request was abandoned mid-flight".to_string(),
            ));
        }

        let kind = message.message_type();
        self.in_flight = true;
        self.framed.send(message).await.map_err(map_protocol_error)?;

        let response = match self.framed.next().await {
            Some(Ok(Message::Error(err))) => Err(ClientError::ServerError(err.reason)),
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => Err(map_protocol_error(e)),
            None => Err(ClientError::ConnectionError(
                "Connection closed by broker".to_string(),
            )),
        };
        self.in_flight = false;

        debug!("{:?} -> {:?}", kind, response.as_ref().map(|m| m.message_type()));
        response
    }

    async fn expect_ok(&mut self, message: Message) -> Result<()> {
        match self.request(message).await? {
            Message::Ok => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

fn map_protocol_error(e: ProtocolError) -> ClientError {
    match e {
        ProtocolError::IoError(io) => ClientError::ConnectionError(io.to_string()),
        other => ClientError::ProtocolError(other.to_string()),
    }
}

fn unexpected(message: &Message) -> ClientError {
    ClientError::UnexpectedResponse(format!("{:?}", message.message_type()))
}

#[async_trait]
impl Channel for Connection {
    async fn declare_queue(&mut self, queue: &str, durable: bool) -> Result<()> {
        self.expect_ok(Message::DeclareQueue(DeclareQueueRequest {
            queue: queue.to_string(),
            durable,
        }))
        .await
    }

    async fn publish(&mut self, queue: &str, body: Vec<u8>, persistent: bool) -> Result<()> {
        self.expect_ok(Message::Publish(PublishRequest {
            queue: queue.to_string(),
            body,
            persistent,
        }))
        .await
    }

    async fn get(&mut self, queue: &str) -> Result<Option<Delivery>> {
        let request = Message::Get(QueueRequest {
            queue: queue.to_string(),
        });
        match self.request(request).await? {
            Message::Delivery(delivery) => Ok(Some(delivery)),
            Message::Empty => Ok(None),
            other => Err(unexpected(&other)),
        }
    }

    async fn consume(&mut self, queue: &str) -> Result<Delivery> {
        let request = Message::Consume(QueueRequest {
            queue: queue.to_string(),
        });
        match self.request(request).await? {
            Message::Delivery(delivery) => Ok(delivery),
            other => Err(unexpected(&other)),
        }
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<()> {
        self.expect_ok(Message::Ack(AckRequest { tag })).await
    }

    async fn reject(&mut self, tag: DeliveryTag, requeue: bool) -> Result<()> {
        self.expect_ok(Message::Reject(RejectRequest { tag, requeue })).await
    }

    async fn register_worker(&mut self, worker_id: &str, queue: &str) -> Result<()> {
        self.expect_ok(Message::RegisterWorker(RegisterWorkerRequest {
            worker_id: worker_id.to_string(),
            queue: queue.to_string(),
        }))
        .await
    }

    async fn deregister_worker(&mut self, worker_id: &str) -> Result<()> {
        self.expect_ok(Message::DeregisterWorker(DeregisterWorkerRequest {
            worker_id: worker_id.to_string(),
        }))
        .await
    }

    async fn worker_count(&mut self, queue: &str) -> Result<u64> {
        let request = Message::WorkerCount(QueueRequest {
            queue: queue.to_string(),
        });
        match self.request(request).await? {
            Message::Count(count) => Ok(count),
            other => Err(unexpected(&other)),
        }
    }

    async fn queue_stats(&mut self, queue: &str) -> Result<StatsResponse> {
        let request = Message::QueueStats(QueueRequest {
            queue: queue.to_string(),
        });
        match self.request(request).await? {
            Message::Stats(stats) => Ok(stats),
            other => Err(unexpected(&other)),
        }
    }

    async fn ping(&mut self) -> Result<()> {
        self.expect_ok(Message::Ping).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal scripted peer: answers each request with the next canned response
    async fn scripted_broker(responses: Vec<Message>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, MessageCodec);
            for response in responses {
                if framed.next().await.is_none() {
                    return;
                }
                framed.send(response).await.unwrap();
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_get_maps_responses() {
        let delivery = Delivery {
            tag: 1,
            body: b"x".to_vec(),
            redelivered: false,
        };
        let addr = scripted_broker(vec![Message::Delivery(delivery.clone()), Message::Empty]).await;

        let mut conn = Connection::open(&addr).await.unwrap();
        assert_eq!(conn.get("q").await.unwrap(), Some(delivery));
        assert_eq!(conn.get("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_server_error_surfaces() {
        let addr = scripted_broker(vec![Message::error("Queue not found: q")]).await;

        let mut conn = Connection::open(&addr).await.unwrap();
        match conn.publish("q", vec![1], true).await {
            Err(ClientError::ServerError(reason)) => assert!(reason.contains("not found")),
            other => panic!("Expected server error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_connection_is_reported() {
        let addr = scripted_broker(vec![]).await;

        let mut conn = Connection::open(&addr).await.unwrap();
        let err = conn.ping().await.unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_abandoned_request_poisons_connection() {
        // Peer reads the consume request but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, MessageCodec);
            while framed.next().await.is_some() {}
        });

        let mut conn = Connection::open(&addr).await.unwrap();
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(50), conn.consume("q")).await;
        assert!(timed_out.is_err());

        assert!(conn.ping().await.unwrap_err().is_connection_lost());
    }
}
