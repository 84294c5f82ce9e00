use crate::queue_set::{QueueSet, SessionId};
use crate::{config::BrokerConfig, metrics::BrokerMetrics, Result};
use fanout_persistence::QueueStore;
use fanout_protocol::{Message, MessageCodec};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Main broker server
pub struct Broker {
    config: Arc<BrokerConfig>,
    queues: Arc<QueueSet>,
    metrics: Arc<BrokerMetrics>,
    shutdown: CancellationToken,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Result<Self> {
        let metrics = Arc::new(BrokerMetrics::new()?);

        let queues = match config.to_store_config() {
            Some(store_config) => {
                let store = QueueStore::open(store_config)?;
                QueueSet::open(store, metrics.clone())?
            }
            None => {
                warn!("Persistence disabled, queues will not survive a restart");
                QueueSet::in_memory(metrics.clone())
            }
        };

        Ok(Broker {
            config: Arc::new(config),
            queues: Arc::new(queues),
            metrics,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn queues(&self) -> &Arc<QueueSet> {
        &self.queues
    }

    pub fn metrics(&self) -> &Arc<BrokerMetrics> {
        &self.metrics
    }

    /// Start the broker server on the configured address
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let addr = self.config.listen_address();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until shutdown
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("Broker listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New connection from {}", addr);
                            let broker = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = broker.handle_connection(stream).await {
                                    error!("Connection error from {}: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutting down broker");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Stop accepting connections; a later `serve` returns immediately
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// One connection is one session; whatever it leaves unsettled is requeued
    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        let session = self.queues.open_session();
        let (mut sink, mut stream) = Framed::new(stream, MessageCodec).split();

        let result = loop {
            let message = match stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    warn!("Protocol error on session {}: {}", session, e);
                    break Ok(());
                }
                None => break Ok(()),
            };

            let response = match message {
                Message::Consume(req) => {
                    // A blocked consume must still notice the client going away
                    tokio::select! {
                        delivery = self.queues.consume(session, &req.queue) => {
                            respond(delivery.map(Message::Delivery))
                        }
                        _ = stream.next() => {
                            debug!("Session {} left while waiting on {}", session, req.queue);
                            break Ok(());
                        }
                    }
                }
                other => self.handle_message(session, other),
            };

            if let Err(e) = sink.send(response).await {
                break Err(e.into());
            }
        };

        self.queues.close_session(session);
        result
    }

    /// Handle every request that answers without waiting
    fn handle_message(&self, session: SessionId, message: Message) -> Message {
        let queues = &self.queues;
        match message {
            Message::DeclareQueue(req) => respond(
                queues
                    .declare(&req.queue, req.durable)
                    .map(|_| Message::Ok),
            ),
            Message::Publish(req) => respond(
                queues
                    .publish(&req.queue, req.body, req.persistent)
                    .map(|_| Message::Ok),
            ),
            Message::Get(req) => respond(queues.get(session, &req.queue).map(|delivery| {
                delivery.map_or(Message::Empty, Message::Delivery)
            })),
            Message::Ack(req) => respond(queues.ack(session, req.tag).map(|_| Message::Ok)),
            Message::Reject(req) => respond(
                queues
                    .reject(session, req.tag, req.requeue)
                    .map(|_| Message::Ok),
            ),
            Message::RegisterWorker(req) => respond(
                queues
                    .register_worker(session, &req.worker_id, &req.queue)
                    .map(|_| Message::Ok),
            ),
            Message::DeregisterWorker(req) => {
                queues.deregister_worker(session, &req.worker_id);
                Message::Ok
            }
            Message::WorkerCount(req) => respond(queues.worker_count(&req.queue).map(Message::Count)),
            Message::QueueStats(req) => respond(queues.stats(&req.queue).map(Message::Stats)),
            Message::Ping => Message::Ok,
            other => Message::error(format!(
                "Unsupported message type: {:?}",
                other.message_type()
            )),
        }
    }
}

fn respond(result: Result<Message>) -> Message {
    match result {
        Ok(message) => message,
        Err(e) => {
            debug!("Request failed: {}", e);
            Message::error(e.to_string())
        }
    }
}
