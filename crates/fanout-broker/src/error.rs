use fanout_protocol::DeliveryTag;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Invalid queue name: {0:?}")]
    InvalidQueueName(String),

    #[error("Queue {queue} already declared with durable={durable}")]
    DurabilityMismatch { queue: String, durable: bool },

    #[error("Unknown delivery tag {0} on this session")]
    UnknownDeliveryTag(DeliveryTag),

    #[error("Persistence error: {0}")]
    Persistence(#[from] fanout_persistence::PersistenceError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] fanout_protocol::ProtocolError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
