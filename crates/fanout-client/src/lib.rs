mod channel;
mod connection;
mod connector;

pub use channel::Channel;
pub use connection::Connection;
pub use connector::{Connector, ConnectorConfig};
pub use fanout_protocol::{Delivery, DeliveryTag, StatsResponse};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ClientError {
    /// Whether the underlying connection is gone and further requests will fail
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, ClientError::ConnectionError(_) | ClientError::IoError(_))
    }

    /// Whether the broker refused the request because the queue was never declared
    pub fn is_queue_not_found(&self) -> bool {
        matches!(self, ClientError::ServerError(reason) if reason.starts_with("Queue not found"))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
