use serde::{Deserialize, Serialize};

/// Broker-assigned handle for one delivery, used to ack or reject it
pub type DeliveryTag = u64;

/// Message types for the TCP protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    DeclareQueue = 1,
    Publish = 2,
    Get = 3,
    Consume = 4,
    Ack = 5,
    Reject = 6,
    RegisterWorker = 7,
    DeregisterWorker = 8,
    WorkerCount = 9,
    QueueStats = 10,
    Ping = 11,

    Ok = 20,
    Delivery = 21,
    Empty = 22,
    Count = 23,
    Stats = 24,
    Error = 25,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::DeclareQueue),
            2 => Some(MessageType::Publish),
            3 => Some(MessageType::Get),
            4 => Some(MessageType::Consume),
            5 => Some(MessageType::Ack),
            6 => Some(MessageType::Reject),
            7 => Some(MessageType::RegisterWorker),
            8 => Some(MessageType::DeregisterWorker),
            9 => Some(MessageType::WorkerCount),
            10 => Some(MessageType::QueueStats),
            11 => Some(MessageType::Ping),
            20 => Some(MessageType::Ok),
            21 => Some(MessageType::Delivery),
            22 => Some(MessageType::Empty),
            23 => Some(MessageType::Count),
            24 => Some(MessageType::Stats),
            25 => Some(MessageType::Error),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Protocol messages. Requests flow client to broker; every request gets
/// exactly one response, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Create a queue if it does not exist yet
    DeclareQueue(DeclareQueueRequest),

    /// Append a message to a queue
    Publish(PublishRequest),

    /// Non-blocking fetch; answered with `Delivery` or `Empty`
    Get(QueueRequest),

    /// Blocking fetch; answered with `Delivery` once one is available
    Consume(QueueRequest),

    /// Settle a delivery as processed
    Ack(AckRequest),

    /// Settle a delivery as not processed
    Reject(RejectRequest),

    /// Take a worker lease on a queue for the lifetime of the connection
    RegisterWorker(RegisterWorkerRequest),

    DeregisterWorker(DeregisterWorkerRequest),

    /// Number of live worker leases on a queue; answered with `Count`
    WorkerCount(QueueRequest),

    /// Answered with `Stats`
    QueueStats(QueueRequest),

    Ping,

    Ok,

    Delivery(Delivery),

    Empty,

    Count(u64),

    Stats(StatsResponse),

    Error(ErrorResponse),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::DeclareQueue(_) => MessageType::DeclareQueue,
            Message::Publish(_) => MessageType::Publish,
            Message::Get(_) => MessageType::Get,
            Message::Consume(_) => MessageType::Consume,
            Message::Ack(_) => MessageType::Ack,
            Message::Reject(_) => MessageType::Reject,
            Message::RegisterWorker(_) => MessageType::RegisterWorker,
            Message::DeregisterWorker(_) => MessageType::DeregisterWorker,
            Message::WorkerCount(_) => MessageType::WorkerCount,
            Message::QueueStats(_) => MessageType::QueueStats,
            Message::Ping => MessageType::Ping,
            Message::Ok => MessageType::Ok,
            Message::Delivery(_) => MessageType::Delivery,
            Message::Empty => MessageType::Empty,
            Message::Count(_) => MessageType::Count,
            Message::Stats(_) => MessageType::Stats,
            Message::Error(_) => MessageType::Error,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Message::Error(ErrorResponse {
            reason: reason.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclareQueueRequest {
    pub queue: String,
    /// Durable queues and their persistent messages survive a broker restart
    pub durable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub queue: String,
    pub body: Vec<u8>,
    /// Write the message to disk before confirming
    pub persistent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRequest {
    pub queue: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckRequest {
    pub tag: DeliveryTag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectRequest {
    pub tag: DeliveryTag,
    /// Put the message back at the head of its queue instead of dropping it
    pub requeue: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterWorkerRequest {
    pub worker_id: String,
    pub queue: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeregisterWorkerRequest {
    pub worker_id: String,
}

/// A message handed to exactly one consumer until it is settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub body: Vec<u8>,
    /// Set when an earlier holder went away without settling it
    pub redelivered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsResponse {
    pub ready: u64,
    pub unacked: u64,
    pub workers: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::from_u8(1), Some(MessageType::DeclareQueue));
        assert_eq!(MessageType::from_u8(11), Some(MessageType::Ping));
        assert_eq!(MessageType::from_u8(25), Some(MessageType::Error));
        assert_eq!(MessageType::from_u8(12), None);
        assert_eq!(MessageType::from_u8(99), None);

        assert_eq!(MessageType::Publish.as_u8(), 2);
        assert_eq!(MessageType::Delivery.as_u8(), 21);
    }

    #[test]
    fn test_every_variant_maps_back() {
        let messages = vec![
            Message::Ping,
            Message::Ok,
            Message::Empty,
            Message::Count(3),
            Message::error("nope"),
            Message::Get(QueueRequest { queue: "q".into() }),
        ];
        for message in messages {
            let ty = message.message_type();
            assert_eq!(MessageType::from_u8(ty.as_u8()), Some(ty));
        }
    }
}
