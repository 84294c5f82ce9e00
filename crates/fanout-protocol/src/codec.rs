use crate::{Message, MessageType, ProtocolError, Result, MAX_MESSAGE_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Codec for encoding/decoding messages with length-prefixed framing
///
/// Frame format: [4-byte length (big-endian)] [1-byte message type] [payload]
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        // Need at least 5 bytes for length prefix + message type
        if src.len() < 5 {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[0..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length == 0 {
            return Err(ProtocolError::EmptyFrame);
        }
        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(length));
        }

        // Wait for complete message
        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);

        let msg_type_byte = src.get_u8();
        let msg_type = MessageType::from_u8(msg_type_byte)
            .ok_or(ProtocolError::InvalidMessageType(msg_type_byte))?;

        let payload = src.split_to(length - 1);

        let message = match msg_type {
            MessageType::DeclareQueue => Message::DeclareQueue(bincode::deserialize(&payload)?),
            MessageType::Publish => Message::Publish(bincode::deserialize(&payload)?),
            MessageType::Get => Message::Get(bincode::deserialize(&payload)?),
            MessageType::Consume => Message::Consume(bincode::deserialize(&payload)?),
            MessageType::Ack => Message::Ack(bincode::deserialize(&payload)?),
            MessageType::Reject => Message::Reject(bincode::deserialize(&payload)?),
            MessageType::RegisterWorker => Message::RegisterWorker(bincode::deserialize(&payload)?),
            MessageType::DeregisterWorker => {
                Message::DeregisterWorker(bincode::deserialize(&payload)?)
            }
            MessageType::WorkerCount => Message::WorkerCount(bincode::deserialize(&payload)?),
            MessageType::QueueStats => Message::QueueStats(bincode::deserialize(&payload)?),
            MessageType::Ping => Message::Ping,
            MessageType::Ok => Message::Ok,
            MessageType::Delivery => Message::Delivery(bincode::deserialize(&payload)?),
            MessageType::Empty => Message::Empty,
            MessageType::Count => Message::Count(bincode::deserialize(&payload)?),
            MessageType::Stats => Message::Stats(bincode::deserialize(&payload)?),
            MessageType::Error => Message::Error(bincode::deserialize(&payload)?),
        };

        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let payload = match &item {
            Message::DeclareQueue(req) => bincode::serialize(req)?,
            Message::Publish(req) => bincode::serialize(req)?,
            Message::Get(req) | Message::Consume(req) => bincode::serialize(req)?,
            Message::WorkerCount(req) | Message::QueueStats(req) => bincode::serialize(req)?,
            Message::Ack(req) => bincode::serialize(req)?,
            Message::Reject(req) => bincode::serialize(req)?,
            Message::RegisterWorker(req) => bincode::serialize(req)?,
            Message::DeregisterWorker(req) => bincode::serialize(req)?,
            Message::Delivery(delivery) => bincode::serialize(delivery)?,
            Message::Count(count) => bincode::serialize(count)?,
            Message::Stats(stats) => bincode::serialize(stats)?,
            Message::Error(resp) => bincode::serialize(resp)?,
            Message::Ping | Message::Ok | Message::Empty => Vec::new(),
        };

        let total_length = 1 + payload.len(); // message type + payload
        if total_length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(total_length));
        }

        dst.reserve(4 + total_length);
        dst.put_u32(total_length as u32);
        dst.put_u8(item.message_type().as_u8());
        dst.put_slice(&payload);

        Ok(())
    }
}
