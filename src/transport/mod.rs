//! Event Transport module
//!
//! At-least-once channel from the command path to asynchronous consumers.
//! Partition/ordering key is the account id; payload is the JSON event.
//! Delivery is not durability: the event log is written first.

mod memory;
mod redis_streams;

use async_trait::async_trait;

use crate::domain::AccountEvent;

pub use memory::{DeadLetter, InMemorySubscription, InMemoryTransport};
pub use redis_streams::{RedisStreamsSubscription, RedisStreamsTransport};

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Unknown delivery: {0}")]
    UnknownDelivery(String),
}

/// One message handed to a consumer. Stays pending until acked or dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Transport-assigned message id
    pub id: String,
    /// Partition key (account id)
    pub key: String,
    /// Raw JSON payload, decoded by the consumer
    pub payload: String,
}

/// Producer side of the transport
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &AccountEvent) -> Result<(), TransportError>;
}

/// Consumer-group member side of the transport
#[async_trait]
pub trait EventSubscription: Send {
    /// Next messages for this member, redelivering its unacked ones first.
    /// May return an empty batch when nothing is available.
    async fn poll(&mut self, max: usize) -> Result<Vec<Delivery>, TransportError>;

    /// Mark a delivery as processed
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Park a delivery that cannot be processed and ack it, so it stops
    /// blocking the queue
    async fn dead_letter(&mut self, delivery: &Delivery, reason: &str)
        -> Result<(), TransportError>;
}

/// Encode an event as a transport payload
pub fn encode_event(event: &AccountEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

/// Decode a transport payload
pub fn decode_event(payload: &str) -> Result<AccountEvent, serde_json::Error> {
    serde_json::from_str(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountId;
    use chrono::Utc;

    #[test]
    fn test_codec() {
        let event = AccountEvent::created(AccountId::new("k").unwrap(), Utc::now());
        let payload = encode_event(&event).unwrap();
        assert_eq!(decode_event(&payload).unwrap(), event);
        assert!(decode_event("{\"type\":\"Nope\"}").is_err());
    }
}
