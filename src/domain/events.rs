//! Broker contract shared by the three participants.
//!
//! Payloads are JSON. Decoding ignores unknown fields so producers may add
//! fields without breaking older consumers.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::errors::DomainError;

pub const TOPIC_ORDER_CREATED: &str = "order.created";
pub const TOPIC_PAYMENT_COMPLETED: &str = "payment.completed";
pub const TOPIC_DELIVERY_STATUS_UPDATED: &str = "delivery.status.updated";

/// Suffix appended to a topic name to form its dead-letter topic.
pub const DEAD_LETTER_SUFFIX: &str = ".dlq";

pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}{DEAD_LETTER_SUFFIX}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItemPayload {
    pub product_id: String,
    pub quantity: i32,
    pub price: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub order_id: Uuid,
    pub user_id: String,
    pub items: Vec<OrderItemPayload>,
    pub total_amount: BigDecimal,
    pub delivery_address: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCompletedEvent {
    pub order_id: Uuid,
    pub payment_id: Uuid,
    pub user_id: String,
    pub amount: BigDecimal,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStatusUpdatedEvent {
    pub order_id: Uuid,
    pub delivery_id: Uuid,
    pub status: String,
    pub tracking_number: String,
    #[serde(alias = "estimated_delivery")]
    pub estimated_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_location: Option<String>,
    /// Stages applied so far; absent from older producers.
    #[serde(default)]
    pub step: i32,
}

/// An event waiting in a participant's outbox, keyed for partitioning.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub topic: String,
    pub key: String,
    pub payload: Value,
}

impl OutboxMessage {
    pub fn new<T: Serialize>(topic: &str, order_id: Uuid, event: &T) -> Result<Self, DomainError> {
        let payload = serde_json::to_value(event)
            .map_err(|e| DomainError::Storage(format!("cannot encode {topic} event: {e}")))?;
        Ok(Self {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            key: order_id.to_string(),
            payload,
        })
    }
}

/// Decode a broker payload. Any failure is a validation error, which the
/// consumer treats as a poison message.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, DomainError> {
    Ok(serde_json::from_slice(payload)?)
}
