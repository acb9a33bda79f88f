//! Event envelope and the domain events carried on the bus.
//!
//! The envelope is the wire contract: `{type, id, idempotencyKey, occurredAt,
//! data}`. `type` doubles as the routing key. `idempotencyKey` is stable
//! across the whole causal chain of one order and is the only valid dedup
//! key; `id` is unique per publish and changes on every republish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::contracts::routing_key;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub id: String,
    #[serde(rename = "idempotencyKey")]
    pub idempotency_key: String,
    #[serde(rename = "occurredAt")]
    pub occurred_at: DateTime<Utc>,
    pub data: Value,
}

impl Envelope {
    /// Wraps a domain event for publication, minting a fresh delivery id.
    pub fn new(event: &DomainEvent, idempotency_key: impl Into<String>) -> Self {
        Self {
            event_type: event.routing_key().to_string(),
            id: format!("evt_{}", Uuid::new_v4()),
            idempotency_key: idempotency_key.into(),
            occurred_at: Utc::now(),
            data: event.data(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Started,
    InventoryReserved,
    PaymentCompleted,
    Completed,
    Failed,
    Compensating,
}

impl SagaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Started => "started",
            SagaStatus::InventoryReserved => "inventory_reserved",
            SagaStatus::PaymentCompleted => "payment_completed",
            SagaStatus::Completed => "completed",
            SagaStatus::Failed => "failed",
            SagaStatus::Compensating => "compensating",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(SagaStatus::Started),
            "inventory_reserved" => Some(SagaStatus::InventoryReserved),
            "payment_completed" => Some(SagaStatus::PaymentCompleted),
            "completed" => Some(SagaStatus::Completed),
            "failed" => Some(SagaStatus::Failed),
            "compensating" => Some(SagaStatus::Compensating),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub sku: String,
    pub qty: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: String,
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    pub order_id: String,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveSucceeded {
    pub order_id: String,
    pub reserved_items: Vec<OrderItem>,
    pub total_amount: f64,
}

/// One line item the inventory engine could not satisfy.
///
/// Field names are part of the wire contract and stay snake_case:
/// `{sku, reason, available_stock, requested}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnavailableItem {
    pub sku: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_stock: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<i32>,
}

impl UnavailableItem {
    pub fn not_found(sku: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            reason: "product_not_found".to_string(),
            available_stock: None,
            requested: None,
        }
    }

    pub fn insufficient(sku: impl Into<String>, available_stock: i32, requested: i32) -> Self {
        Self {
            sku: sku.into(),
            reason: "insufficient_stock".to_string(),
            available_stock: Some(available_stock),
            requested: Some(requested),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveFailed {
    pub order_id: String,
    pub unavailable_items: Vec<UnavailableItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub order_id: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSucceeded {
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailed {
    pub order_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRelease {
    pub order_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    pub order_id: String,
    pub customer_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaCompleted {
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaFailed {
    pub order_id: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable_items: Option<Vec<UnavailableItem>>,
}

/// Closed union of every event type on the bus, one variant per routing key.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    OrderCreated(OrderCreated),
    ReserveRequest(ReserveRequest),
    ReserveSucceeded(ReserveSucceeded),
    ReserveFailed(ReserveFailed),
    PaymentRequest(PaymentRequest),
    PaymentSucceeded(PaymentSucceeded),
    PaymentFailed(PaymentFailed),
    InventoryRelease(InventoryRelease),
    NotifyRequest(NotifyRequest),
    SagaCompleted(SagaCompleted),
    SagaFailed(SagaFailed),
}

/// Why an envelope could not be turned into a [`DomainEvent`].
///
/// An unknown type is a policy decision for the consumer (log and ack);
/// a malformed payload of a known type is a structural error (drop).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown event type: {0}")]
    UnknownType(String),
    #[error("malformed {event_type} payload: {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DomainEvent {
    pub fn routing_key(&self) -> &'static str {
        match self {
            DomainEvent::OrderCreated(_) => routing_key::ORDER_CREATED,
            DomainEvent::ReserveRequest(_) => routing_key::RESERVE_REQUEST,
            DomainEvent::ReserveSucceeded(_) => routing_key::RESERVE_SUCCEEDED,
            DomainEvent::ReserveFailed(_) => routing_key::RESERVE_FAILED,
            DomainEvent::PaymentRequest(_) => routing_key::PAYMENT_REQUEST,
            DomainEvent::PaymentSucceeded(_) => routing_key::PAYMENT_SUCCEEDED,
            DomainEvent::PaymentFailed(_) => routing_key::PAYMENT_FAILED,
            DomainEvent::InventoryRelease(_) => routing_key::INVENTORY_RELEASE,
            DomainEvent::NotifyRequest(_) => routing_key::NOTIFY_REQUEST,
            DomainEvent::SagaCompleted(_) => routing_key::SAGA_COMPLETED,
            DomainEvent::SagaFailed(_) => routing_key::SAGA_FAILED,
        }
    }

    pub fn data(&self) -> Value {
        let value = match self {
            DomainEvent::OrderCreated(d) => serde_json::to_value(d),
            DomainEvent::ReserveRequest(d) => serde_json::to_value(d),
            DomainEvent::ReserveSucceeded(d) => serde_json::to_value(d),
            DomainEvent::ReserveFailed(d) => serde_json::to_value(d),
            DomainEvent::PaymentRequest(d) => serde_json::to_value(d),
            DomainEvent::PaymentSucceeded(d) => serde_json::to_value(d),
            DomainEvent::PaymentFailed(d) => serde_json::to_value(d),
            DomainEvent::InventoryRelease(d) => serde_json::to_value(d),
            DomainEvent::NotifyRequest(d) => serde_json::to_value(d),
            DomainEvent::SagaCompleted(d) => serde_json::to_value(d),
            DomainEvent::SagaFailed(d) => serde_json::to_value(d),
        };
        value.expect("event payloads serialize to JSON")
    }

    /// Decodes the typed event out of a raw envelope.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, DecodeError> {
        fn decode<T: serde::de::DeserializeOwned>(
            event_type: &str,
            data: &Value,
        ) -> Result<T, DecodeError> {
            serde_json::from_value(data.clone()).map_err(|source| DecodeError::Malformed {
                event_type: event_type.to_string(),
                source,
            })
        }

        let ty = envelope.event_type.as_str();
        let event = match ty {
            routing_key::ORDER_CREATED => DomainEvent::OrderCreated(decode(ty, &envelope.data)?),
            routing_key::RESERVE_REQUEST => {
                DomainEvent::ReserveRequest(decode(ty, &envelope.data)?)
            }
            routing_key::RESERVE_SUCCEEDED => {
                DomainEvent::ReserveSucceeded(decode(ty, &envelope.data)?)
            }
            routing_key::RESERVE_FAILED => DomainEvent::ReserveFailed(decode(ty, &envelope.data)?),
            routing_key::PAYMENT_REQUEST => {
                DomainEvent::PaymentRequest(decode(ty, &envelope.data)?)
            }
            routing_key::PAYMENT_SUCCEEDED => {
                DomainEvent::PaymentSucceeded(decode(ty, &envelope.data)?)
            }
            routing_key::PAYMENT_FAILED => DomainEvent::PaymentFailed(decode(ty, &envelope.data)?),
            routing_key::INVENTORY_RELEASE => {
                DomainEvent::InventoryRelease(decode(ty, &envelope.data)?)
            }
            routing_key::NOTIFY_REQUEST => DomainEvent::NotifyRequest(decode(ty, &envelope.data)?),
            routing_key::SAGA_COMPLETED => DomainEvent::SagaCompleted(decode(ty, &envelope.data)?),
            routing_key::SAGA_FAILED => DomainEvent::SagaFailed(decode(ty, &envelope.data)?),
            other => return Err(DecodeError::UnknownType(other.to_string())),
        };
        Ok(event)
    }
}
