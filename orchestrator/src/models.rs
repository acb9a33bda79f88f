use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use shared::SagaStatus;

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::sagas)]
pub struct Saga {
    pub saga_id: Uuid,
    pub idempotency_key: String,
    pub order_id: String,
    pub customer_id: String,
    pub status: String,
    pub current_step: String,
    pub order_data: Value,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Saga {
    /// Unparseable status strings count as failed rather than panicking
    /// mid-consume.
    pub fn status(&self) -> SagaStatus {
        SagaStatus::parse(&self.status).unwrap_or(SagaStatus::Failed)
    }
}

/// An outbox row that still has to reach the broker.
#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct PendingEvent {
    pub id: i64,
    pub idempotency_key: String,
    pub event_type: String,
    pub payload: Value,
    pub published: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub idempotency_key: String,
    pub event_type: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::processed_messages)]
pub struct NewProcessedMessage {
    pub message_id: String,
    pub idempotency_key: String,
    pub event_type: String,
}
