use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::products)]
pub struct Product {
    pub sku: String,
    pub name: String,
    pub total_stock: i32,
    pub reserved_stock: i32,
    pub unit_price: BigDecimal,
}

impl Product {
    pub fn available(&self) -> i32 {
        self.total_stock - self.reserved_stock
    }
}

/// Catalog entry loaded at startup. Re-seeding updates the catalog side of
/// a product but never touches its reserved stock.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::products)]
pub struct SeedProduct {
    pub sku: String,
    pub name: String,
    pub total_stock: i32,
    pub unit_price: BigDecimal,
}

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::reservations)]
pub struct Reservation {
    pub id: i64,
    pub idempotency_key: String,
    pub order_id: String,
    pub sku: String,
    pub quantity: i32,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::reservations)]
pub struct NewReservation {
    pub idempotency_key: String,
    pub order_id: String,
    pub sku: String,
    pub quantity: i32,
    pub status: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::processed_messages)]
pub struct NewProcessedMessage {
    pub message_id: String,
    pub idempotency_key: String,
    pub event_type: String,
}

/// Point-in-time stock level for the periodic status report.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductStatus {
    pub sku: String,
    pub name: String,
    pub total_stock: i32,
    pub reserved_stock: i32,
}

impl ProductStatus {
    pub fn available(&self) -> i32 {
        self.total_stock - self.reserved_stock
    }
}
