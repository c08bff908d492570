use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::schema::{deliveries, delivery_statuses, orders, outbox_events, payments, user_balances};

// ── Orders ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderRow {
    pub id: Uuid,
    pub user_id: String,
    pub status: String,
    pub total_amount: BigDecimal,
    pub delivery_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = orders)]
pub struct NewOrderRow {
    pub id: Uuid,
    pub user_id: String,
    pub status: String,
    pub total_amount: BigDecimal,
    pub delivery_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable, AsChangeset)]
#[diesel(table_name = delivery_statuses)]
#[diesel(primary_key(order_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DeliveryStatusRow {
    pub order_id: Uuid,
    pub status: String,
    pub tracking_number: String,
    pub estimated_delivery: String,
    #[diesel(treat_none_as_null = true)]
    pub current_location: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub step: i32,
}

// ── Outbox ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = outbox_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OutboxEventRow {
    pub seq: i64,
    pub id: Uuid,
    pub topic: String,
    pub message_key: String,
    pub payload: Value,
    pub sent: bool,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// `seq` is assigned by the database so rows sort in commit order.
#[derive(Debug, Insertable)]
#[diesel(table_name = outbox_events)]
pub struct NewOutboxEventRow {
    pub id: Uuid,
    pub topic: String,
    pub message_key: String,
    pub payload: Value,
}

// ── Payments ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable)]
#[diesel(table_name = payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PaymentRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: String,
    pub amount: BigDecimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable)]
#[diesel(table_name = user_balances)]
#[diesel(primary_key(user_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserBalanceRow {
    pub user_id: String,
    pub balance: BigDecimal,
    pub updated_at: DateTime<Utc>,
}

// ── Deliveries ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable)]
#[diesel(table_name = deliveries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DeliveryRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: String,
    pub address: String,
    pub status: String,
    pub step: i32,
    pub tracking_number: String,
    pub current_location: String,
    pub estimated_delivery: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
