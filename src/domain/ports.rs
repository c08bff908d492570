use std::sync::Arc;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::deadline::Deadline;
use super::delivery::{DeliveryCreation, DeliveryView, NewDelivery, Stage};
use super::errors::DomainError;
use super::events::OutboxMessage;
use super::order::{DeliveryStatusView, NewOrder, OrderStatus, OrderView, StatusChange};
use super::payment::{PaymentRequest, PaymentView, Settlement};

pub trait OrderRepository: Send + Sync + 'static {
    /// Persist the order and its announcing event atomically. Nothing is
    /// committed once `deadline` has passed.
    fn create(
        &self,
        order: &NewOrder,
        event: &OutboxMessage,
        deadline: Deadline,
    ) -> Result<(), DomainError>;
    fn find_by_id(&self, id: Uuid) -> Result<Option<OrderView>, DomainError>;
    fn apply_payment_outcome(
        &self,
        id: Uuid,
        status: OrderStatus,
    ) -> Result<Option<StatusChange>, DomainError>;
    /// Upsert the read model; returns false when the update was stale.
    /// Unknown orders are `NotFound`.
    fn upsert_delivery_status(&self, status: &DeliveryStatusView) -> Result<bool, DomainError>;
    fn find_delivery_status(&self, order_id: Uuid)
        -> Result<Option<DeliveryStatusView>, DomainError>;
}

pub trait PaymentRepository: Send + Sync + 'static {
    /// Lock (or open) the user's balance, short-circuit if the order was
    /// already settled, otherwise write the payment, the debit and the
    /// outcome event in one transaction, unless `deadline` has passed.
    fn settle(
        &self,
        request: &PaymentRequest,
        opening_balance: &BigDecimal,
        deadline: Deadline,
    ) -> Result<Settlement, DomainError>;
    fn latest_for_order(&self, order_id: Uuid) -> Result<Option<PaymentView>, DomainError>;
    fn balance(&self, user_id: &str) -> Result<Option<BigDecimal>, DomainError>;
    fn set_balance(
        &self,
        user_id: &str,
        balance: &BigDecimal,
        deadline: Deadline,
    ) -> Result<(), DomainError>;
}

pub trait DeliveryRepository: Send + Sync + 'static {
    /// Insert the delivery and its first status event, or return the
    /// existing delivery for the order. Nothing is committed once
    /// `deadline` has passed.
    fn create(
        &self,
        delivery: &NewDelivery,
        event: &OutboxMessage,
        deadline: Deadline,
    ) -> Result<DeliveryCreation, DomainError>;
    fn find_by_order(&self, order_id: Uuid) -> Result<Option<DeliveryView>, DomainError>;
    fn find_by_id(&self, id: Uuid) -> Result<Option<DeliveryView>, DomainError>;
    /// Apply `stage` only if the delivery is still at `from_step`.
    /// Returns false when another run got there first.
    fn advance(
        &self,
        id: Uuid,
        from_step: i32,
        stage: &Stage,
        now: DateTime<Utc>,
        event: &OutboxMessage,
    ) -> Result<bool, DomainError>;
    /// Deliveries with stages still to apply.
    fn in_progress(&self) -> Result<Vec<DeliveryView>, DomainError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    pub seq: i64,
    pub message: OutboxMessage,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}

pub trait OutboxStore: Send + Sync + 'static {
    /// Unsent rows in creation order.
    fn pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, DomainError>;
    fn mark_sent(&self, id: Uuid) -> Result<(), DomainError>;
    fn record_failure(&self, id: Uuid, error: &str) -> Result<(), DomainError>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync + 'static {
    /// Resolves once the broker has acknowledged the message.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), DomainError>;
}

/// A participant's reaction to broker messages.
pub trait EventHandler: Send + Sync + 'static {
    fn topics(&self) -> Vec<&'static str>;
    fn handle(&self, topic: &str, payload: &[u8]) -> Result<(), DomainError>;
}

// ── Shared handles ───────────────────────────────────────────────────────────
//
// Services are generic over their repository; the HTTP layer and the
// binaries share one `Arc<dyn ...>` between them.

impl<R: OrderRepository + ?Sized> OrderRepository for Arc<R> {
    fn create(
        &self,
        order: &NewOrder,
        event: &OutboxMessage,
        deadline: Deadline,
    ) -> Result<(), DomainError> {
        (**self).create(order, event, deadline)
    }
    fn find_by_id(&self, id: Uuid) -> Result<Option<OrderView>, DomainError> {
        (**self).find_by_id(id)
    }
    fn apply_payment_outcome(
        &self,
        id: Uuid,
        status: OrderStatus,
    ) -> Result<Option<StatusChange>, DomainError> {
        (**self).apply_payment_outcome(id, status)
    }
    fn upsert_delivery_status(&self, status: &DeliveryStatusView) -> Result<bool, DomainError> {
        (**self).upsert_delivery_status(status)
    }
    fn find_delivery_status(
        &self,
        order_id: Uuid,
    ) -> Result<Option<DeliveryStatusView>, DomainError> {
        (**self).find_delivery_status(order_id)
    }
}

impl<R: PaymentRepository + ?Sized> PaymentRepository for Arc<R> {
    fn settle(
        &self,
        request: &PaymentRequest,
        opening_balance: &BigDecimal,
        deadline: Deadline,
    ) -> Result<Settlement, DomainError> {
        (**self).settle(request, opening_balance, deadline)
    }
    fn latest_for_order(&self, order_id: Uuid) -> Result<Option<PaymentView>, DomainError> {
        (**self).latest_for_order(order_id)
    }
    fn balance(&self, user_id: &str) -> Result<Option<BigDecimal>, DomainError> {
        (**self).balance(user_id)
    }
    fn set_balance(
        &self,
        user_id: &str,
        balance: &BigDecimal,
        deadline: Deadline,
    ) -> Result<(), DomainError> {
        (**self).set_balance(user_id, balance, deadline)
    }
}

impl<R: DeliveryRepository + ?Sized> DeliveryRepository for Arc<R> {
    fn create(
        &self,
        delivery: &NewDelivery,
        event: &OutboxMessage,
        deadline: Deadline,
    ) -> Result<DeliveryCreation, DomainError> {
        (**self).create(delivery, event, deadline)
    }
    fn find_by_order(&self, order_id: Uuid) -> Result<Option<DeliveryView>, DomainError> {
        (**self).find_by_order(order_id)
    }
    fn find_by_id(&self, id: Uuid) -> Result<Option<DeliveryView>, DomainError> {
        (**self).find_by_id(id)
    }
    fn advance(
        &self,
        id: Uuid,
        from_step: i32,
        stage: &Stage,
        now: DateTime<Utc>,
        event: &OutboxMessage,
    ) -> Result<bool, DomainError> {
        (**self).advance(id, from_step, stage, now, event)
    }
    fn in_progress(&self) -> Result<Vec<DeliveryView>, DomainError> {
        (**self).in_progress()
    }
}
