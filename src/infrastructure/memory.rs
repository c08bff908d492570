//! In-process adapters for every port.
//!
//! Each repository keeps its rows and its outbox behind one lock order
//! (state, then outbox), so a write and its event become visible together.
//! `fail_next_write` makes the next mutating call fail before anything is
//! written, the way a rolled-back transaction would. A passed deadline is
//! checked under the lock, right before the first mutation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::deadline::Deadline;
use crate::domain::delivery::{DeliveryCreation, DeliveryView, NewDelivery, Stage};
use crate::domain::errors::DomainError;
use crate::domain::events::OutboxMessage;
use crate::domain::order::{
    resolve_status_change, DeliveryStatusView, NewOrder, OrderStatus, OrderView, StatusChange,
};
use crate::domain::payment::{PaymentRequest, PaymentView, Settlement, SettlementPlan};
use crate::domain::ports::{
    DeliveryRepository, EventPublisher, OrderRepository, OutboxRecord, OutboxStore,
    PaymentRepository,
};

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, DomainError> {
    m.lock()
        .map_err(|_| DomainError::Storage("in-memory store poisoned".to_string()))
}

#[derive(Debug, Clone, Default)]
struct FailSwitch(Arc<AtomicBool>);

impl FailSwitch {
    fn arm(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), DomainError> {
        if self.0.swap(false, Ordering::SeqCst) {
            return Err(DomainError::Storage("transaction rolled back".to_string()));
        }
        Ok(())
    }
}

// ── Outbox ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct OutboxRows {
    next_seq: i64,
    rows: Vec<(OutboxRecord, bool)>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryOutbox {
    inner: Arc<Mutex<OutboxRows>>,
}

impl InMemoryOutbox {
    pub fn push(&self, message: OutboxMessage) {
        if let Ok(mut rows) = self.inner.lock() {
            Self::append(&mut rows, message);
        }
    }

    fn append(rows: &mut OutboxRows, message: OutboxMessage) {
        rows.next_seq += 1;
        let record = OutboxRecord {
            seq: rows.next_seq,
            message,
            attempts: 0,
            created_at: Utc::now(),
        };
        rows.rows.push((record, false));
    }

    fn append_locked(&self, message: &OutboxMessage) -> Result<(), DomainError> {
        let mut rows = lock(&self.inner)?;
        Self::append(&mut rows, message.clone());
        Ok(())
    }

    /// Every row ever written, sent or not.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|r| r.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn messages(&self) -> Vec<OutboxMessage> {
        self.inner
            .lock()
            .map(|r| r.rows.iter().map(|(rec, _)| rec.message.clone()).collect())
            .unwrap_or_default()
    }
}

impl OutboxStore for InMemoryOutbox {
    fn pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, DomainError> {
        let rows = lock(&self.inner)?;
        Ok(rows
            .rows
            .iter()
            .filter(|(_, sent)| !sent)
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|(rec, _)| rec.clone())
            .collect())
    }

    fn mark_sent(&self, id: Uuid) -> Result<(), DomainError> {
        let mut rows = lock(&self.inner)?;
        if let Some((_, sent)) = rows.rows.iter_mut().find(|(rec, _)| rec.message.id == id) {
            *sent = true;
        }
        Ok(())
    }

    fn record_failure(&self, id: Uuid, _error: &str) -> Result<(), DomainError> {
        let mut rows = lock(&self.inner)?;
        if let Some((rec, _)) = rows.rows.iter_mut().find(|(rec, _)| rec.message.id == id) {
            rec.attempts += 1;
        }
        Ok(())
    }
}

// ── Orders ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct OrderState {
    orders: HashMap<Uuid, OrderView>,
    deliveries: HashMap<Uuid, DeliveryStatusView>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    state: Arc<Mutex<OrderState>>,
    outbox: InMemoryOutbox,
    fail: FailSwitch,
}

impl InMemoryOrderRepository {
    pub fn outbox(&self) -> &InMemoryOutbox {
        &self.outbox
    }

    pub fn fail_next_write(&self) {
        self.fail.arm();
    }

    pub fn order_count(&self) -> usize {
        self.state.lock().map(|s| s.orders.len()).unwrap_or(0)
    }
}

impl OrderRepository for InMemoryOrderRepository {
    fn create(
        &self,
        order: &NewOrder,
        event: &OutboxMessage,
        deadline: Deadline,
    ) -> Result<(), DomainError> {
        self.fail.check()?;
        let mut state = lock(&self.state)?;
        if state.orders.contains_key(&order.id) {
            return Err(DomainError::Storage(format!("duplicate order id {}", order.id)));
        }
        deadline.check()?;
        state.orders.insert(
            order.id,
            OrderView {
                id: order.id,
                user_id: order.user_id.clone(),
                status: OrderStatus::Pending,
                total_amount: order.total_amount.clone(),
                delivery_address: order.delivery_address.clone(),
                created_at: order.created_at,
            },
        );
        self.outbox.append_locked(event)
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<OrderView>, DomainError> {
        Ok(lock(&self.state)?.orders.get(&id).cloned())
    }

    fn apply_payment_outcome(
        &self,
        id: Uuid,
        status: OrderStatus,
    ) -> Result<Option<StatusChange>, DomainError> {
        self.fail.check()?;
        let mut state = lock(&self.state)?;
        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(None);
        };
        let change = resolve_status_change(order.status, status);
        if change == StatusChange::Applied {
            order.status = status;
        }
        Ok(Some(change))
    }

    fn upsert_delivery_status(&self, status: &DeliveryStatusView) -> Result<bool, DomainError> {
        self.fail.check()?;
        let mut state = lock(&self.state)?;
        if !state.orders.contains_key(&status.order_id) {
            return Err(DomainError::NotFound(format!("order {}", status.order_id)));
        }
        match state.deliveries.get(&status.order_id) {
            Some(existing) if status.is_behind(existing.status, existing.step) => Ok(false),
            _ => {
                state.deliveries.insert(status.order_id, status.clone());
                Ok(true)
            }
        }
    }

    fn find_delivery_status(
        &self,
        order_id: Uuid,
    ) -> Result<Option<DeliveryStatusView>, DomainError> {
        Ok(lock(&self.state)?.deliveries.get(&order_id).cloned())
    }
}

// ── Payments ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PaymentState {
    balances: HashMap<String, BigDecimal>,
    payments_by_order: HashMap<Uuid, PaymentView>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentRepository {
    state: Arc<Mutex<PaymentState>>,
    outbox: InMemoryOutbox,
    fail: FailSwitch,
}

impl InMemoryPaymentRepository {
    pub fn outbox(&self) -> &InMemoryOutbox {
        &self.outbox
    }

    pub fn fail_next_write(&self) {
        self.fail.arm();
    }

    pub fn payment_count(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.payments_by_order.len())
            .unwrap_or(0)
    }
}

impl PaymentRepository for InMemoryPaymentRepository {
    fn settle(
        &self,
        request: &PaymentRequest,
        opening_balance: &BigDecimal,
        deadline: Deadline,
    ) -> Result<Settlement, DomainError> {
        self.fail.check()?;
        let mut state = lock(&self.state)?;
        let balance = state
            .balances
            .get(&request.user_id)
            .cloned()
            .unwrap_or_else(|| opening_balance.clone());

        if let Some(existing) = state.payments_by_order.get(&request.order_id) {
            return Ok(Settlement {
                payment: existing.clone(),
                balance_before: None,
                replayed: true,
            });
        }

        let plan = SettlementPlan::decide(request, &balance)?;
        deadline.check()?;
        state
            .balances
            .insert(request.user_id.clone(), plan.new_balance.clone().unwrap_or_else(|| balance.clone()));
        state
            .payments_by_order
            .insert(request.order_id, plan.payment.clone());
        self.outbox.append_locked(&plan.event)?;

        Ok(Settlement {
            payment: plan.payment,
            balance_before: Some(balance),
            replayed: false,
        })
    }

    fn latest_for_order(&self, order_id: Uuid) -> Result<Option<PaymentView>, DomainError> {
        Ok(lock(&self.state)?.payments_by_order.get(&order_id).cloned())
    }

    fn balance(&self, user_id: &str) -> Result<Option<BigDecimal>, DomainError> {
        Ok(lock(&self.state)?.balances.get(user_id).cloned())
    }

    fn set_balance(
        &self,
        user_id: &str,
        balance: &BigDecimal,
        deadline: Deadline,
    ) -> Result<(), DomainError> {
        self.fail.check()?;
        let mut state = lock(&self.state)?;
        deadline.check()?;
        state.balances.insert(user_id.to_string(), balance.clone());
        Ok(())
    }
}

// ── Deliveries ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct InMemoryDeliveryRepository {
    deliveries: Arc<Mutex<HashMap<Uuid, DeliveryView>>>,
    outbox: InMemoryOutbox,
    fail: FailSwitch,
}

impl InMemoryDeliveryRepository {
    pub fn outbox(&self) -> &InMemoryOutbox {
        &self.outbox
    }

    pub fn fail_next_write(&self) {
        self.fail.arm();
    }

    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().map(|d| d.len()).unwrap_or(0)
    }
}

impl DeliveryRepository for InMemoryDeliveryRepository {
    fn create(
        &self,
        delivery: &NewDelivery,
        event: &OutboxMessage,
        deadline: Deadline,
    ) -> Result<DeliveryCreation, DomainError> {
        self.fail.check()?;
        let mut deliveries = lock(&self.deliveries)?;
        if let Some(existing) = deliveries.values().find(|d| d.order_id == delivery.order_id) {
            return Ok(DeliveryCreation::Existing(existing.clone()));
        }
        deadline.check()?;
        let view = delivery.view();
        deliveries.insert(view.id, view.clone());
        self.outbox.append_locked(event)?;
        Ok(DeliveryCreation::Created(view))
    }

    fn find_by_order(&self, order_id: Uuid) -> Result<Option<DeliveryView>, DomainError> {
        Ok(lock(&self.deliveries)?
            .values()
            .find(|d| d.order_id == order_id)
            .cloned())
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<DeliveryView>, DomainError> {
        Ok(lock(&self.deliveries)?.get(&id).cloned())
    }

    fn advance(
        &self,
        id: Uuid,
        from_step: i32,
        stage: &Stage,
        now: DateTime<Utc>,
        event: &OutboxMessage,
    ) -> Result<bool, DomainError> {
        self.fail.check()?;
        let mut deliveries = lock(&self.deliveries)?;
        let Some(view) = deliveries.get_mut(&id) else {
            return Ok(false);
        };
        if view.step != from_step {
            return Ok(false);
        }
        *view = view.advanced(stage, now);
        self.outbox.append_locked(event)?;
        Ok(true)
    }

    fn in_progress(&self) -> Result<Vec<DeliveryView>, DomainError> {
        Ok(lock(&self.deliveries)?
            .values()
            .filter(|d| d.next_stage().is_some())
            .cloned()
            .collect())
    }
}

// ── Broker ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Default)]
struct BrokerLog {
    messages: Vec<PublishedMessage>,
    committed: HashMap<String, usize>,
    failures_left: usize,
}

/// A single-partition log with per-group committed offsets.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    log: Arc<Mutex<BrokerLog>>,
}

impl InMemoryBroker {
    /// Make the next `n` publishes fail without being recorded.
    pub fn fail_next(&self, n: usize) {
        if let Ok(mut log) = self.log.lock() {
            log.failures_left = n;
        }
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.log
            .lock()
            .map(|l| l.messages.clone())
            .unwrap_or_default()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    /// Messages on `topics` after the group's committed offset, paired with
    /// the offset to commit once each is handled.
    pub fn fetch(&self, group: &str, topics: &[&str]) -> Vec<(usize, PublishedMessage)> {
        let Ok(log) = self.log.lock() else {
            return Vec::new();
        };
        let start = log.committed.get(group).copied().unwrap_or(0);
        log.messages
            .iter()
            .enumerate()
            .skip(start)
            .filter(|(_, m)| topics.contains(&m.topic.as_str()))
            .map(|(i, m)| (i + 1, m.clone()))
            .collect()
    }

    pub fn commit(&self, group: &str, offset: usize) {
        if let Ok(mut log) = self.log.lock() {
            let entry = log.committed.entry(group.to_string()).or_insert(0);
            *entry = (*entry).max(offset);
        }
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), DomainError> {
        let mut log = lock(&self.log)?;
        if log.failures_left > 0 {
            log.failures_left -= 1;
            return Err(DomainError::Broker("broker unavailable".to_string()));
        }
        log.messages.push(PublishedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}
