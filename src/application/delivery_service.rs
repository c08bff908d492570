use chrono::{DateTime, Utc};
use log::info;
use uuid::Uuid;

use super::delivery_scheduler::SchedulerHandle;
use crate::domain::deadline::Deadline;
use crate::domain::delivery::{DeliveryCreation, DeliveryView, NewDelivery};
use crate::domain::errors::DomainError;
use crate::domain::events::{decode, PaymentCompletedEvent, TOPIC_PAYMENT_COMPLETED};
use crate::domain::payment::PaymentStatus;
use crate::domain::ports::{DeliveryRepository, EventHandler};

pub struct DeliveryService<R> {
    repo: R,
    scheduler: SchedulerHandle,
}

impl<R: DeliveryRepository> DeliveryService<R> {
    pub fn new(repo: R, scheduler: SchedulerHandle) -> Self {
        Self { repo, scheduler }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Create the delivery for an order, or return the one that exists.
    /// Progression is registered with the scheduler and never awaited here.
    pub fn create_delivery(
        &self,
        order_id: Uuid,
        user_id: &str,
        address: Option<&str>,
        deadline: Deadline,
    ) -> Result<DeliveryCreation, DomainError> {
        if user_id.trim().is_empty() {
            return Err(DomainError::Validation("user_id is required".to_string()));
        }
        if let Some(existing) = self.repo.find_by_order(order_id)? {
            return Ok(DeliveryCreation::Existing(existing));
        }

        let delivery = NewDelivery::new(order_id, user_id, address);
        let event = delivery.view().status_event()?;
        let creation = self.repo.create(&delivery, &event, deadline)?;

        match &creation {
            DeliveryCreation::Created(view) => {
                info!(
                    "Delivery {} created for order {}, tracking: {}",
                    view.id, order_id, view.tracking_number
                );
                if let Some(due_at) = view.next_due_at() {
                    self.scheduler.register(view.id, due_at);
                }
            }
            DeliveryCreation::Existing(view) => {
                info!("Delivery {} already exists for order {}", view.id, order_id)
            }
        }
        Ok(creation)
    }

    pub fn on_payment_completed(&self, event: &PaymentCompletedEvent) -> Result<(), DomainError> {
        match event.status.parse::<PaymentStatus>() {
            Ok(PaymentStatus::Success) => {
                info!("Payment success for order {}, creating delivery", event.order_id);
                self.create_delivery(
                    event.order_id,
                    &event.user_id,
                    event.delivery_address.as_deref(),
                    Deadline::NONE,
                )
                .map(|_| ())
            }
            _ => {
                info!(
                    "Payment for order {} ended {}, no delivery created",
                    event.order_id, event.status
                );
                Ok(())
            }
        }
    }

    pub fn get_delivery_status(&self, order_id: Uuid) -> Result<DeliveryView, DomainError> {
        self.repo
            .find_by_order(order_id)?
            .ok_or_else(|| DomainError::NotFound(format!("delivery for order {order_id}")))
    }

    /// Apply the next stage of a delivery if its deadline has passed.
    ///
    /// Returns the deadline of the following stage, or `None` once the
    /// delivery is complete. A stage not yet due is left alone and its own
    /// deadline is returned.
    pub fn advance(
        &self,
        delivery_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, DomainError> {
        let view = self
            .repo
            .find_by_id(delivery_id)?
            .ok_or_else(|| DomainError::NotFound(format!("delivery {delivery_id}")))?;

        let (Some(stage), Some(due_at)) = (view.next_stage(), view.next_due_at()) else {
            return Ok(None);
        };
        if due_at > now {
            return Ok(Some(due_at));
        }

        let next = view.advanced(stage, now);
        let event = next.status_event()?;
        if !self.repo.advance(view.id, view.step, stage, now, &event)? {
            // Someone else applied this step; continue from what is stored.
            return Ok(self
                .repo
                .find_by_id(delivery_id)?
                .and_then(|v| v.next_due_at()));
        }

        info!(
            "Delivery update for order {}: {} at {}",
            next.order_id, next.status, next.current_location
        );
        Ok(next.next_due_at())
    }

    /// Deliveries still in progress with the deadline of their next stage.
    pub fn resumable(&self) -> Result<Vec<(Uuid, DateTime<Utc>)>, DomainError> {
        Ok(self
            .repo
            .in_progress()?
            .into_iter()
            .filter_map(|v| v.next_due_at().map(|due| (v.id, due)))
            .collect())
    }
}

impl<R: DeliveryRepository> EventHandler for DeliveryService<R> {
    fn topics(&self) -> Vec<&'static str> {
        vec![TOPIC_PAYMENT_COMPLETED]
    }

    fn handle(&self, topic: &str, payload: &[u8]) -> Result<(), DomainError> {
        match topic {
            TOPIC_PAYMENT_COMPLETED => self.on_payment_completed(&decode(payload)?),
            other => Err(DomainError::Validation(format!("unexpected topic '{other}'"))),
        }
    }
}
