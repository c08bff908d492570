use std::str::FromStr;

use log::{info, warn};
use uuid::Uuid;

use crate::domain::deadline::Deadline;
use crate::domain::delivery::DeliveryStatus;
use crate::domain::errors::DomainError;
use crate::domain::events::{
    decode, DeliveryStatusUpdatedEvent, OrderCreatedEvent, OrderItemPayload, OutboxMessage,
    PaymentCompletedEvent, TOPIC_DELIVERY_STATUS_UPDATED, TOPIC_ORDER_CREATED,
    TOPIC_PAYMENT_COMPLETED,
};
use crate::domain::order::{
    DeliveryStatusView, DeliveryTracking, NewOrder, OrderItemInput, OrderStatus, OrderView,
    StatusChange,
};
use crate::domain::payment::PaymentStatus;
use crate::domain::ports::{EventHandler, OrderRepository};

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedOrder {
    pub order: OrderView,
    pub message: String,
}

pub struct OrderService<R> {
    repo: R,
}

impl<R: OrderRepository> OrderService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Validate and persist a new order with its `order.created` event.
    /// Nothing is committed if `deadline` passes first.
    pub fn create_order(
        &self,
        user_id: &str,
        items: Vec<OrderItemInput>,
        delivery_address: &str,
        deadline: Deadline,
    ) -> Result<CreatedOrder, DomainError> {
        let order = NewOrder::validate(user_id, items, delivery_address)?;
        let event = OrderCreatedEvent {
            order_id: order.id,
            user_id: order.user_id.clone(),
            items: order
                .items
                .iter()
                .map(|i| OrderItemPayload {
                    product_id: i.product_id.clone(),
                    quantity: i.quantity,
                    price: i.price.clone(),
                })
                .collect(),
            total_amount: order.total_amount.clone(),
            delivery_address: order.delivery_address.clone(),
            created_at: order.created_at,
        };
        let message = OutboxMessage::new(TOPIC_ORDER_CREATED, order.id, &event)?;

        self.repo.create(&order, &message, deadline)?;
        info!(
            "Order created: {} for user: {}, amount: {}",
            order.id, order.user_id, order.total_amount
        );

        Ok(CreatedOrder {
            order: OrderView {
                id: order.id,
                user_id: order.user_id,
                status: OrderStatus::Pending,
                total_amount: order.total_amount,
                delivery_address: order.delivery_address,
                created_at: order.created_at,
            },
            message: "Order created successfully, processing payment".to_string(),
        })
    }

    pub fn get_order(&self, id: Uuid) -> Result<OrderView, DomainError> {
        self.repo
            .find_by_id(id)?
            .ok_or_else(|| DomainError::NotFound(format!("order {id}")))
    }

    pub fn get_delivery_status(&self, order_id: Uuid) -> Result<DeliveryTracking, DomainError> {
        let order = self.get_order(order_id)?;
        let delivery = self.repo.find_delivery_status(order_id)?;
        Ok(DeliveryTracking {
            order_id,
            order_status: order.status,
            delivery,
        })
    }

    pub fn on_payment_completed(&self, event: &PaymentCompletedEvent) -> Result<(), DomainError> {
        let target = OrderStatus::from(PaymentStatus::from_str(&event.status)?);
        match self.repo.apply_payment_outcome(event.order_id, target)? {
            Some(StatusChange::Applied) => {
                info!("Order {} is now {}", event.order_id, target)
            }
            Some(StatusChange::AlreadyApplied) => {
                info!("Order {} already {}, ignoring replay", event.order_id, target)
            }
            Some(StatusChange::Conflict(current)) => warn!(
                "Order {} is {} and cannot become {}; event ignored",
                event.order_id, current, target
            ),
            None => {
                return Err(DomainError::NotFound(format!("order {}", event.order_id)));
            }
        }
        Ok(())
    }

    pub fn on_delivery_status_updated(
        &self,
        event: &DeliveryStatusUpdatedEvent,
    ) -> Result<(), DomainError> {
        let view = DeliveryStatusView {
            order_id: event.order_id,
            status: DeliveryStatus::from_str(&event.status)?,
            tracking_number: event.tracking_number.clone(),
            estimated_delivery: event.estimated_date.clone(),
            current_location: event.current_location.clone(),
            step: event.step,
        };
        if self.repo.upsert_delivery_status(&view)? {
            info!("Delivery status for order {}: {}", event.order_id, event.status);
        } else {
            info!(
                "Stale delivery status {} for order {} ignored",
                event.status, event.order_id
            );
        }
        Ok(())
    }
}

impl<R: OrderRepository> EventHandler for OrderService<R> {
    fn topics(&self) -> Vec<&'static str> {
        vec![TOPIC_PAYMENT_COMPLETED, TOPIC_DELIVERY_STATUS_UPDATED]
    }

    fn handle(&self, topic: &str, payload: &[u8]) -> Result<(), DomainError> {
        match topic {
            TOPIC_PAYMENT_COMPLETED => self.on_payment_completed(&decode(payload)?),
            TOPIC_DELIVERY_STATUS_UPDATED => self.on_delivery_status_updated(&decode(payload)?),
            other => Err(DomainError::Validation(format!("unexpected topic '{other}'"))),
        }
    }
}
