use std::str::FromStr;

use chrono::Utc;
use diesel::dsl::exists;
use diesel::prelude::*;
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::deadline::Deadline;
use crate::domain::delivery::DeliveryStatus;
use crate::domain::errors::DomainError;
use crate::domain::events::OutboxMessage;
use crate::domain::order::{
    resolve_status_change, DeliveryStatusView, NewOrder, OrderStatus, OrderView, StatusChange,
};
use crate::domain::ports::OrderRepository;
use crate::schema::{delivery_statuses, orders};

use super::models::{DeliveryStatusRow, NewOrderRow, OrderRow};
use super::outbox_repo::insert_outbox_event;

impl TryFrom<OrderRow> for OrderView {
    type Error = DomainError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(OrderView {
            id: row.id,
            user_id: row.user_id,
            status: OrderStatus::from_str(&row.status)?,
            total_amount: row.total_amount,
            delivery_address: row.delivery_address,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<DeliveryStatusRow> for DeliveryStatusView {
    type Error = DomainError;

    fn try_from(row: DeliveryStatusRow) -> Result<Self, Self::Error> {
        Ok(DeliveryStatusView {
            order_id: row.order_id,
            status: DeliveryStatus::from_str(&row.status)?,
            tracking_number: row.tracking_number,
            estimated_delivery: row.estimated_delivery,
            current_location: row.current_location,
            step: row.step,
        })
    }
}

pub struct DieselOrderRepository {
    pool: DbPool,
}

impl DieselOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl OrderRepository for DieselOrderRepository {
    fn create(
        &self,
        order: &NewOrder,
        event: &OutboxMessage,
        deadline: Deadline,
    ) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;

        conn.transaction::<_, DomainError, _>(|conn| {
            diesel::insert_into(orders::table)
                .values(&NewOrderRow {
                    id: order.id,
                    user_id: order.user_id.clone(),
                    status: OrderStatus::Pending.as_str().to_string(),
                    total_amount: order.total_amount.clone(),
                    delivery_address: order.delivery_address.clone(),
                    created_at: order.created_at,
                    updated_at: order.created_at,
                })
                .execute(conn)?;

            // Same transaction: the order exists if and only if its event does.
            insert_outbox_event(conn, event)?;
            deadline.check()
        })
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<OrderView>, DomainError> {
        let mut conn = self.pool.get()?;

        orders::table
            .find(id)
            .select(OrderRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(OrderView::try_from)
            .transpose()
    }

    fn apply_payment_outcome(
        &self,
        id: Uuid,
        status: OrderStatus,
    ) -> Result<Option<StatusChange>, DomainError> {
        let mut conn = self.pool.get()?;

        conn.transaction::<_, DomainError, _>(|conn| {
            let current: Option<String> = orders::table
                .find(id)
                .select(orders::status)
                .for_update()
                .first(conn)
                .optional()?;
            let Some(current) = current else {
                return Ok(None);
            };

            let change = resolve_status_change(OrderStatus::from_str(&current)?, status);
            if change == StatusChange::Applied {
                diesel::update(orders::table.find(id))
                    .set((
                        orders::status.eq(status.as_str()),
                        orders::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)?;
            }
            Ok(Some(change))
        })
    }

    fn upsert_delivery_status(&self, status: &DeliveryStatusView) -> Result<bool, DomainError> {
        let mut conn = self.pool.get()?;

        conn.transaction::<_, DomainError, _>(|conn| {
            let known: bool =
                diesel::select(exists(orders::table.find(status.order_id))).get_result(conn)?;
            if !known {
                return Err(DomainError::NotFound(format!("order {}", status.order_id)));
            }

            let current: Option<(String, i32)> = delivery_statuses::table
                .find(status.order_id)
                .select((delivery_statuses::status, delivery_statuses::step))
                .for_update()
                .first(conn)
                .optional()?;
            if let Some((current, current_step)) = current {
                if status.is_behind(DeliveryStatus::from_str(&current)?, current_step) {
                    return Ok(false);
                }
            }

            let row = DeliveryStatusRow {
                order_id: status.order_id,
                status: status.status.as_str().to_string(),
                tracking_number: status.tracking_number.clone(),
                estimated_delivery: status.estimated_delivery.clone(),
                current_location: status.current_location.clone(),
                updated_at: Utc::now(),
                step: status.step,
            };
            diesel::insert_into(delivery_statuses::table)
                .values(&row)
                .on_conflict(delivery_statuses::order_id)
                .do_update()
                .set(&row)
                .execute(conn)?;
            Ok(true)
        })
    }

    fn find_delivery_status(
        &self,
        order_id: Uuid,
    ) -> Result<Option<DeliveryStatusView>, DomainError> {
        let mut conn = self.pool.get()?;

        delivery_statuses::table
            .find(order_id)
            .select(DeliveryStatusRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(DeliveryStatusView::try_from)
            .transpose()
    }
}
