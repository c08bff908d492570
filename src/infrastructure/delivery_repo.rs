use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::deadline::Deadline;
use crate::domain::delivery::{
    DeliveryCreation, DeliveryStatus, DeliveryView, NewDelivery, Stage,
};
use crate::domain::errors::DomainError;
use crate::domain::events::OutboxMessage;
use crate::domain::ports::DeliveryRepository;
use crate::schema::deliveries;

use super::models::DeliveryRow;
use super::outbox_repo::insert_outbox_event;

impl TryFrom<DeliveryRow> for DeliveryView {
    type Error = DomainError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        Ok(DeliveryView {
            id: row.id,
            order_id: row.order_id,
            user_id: row.user_id,
            address: row.address,
            status: DeliveryStatus::from_str(&row.status)?,
            step: row.step,
            tracking_number: row.tracking_number,
            current_location: row.current_location,
            estimated_delivery: row.estimated_delivery,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<DeliveryView> for DeliveryRow {
    fn from(view: DeliveryView) -> Self {
        DeliveryRow {
            id: view.id,
            order_id: view.order_id,
            user_id: view.user_id,
            address: view.address,
            status: view.status.as_str().to_string(),
            step: view.step,
            tracking_number: view.tracking_number,
            current_location: view.current_location,
            estimated_delivery: view.estimated_delivery,
            created_at: view.created_at,
            updated_at: view.updated_at,
        }
    }
}

fn delivery_for_order(
    conn: &mut PgConnection,
    order_id: Uuid,
) -> Result<Option<DeliveryView>, DomainError> {
    deliveries::table
        .filter(deliveries::order_id.eq(order_id))
        .select(DeliveryRow::as_select())
        .first(conn)
        .optional()?
        .map(DeliveryView::try_from)
        .transpose()
}

pub struct DieselDeliveryRepository {
    pool: DbPool,
}

impl DieselDeliveryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl DeliveryRepository for DieselDeliveryRepository {
    fn create(
        &self,
        delivery: &NewDelivery,
        event: &OutboxMessage,
        deadline: Deadline,
    ) -> Result<DeliveryCreation, DomainError> {
        let mut conn = self.pool.get()?;

        conn.transaction::<_, DomainError, _>(|conn| {
            let view = delivery.view();
            let inserted = diesel::insert_into(deliveries::table)
                .values(&DeliveryRow::from(view.clone()))
                .on_conflict(deliveries::order_id)
                .do_nothing()
                .execute(conn)?;
            if inserted == 0 {
                let existing = delivery_for_order(conn, delivery.order_id)?.ok_or_else(|| {
                    DomainError::Storage(format!(
                        "delivery for order {} vanished after conflict",
                        delivery.order_id
                    ))
                })?;
                return Ok(DeliveryCreation::Existing(existing));
            }

            insert_outbox_event(conn, event)?;
            deadline.check()?;
            Ok(DeliveryCreation::Created(view))
        })
    }

    fn find_by_order(&self, order_id: Uuid) -> Result<Option<DeliveryView>, DomainError> {
        let mut conn = self.pool.get()?;
        delivery_for_order(&mut conn, order_id)
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<DeliveryView>, DomainError> {
        let mut conn = self.pool.get()?;
        deliveries::table
            .find(id)
            .select(DeliveryRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(DeliveryView::try_from)
            .transpose()
    }

    fn advance(
        &self,
        id: Uuid,
        from_step: i32,
        stage: &Stage,
        now: DateTime<Utc>,
        event: &OutboxMessage,
    ) -> Result<bool, DomainError> {
        let mut conn = self.pool.get()?;

        conn.transaction::<_, DomainError, _>(|conn| {
            // Compare-and-set on `step`: a second runner matches no row.
            let updated = diesel::update(
                deliveries::table
                    .filter(deliveries::id.eq(id))
                    .filter(deliveries::step.eq(from_step)),
            )
            .set((
                deliveries::status.eq(stage.status.as_str()),
                deliveries::step.eq(from_step + 1),
                deliveries::current_location.eq(stage.location),
                deliveries::updated_at.eq(now),
            ))
            .execute(conn)?;
            if updated == 0 {
                return Ok(false);
            }

            insert_outbox_event(conn, event)?;
            Ok(true)
        })
    }

    fn in_progress(&self) -> Result<Vec<DeliveryView>, DomainError> {
        let mut conn = self.pool.get()?;
        deliveries::table
            .filter(deliveries::status.ne(DeliveryStatus::Delivered.as_str()))
            .order(deliveries::created_at.asc())
            .select(DeliveryRow::as_select())
            .load(&mut conn)?
            .into_iter()
            .map(DeliveryView::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use diesel::prelude::*;
    use uuid::Uuid;

    use super::DieselDeliveryRepository;
    use crate::domain::deadline::Deadline;
    use crate::domain::delivery::{DeliveryCreation, DeliveryStatus, NewDelivery, STAGES};
    use crate::domain::ports::DeliveryRepository;
    use crate::infrastructure::test_support::setup_db;
    use crate::schema::outbox_events;

    fn outbox_rows(pool: &crate::db::DbPool) -> i64 {
        let mut conn = pool.get().expect("Failed to get connection");
        outbox_events::table
            .count()
            .get_result(&mut conn)
            .expect("count failed")
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn second_create_for_same_order_returns_the_existing_delivery() {
        let (_container, pool) = setup_db(crate::DELIVERY_MIGRATIONS).await;
        let repo = DieselDeliveryRepository::new(pool.clone());
        let order_id = Uuid::new_v4();

        let first = NewDelivery::new(order_id, "u1", Some("1 Main St"));
        let event = first.view().status_event().expect("event");
        let created = repo.create(&first, &event, Deadline::NONE).expect("create failed");
        assert!(matches!(created, DeliveryCreation::Created(_)));

        let second = NewDelivery::new(order_id, "u1", Some("1 Main St"));
        let event = second.view().status_event().expect("event");
        let again = repo.create(&second, &event, Deadline::NONE).expect("create failed");

        match again {
            DeliveryCreation::Existing(view) => {
                assert_eq!(view.id, first.id);
                assert_eq!(view.tracking_number, first.tracking_number);
                assert_eq!(view.created_at, first.created_at);
            }
            other => panic!("expected existing delivery, got {other:?}"),
        }
        assert_eq!(outbox_rows(&pool), 1);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn advance_is_a_compare_and_set_on_step() {
        let (_container, pool) = setup_db(crate::DELIVERY_MIGRATIONS).await;
        let repo = DieselDeliveryRepository::new(pool.clone());
        let delivery = NewDelivery::new(Uuid::new_v4(), "u1", None);
        let view = delivery.view();
        repo.create(&delivery, &view.status_event().expect("event"), Deadline::NONE)
            .expect("create failed");

        let now = view.next_due_at().expect("due");
        let next = view.advanced(&STAGES[0], now);
        let event = next.status_event().expect("event");
        assert!(repo.advance(view.id, 0, &STAGES[0], now, &event).expect("advance"));
        assert!(!repo.advance(view.id, 0, &STAGES[0], now, &event).expect("advance"));

        let stored = repo
            .find_by_id(view.id)
            .expect("find failed")
            .expect("delivery");
        assert_eq!(stored.step, 1);
        assert_eq!(stored.status, DeliveryStatus::InTransit);
        assert_eq!(stored.current_location, STAGES[0].location);
        assert_eq!(outbox_rows(&pool), 2);
        assert_eq!(repo.in_progress().expect("in progress").len(), 1);
    }
}
