use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::errors::DomainError;
use crate::domain::events::OutboxMessage;
use crate::domain::ports::{OutboxRecord, OutboxStore};
use crate::schema::outbox_events;

use super::models::{NewOutboxEventRow, OutboxEventRow};

/// Append `message` to the outbox on the caller's connection, so it commits
/// or rolls back with the surrounding transaction.
pub fn insert_outbox_event(
    conn: &mut PgConnection,
    message: &OutboxMessage,
) -> Result<(), DomainError> {
    diesel::insert_into(outbox_events::table)
        .values(&NewOutboxEventRow {
            id: message.id,
            topic: message.topic.clone(),
            message_key: message.key.clone(),
            payload: message.payload.clone(),
        })
        .execute(conn)?;
    Ok(())
}

impl From<OutboxEventRow> for OutboxRecord {
    fn from(row: OutboxEventRow) -> Self {
        OutboxRecord {
            seq: row.seq,
            message: OutboxMessage {
                id: row.id,
                topic: row.topic,
                key: row.message_key,
                payload: row.payload,
            },
            attempts: row.attempts,
            created_at: row.created_at,
        }
    }
}

pub struct DieselOutboxStore {
    pool: DbPool,
}

impl DieselOutboxStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl OutboxStore for DieselOutboxStore {
    fn pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, DomainError> {
        let mut conn = self.pool.get()?;
        let rows = outbox_events::table
            .filter(outbox_events::sent.eq(false))
            .order(outbox_events::seq.asc())
            .limit(limit)
            .select(OutboxEventRow::as_select())
            .load(&mut conn)?;
        Ok(rows.into_iter().map(OutboxRecord::from).collect())
    }

    fn mark_sent(&self, id: Uuid) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;
        diesel::update(outbox_events::table.find(id))
            .set((
                outbox_events::sent.eq(true),
                outbox_events::sent_at.eq(Some(Utc::now())),
                outbox_events::last_error.eq(None::<String>),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    fn record_failure(&self, id: Uuid, error: &str) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;
        diesel::update(outbox_events::table.find(id))
            .set((
                outbox_events::attempts.eq(outbox_events::attempts + 1),
                outbox_events::last_error.eq(Some(error)),
            ))
            .execute(&mut conn)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::infrastructure::test_support::setup_db;

    fn message(n: i32) -> OutboxMessage {
        OutboxMessage {
            id: Uuid::new_v4(),
            topic: "order.created".to_string(),
            key: Uuid::new_v4().to_string(),
            payload: json!({ "n": n }),
        }
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn pending_rows_come_back_in_insertion_order() {
        let (_container, pool) = setup_db(crate::ORDER_MIGRATIONS).await;
        let store = DieselOutboxStore::new(pool.clone());
        {
            let mut conn = pool.get().expect("Failed to get connection");
            for n in 0..3 {
                insert_outbox_event(&mut conn, &message(n)).expect("insert failed");
            }
        }

        let pending = store.pending(10).expect("pending failed");
        let order: Vec<_> = pending.iter().map(|r| r.message.payload["n"].clone()).collect();
        assert_eq!(order, vec![json!(0), json!(1), json!(2)]);
        assert!(pending.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn sent_rows_leave_the_queue_and_failures_are_counted() {
        let (_container, pool) = setup_db(crate::ORDER_MIGRATIONS).await;
        let store = DieselOutboxStore::new(pool.clone());
        let first = message(1);
        let second = message(2);
        {
            let mut conn = pool.get().expect("Failed to get connection");
            insert_outbox_event(&mut conn, &first).expect("insert failed");
            insert_outbox_event(&mut conn, &second).expect("insert failed");
        }

        store.record_failure(first.id, "broker down").expect("record failed");
        store.mark_sent(second.id).expect("mark failed");

        let pending = store.pending(10).expect("pending failed");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message.id, first.id);
        assert_eq!(pending[0].attempts, 1);
    }
}
