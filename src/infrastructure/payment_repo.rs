use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use log::warn;
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::deadline::Deadline;
use crate::domain::errors::DomainError;
use crate::domain::payment::{
    PaymentRequest, PaymentStatus, PaymentView, Settlement, SettlementPlan,
};
use crate::domain::ports::PaymentRepository;
use crate::schema::{payments, user_balances};

use super::models::{PaymentRow, UserBalanceRow};
use super::outbox_repo::insert_outbox_event;

impl TryFrom<PaymentRow> for PaymentView {
    type Error = DomainError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(PaymentView {
            id: row.id,
            order_id: row.order_id,
            user_id: row.user_id,
            amount: row.amount,
            status: PaymentStatus::from_str(&row.status)?,
            created_at: row.created_at,
        })
    }
}

impl From<&PaymentView> for PaymentRow {
    fn from(view: &PaymentView) -> Self {
        PaymentRow {
            id: view.id,
            order_id: view.order_id,
            user_id: view.user_id.clone(),
            amount: view.amount.clone(),
            status: view.status.as_str().to_string(),
            created_at: view.created_at,
        }
    }
}

fn payment_for_order(
    conn: &mut PgConnection,
    order_id: Uuid,
) -> Result<Option<PaymentView>, DomainError> {
    payments::table
        .filter(payments::order_id.eq(order_id))
        .select(PaymentRow::as_select())
        .first(conn)
        .optional()?
        .map(PaymentView::try_from)
        .transpose()
}

pub struct DieselPaymentRepository {
    pool: DbPool,
}

impl DieselPaymentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl PaymentRepository for DieselPaymentRepository {
    fn settle(
        &self,
        request: &PaymentRequest,
        opening_balance: &BigDecimal,
        deadline: Deadline,
    ) -> Result<Settlement, DomainError> {
        let mut conn = self.pool.get()?;

        conn.transaction::<_, DomainError, _>(|conn| {
            // Open the account on first sight, then serialise every debit for
            // this user behind the row lock.
            diesel::insert_into(user_balances::table)
                .values(&UserBalanceRow {
                    user_id: request.user_id.clone(),
                    balance: opening_balance.clone(),
                    updated_at: Utc::now(),
                })
                .on_conflict_do_nothing()
                .execute(conn)?;
            let balance: BigDecimal = user_balances::table
                .find(&request.user_id)
                .select(user_balances::balance)
                .for_update()
                .first(conn)?;

            if let Some(existing) = payment_for_order(conn, request.order_id)? {
                return Ok(Settlement {
                    payment: existing,
                    balance_before: None,
                    replayed: true,
                });
            }

            let plan = SettlementPlan::decide(request, &balance)?;
            let inserted = diesel::insert_into(payments::table)
                .values(&PaymentRow::from(&plan.payment))
                .on_conflict(payments::order_id)
                .do_nothing()
                .execute(conn)?;
            if inserted == 0 {
                // Settled concurrently under another user's lock.
                warn!("Order {} was settled concurrently", request.order_id);
                let existing = payment_for_order(conn, request.order_id)?.ok_or_else(|| {
                    DomainError::Storage(format!(
                        "payment for order {} vanished after conflict",
                        request.order_id
                    ))
                })?;
                return Ok(Settlement {
                    payment: existing,
                    balance_before: None,
                    replayed: true,
                });
            }

            if let Some(new_balance) = &plan.new_balance {
                diesel::update(user_balances::table.find(&request.user_id))
                    .set((
                        user_balances::balance.eq(new_balance),
                        user_balances::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)?;
            }
            insert_outbox_event(conn, &plan.event)?;
            deadline.check()?;

            Ok(Settlement {
                payment: plan.payment,
                balance_before: Some(balance),
                replayed: false,
            })
        })
    }

    fn latest_for_order(&self, order_id: Uuid) -> Result<Option<PaymentView>, DomainError> {
        let mut conn = self.pool.get()?;
        payment_for_order(&mut conn, order_id)
    }

    fn balance(&self, user_id: &str) -> Result<Option<BigDecimal>, DomainError> {
        let mut conn = self.pool.get()?;
        Ok(user_balances::table
            .find(user_id)
            .select(user_balances::balance)
            .first(&mut conn)
            .optional()?)
    }

    fn set_balance(
        &self,
        user_id: &str,
        balance: &BigDecimal,
        deadline: Deadline,
    ) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;
        let now = Utc::now();
        conn.transaction::<_, DomainError, _>(|conn| {
            diesel::insert_into(user_balances::table)
                .values(&UserBalanceRow {
                    user_id: user_id.to_string(),
                    balance: balance.clone(),
                    updated_at: now,
                })
                .on_conflict(user_balances::user_id)
                .do_update()
                .set((
                    user_balances::balance.eq(balance),
                    user_balances::updated_at.eq(now),
                ))
                .execute(conn)?;
            deadline.check()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use bigdecimal::BigDecimal;
    use diesel::prelude::*;
    use uuid::Uuid;

    use super::DieselPaymentRepository;
    use crate::domain::deadline::Deadline;
    use crate::domain::errors::DomainError;
    use crate::domain::payment::{PaymentRequest, PaymentStatus};
    use crate::domain::ports::PaymentRepository;
    use crate::infrastructure::test_support::setup_db;
    use crate::schema::outbox_events;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).expect("valid decimal")
    }

    fn request(user: &str, amount: &str) -> PaymentRequest {
        PaymentRequest {
            order_id: Uuid::new_v4(),
            user_id: user.to_string(),
            amount: dec(amount),
            delivery_address: Some("1 Main St".to_string()),
        }
    }

    fn outbox_rows(pool: &crate::db::DbPool) -> i64 {
        let mut conn = pool.get().expect("Failed to get connection");
        outbox_events::table
            .count()
            .get_result(&mut conn)
            .expect("count failed")
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn first_payment_opens_account_and_debits() {
        let (_container, pool) = setup_db(crate::PAYMENT_MIGRATIONS).await;
        let repo = DieselPaymentRepository::new(pool.clone());

        let settlement = repo
            .settle(&request("u1", "20.00"), &dec("1000.00"), Deadline::NONE)
            .expect("settle failed");

        assert_eq!(settlement.payment.status, PaymentStatus::Success);
        assert!(!settlement.replayed);
        assert_eq!(repo.balance("u1").expect("balance"), Some(dec("980.00")));
        assert_eq!(outbox_rows(&pool), 1);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn replay_debits_once_and_writes_no_second_event() {
        let (_container, pool) = setup_db(crate::PAYMENT_MIGRATIONS).await;
        let repo = DieselPaymentRepository::new(pool.clone());
        let req = request("u1", "20.00");

        let first = repo.settle(&req, &dec("1000.00"), Deadline::NONE).expect("settle failed");
        let second = repo.settle(&req, &dec("1000.00"), Deadline::NONE).expect("settle failed");

        assert!(second.replayed);
        assert_eq!(second.balance_before, None);
        assert_eq!(second.payment.id, first.payment.id);
        assert_eq!(repo.balance("u1").expect("balance"), Some(dec("980.00")));
        assert_eq!(outbox_rows(&pool), 1);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn insufficient_funds_leaves_balance_untouched() {
        let (_container, pool) = setup_db(crate::PAYMENT_MIGRATIONS).await;
        let repo = DieselPaymentRepository::new(pool);
        repo.set_balance("u2", &dec("5.00"), Deadline::NONE).expect("seed failed");

        let settlement = repo
            .settle(&request("u2", "20.00"), &dec("1000.00"), Deadline::NONE)
            .expect("settle failed");

        assert_eq!(settlement.payment.status, PaymentStatus::InsufficientFunds);
        assert_eq!(settlement.balance_before, Some(dec("5.00")));
        assert_eq!(repo.balance("u2").expect("balance"), Some(dec("5.00")));
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn concurrent_debits_never_overdraw() {
        let (_container, pool) = setup_db(crate::PAYMENT_MIGRATIONS).await;
        let repo = std::sync::Arc::new(DieselPaymentRepository::new(pool));
        repo.set_balance("u3", &dec("100.00"), Deadline::NONE).expect("seed failed");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = repo.clone();
                std::thread::spawn(move || {
                    repo.settle(&request("u3", "30.00"), &dec("1000.00"), Deadline::NONE)
                        .expect("settle failed")
                })
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .filter(|s| s.payment.status == PaymentStatus::Success)
            .count();

        assert_eq!(successes, 3);
        assert_eq!(repo.balance("u3").expect("balance"), Some(dec("10.00")));
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn expired_deadline_rolls_the_debit_back() {
        let (_container, pool) = setup_db(crate::PAYMENT_MIGRATIONS).await;
        let repo = DieselPaymentRepository::new(pool.clone());
        repo.set_balance("u4", &dec("100.00"), Deadline::NONE)
            .expect("seed failed");

        let err = repo
            .settle(
                &request("u4", "30.00"),
                &dec("1000.00"),
                Deadline::after(std::time::Duration::ZERO),
            )
            .unwrap_err();

        assert!(matches!(err, DomainError::Timeout(_)));
        assert_eq!(repo.balance("u4").expect("balance"), Some(dec("100.00")));
        assert_eq!(outbox_rows(&pool), 0);
    }
}
