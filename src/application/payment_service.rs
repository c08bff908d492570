use bigdecimal::BigDecimal;
use log::info;
use uuid::Uuid;

use crate::domain::deadline::Deadline;
use crate::domain::errors::DomainError;
use crate::domain::events::{decode, OrderCreatedEvent, TOPIC_ORDER_CREATED};
use crate::domain::order::check_money;
use crate::domain::payment::{PaymentRequest, PaymentView, Settlement};
use crate::domain::ports::{EventHandler, PaymentRepository};

pub struct PaymentService<R> {
    repo: R,
    opening_balance: BigDecimal,
}

impl<R: PaymentRepository> PaymentService<R> {
    pub fn new(repo: R, opening_balance: BigDecimal) -> Self {
        Self {
            repo,
            opening_balance,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Settle a payment for an order. Safe to call repeatedly for the same
    /// order: only the first call debits, later calls return its result.
    pub fn process_payment(
        &self,
        request: PaymentRequest,
        deadline: Deadline,
    ) -> Result<Settlement, DomainError> {
        request.validate()?;
        let settlement = self.repo.settle(&request, &self.opening_balance, deadline)?;
        if settlement.replayed {
            info!(
                "Order {} already settled as {} (payment {}), nothing to do",
                request.order_id, settlement.payment.status, settlement.payment.id
            );
        } else {
            info!(
                "Payment {} for order {}: {}",
                settlement.payment.id,
                request.order_id,
                settlement.message()
            );
        }
        Ok(settlement)
    }

    pub fn on_order_created(&self, event: &OrderCreatedEvent) -> Result<Settlement, DomainError> {
        let request = PaymentRequest {
            order_id: event.order_id,
            user_id: event.user_id.clone(),
            amount: event.total_amount.clone(),
            delivery_address: Some(event.delivery_address.clone()),
        };
        self.process_payment(request, Deadline::NONE)
    }

    pub fn get_payment_status(&self, order_id: Uuid) -> Result<PaymentView, DomainError> {
        self.repo
            .latest_for_order(order_id)?
            .ok_or_else(|| DomainError::NotFound(format!("payment for order {order_id}")))
    }

    /// Current balance; users never charged report the opening balance.
    pub fn get_balance(&self, user_id: &str) -> Result<BigDecimal, DomainError> {
        Ok(self
            .repo
            .balance(user_id)?
            .unwrap_or_else(|| self.opening_balance.clone()))
    }

    pub fn set_balance(
        &self,
        user_id: &str,
        balance: BigDecimal,
        deadline: Deadline,
    ) -> Result<(), DomainError> {
        if user_id.trim().is_empty() {
            return Err(DomainError::Validation("user_id is required".to_string()));
        }
        check_money("balance", &balance)?;
        self.repo.set_balance(user_id, &balance, deadline)
    }
}

impl<R: PaymentRepository> EventHandler for PaymentService<R> {
    fn topics(&self) -> Vec<&'static str> {
        vec![TOPIC_ORDER_CREATED]
    }

    fn handle(&self, topic: &str, payload: &[u8]) -> Result<(), DomainError> {
        match topic {
            TOPIC_ORDER_CREATED => self.on_order_created(&decode(payload)?).map(|_| ()),
            other => Err(DomainError::Validation(format!("unexpected topic '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::domain::payment::{PaymentStatus, DEFAULT_OPENING_BALANCE};
    use crate::domain::ports::OutboxStore;
    use crate::infrastructure::memory::InMemoryPaymentRepository;

    fn service() -> PaymentService<InMemoryPaymentRepository> {
        PaymentService::new(
            InMemoryPaymentRepository::default(),
            BigDecimal::from_str(DEFAULT_OPENING_BALANCE).unwrap(),
        )
    }

    fn request(order_id: Uuid, amount: &str) -> PaymentRequest {
        PaymentRequest {
            order_id,
            user_id: "u1".to_string(),
            amount: BigDecimal::from_str(amount).unwrap(),
            delivery_address: None,
        }
    }

    #[test]
    fn unseen_user_is_opened_with_seed_balance_and_debited() {
        let svc = service();
        let settlement = svc
            .process_payment(request(Uuid::new_v4(), "20.00"), Deadline::NONE)
            .unwrap();
        assert_eq!(settlement.payment.status, PaymentStatus::Success);
        assert_eq!(svc.get_balance("u1").unwrap(), BigDecimal::from(980));
    }

    #[test]
    fn replay_does_not_double_debit_or_emit_twice() {
        let svc = service();
        let order_id = Uuid::new_v4();
        let first = svc.process_payment(request(order_id, "20.00"), Deadline::NONE).unwrap();
        let second = svc.process_payment(request(order_id, "20.00"), Deadline::NONE).unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.payment.id, second.payment.id);
        assert_eq!(svc.get_balance("u1").unwrap(), BigDecimal::from(980));
        assert_eq!(svc.repository().outbox().pending(10).unwrap().len(), 1);
    }

    #[test]
    fn insufficient_funds_leaves_balance_untouched() {
        let svc = service();
        svc.set_balance("u1", BigDecimal::from_str("5.00").unwrap(), Deadline::NONE).unwrap();
        let settlement = svc
            .process_payment(request(Uuid::new_v4(), "20.00"), Deadline::NONE)
            .unwrap();
        assert_eq!(settlement.payment.status, PaymentStatus::InsufficientFunds);
        assert_eq!(svc.get_balance("u1").unwrap(), BigDecimal::from(5));
        assert_eq!(svc.repository().outbox().pending(10).unwrap().len(), 1);
    }

    #[test]
    fn failed_settlement_changes_nothing() {
        let svc = service();
        svc.repository().fail_next_write();
        let order_id = Uuid::new_v4();
        assert!(svc.process_payment(request(order_id, "20.00"), Deadline::NONE).is_err());
        assert_eq!(svc.get_balance("u1").unwrap(), BigDecimal::from(1000));
        assert!(svc.get_payment_status(order_id).is_err());
        assert!(svc.repository().outbox().pending(10).unwrap().is_empty());
    }

    #[test]
    fn payment_status_is_not_found_before_settlement() {
        assert!(matches!(
            service().get_payment_status(Uuid::new_v4()),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn negative_seed_balance_is_rejected() {
        assert!(matches!(
            service().set_balance("u1", BigDecimal::from(-1), Deadline::NONE),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn amounts_beyond_the_column_are_validation_errors() {
        let svc = service();
        let huge = |s: &str| BigDecimal::from_str(s).unwrap();
        assert!(matches!(
            svc.process_payment(request(Uuid::new_v4(), "10000000000.00"), Deadline::NONE),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            svc.set_balance("u1", huge("1e10000000"), Deadline::NONE),
            Err(DomainError::Validation(_))
        ));
        assert!(svc
            .set_balance("u1", huge("9999999999.99"), Deadline::NONE)
            .is_ok());
        assert_eq!(svc.repository().payment_count(), 0);
    }

    #[test]
    fn passed_deadline_changes_nothing() {
        let svc = service();
        let order_id = Uuid::new_v4();
        let deadline = Deadline::after(std::time::Duration::ZERO);
        assert!(matches!(
            svc.process_payment(request(order_id, "20.00"), deadline),
            Err(DomainError::Timeout(_))
        ));
        assert_eq!(svc.get_balance("u1").unwrap(), BigDecimal::from(1000));
        assert!(svc.repository().outbox().pending(10).unwrap().is_empty());
    }

    #[test]
    fn replayed_refusal_reports_no_balance() {
        let svc = service();
        svc.set_balance("u1", BigDecimal::from_str("5.00").unwrap(), Deadline::NONE)
            .unwrap();
        let order_id = Uuid::new_v4();
        let first = svc.process_payment(request(order_id, "20.00"), Deadline::NONE).unwrap();
        svc.set_balance("u1", BigDecimal::from_str("500.00").unwrap(), Deadline::NONE)
            .unwrap();
        let replay = svc.process_payment(request(order_id, "20.00"), Deadline::NONE).unwrap();

        assert_eq!(first.message(), "Insufficient funds. Balance: 5.00, Required: 20.00");
        assert!(replay.replayed);
        assert_eq!(replay.message(), "Insufficient funds. Required: 20.00");
    }
}
