use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::DomainError;
use super::events::{OutboxMessage, PaymentCompletedEvent, TOPIC_PAYMENT_COMPLETED};
use super::order::check_money;

/// Balance granted to a user the first time they are seen.
pub const DEFAULT_OPENING_BALANCE: &str = "1000.00";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Success,
    InsufficientFunds,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::InsufficientFunds => "INSUFFICIENT_FUNDS",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(PaymentStatus::Success),
            "INSUFFICIENT_FUNDS" => Ok(PaymentStatus::InsufficientFunds),
            other => Err(DomainError::Validation(format!("unknown payment status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub order_id: Uuid,
    pub user_id: String,
    pub amount: BigDecimal,
    pub delivery_address: Option<String>,
}

impl PaymentRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.user_id.trim().is_empty() {
            return Err(DomainError::Validation("user_id is required".to_string()));
        }
        check_money("amount", &self.amount)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentView {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: String,
    pub amount: BigDecimal,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

/// Everything a settling transaction must write, computed from the locked
/// balance before any row is touched.
#[derive(Debug, Clone)]
pub struct SettlementPlan {
    pub payment: PaymentView,
    /// `None` when the balance is left unchanged.
    pub new_balance: Option<BigDecimal>,
    pub event: OutboxMessage,
}

impl SettlementPlan {
    pub fn decide(request: &PaymentRequest, balance: &BigDecimal) -> Result<Self, DomainError> {
        let (status, new_balance) = if &request.amount > balance {
            (PaymentStatus::InsufficientFunds, None)
        } else {
            (PaymentStatus::Success, Some(balance - &request.amount))
        };

        let payment = PaymentView {
            id: Uuid::new_v4(),
            order_id: request.order_id,
            user_id: request.user_id.clone(),
            amount: request.amount.clone(),
            status,
            created_at: Utc::now(),
        };
        let event = OutboxMessage::new(
            TOPIC_PAYMENT_COMPLETED,
            request.order_id,
            &PaymentCompletedEvent {
                order_id: payment.order_id,
                payment_id: payment.id,
                user_id: payment.user_id.clone(),
                amount: payment.amount.clone(),
                status: status.as_str().to_string(),
                delivery_address: request.delivery_address.clone(),
            },
        )?;

        Ok(Self {
            payment,
            new_balance,
            event,
        })
    }
}

/// Outcome of settling a payment request.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub payment: PaymentView,
    /// Balance this request was decided against. Unknown on replay, since
    /// the balance may have moved since the original decision.
    pub balance_before: Option<BigDecimal>,
    /// True when a payment for the order already existed and nothing was written.
    pub replayed: bool,
}

impl Settlement {
    pub fn message(&self) -> String {
        match self.payment.status {
            PaymentStatus::Success => {
                format!("Payment of {} processed successfully", self.payment.amount)
            }
            PaymentStatus::InsufficientFunds => match &self.balance_before {
                Some(balance) => format!(
                    "Insufficient funds. Balance: {balance}, Required: {}",
                    self.payment.amount
                ),
                None => format!("Insufficient funds. Required: {}", self.payment.amount),
            },
        }
    }
}
