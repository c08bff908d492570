use std::fmt;
use std::str::FromStr;

use bigdecimal::num_bigint::Sign;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::delivery::DeliveryStatus;
use super::errors::DomainError;
use super::payment::PaymentStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Paid,
    InsufficientFunds,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::InsufficientFunds => "INSUFFICIENT_FUNDS",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

impl From<PaymentStatus> for OrderStatus {
    fn from(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::Success => OrderStatus::Paid,
            PaymentStatus::InsufficientFunds => OrderStatus::InsufficientFunds,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "INSUFFICIENT_FUNDS" => Ok(OrderStatus::InsufficientFunds),
            other => Err(DomainError::Validation(format!("unknown order status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItemInput {
    pub product_id: String,
    pub quantity: i32,
    pub price: BigDecimal,
}

/// A validated order ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: Uuid,
    pub user_id: String,
    pub items: Vec<OrderItemInput>,
    pub total_amount: BigDecimal,
    pub delivery_address: String,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    pub fn validate(
        user_id: &str,
        items: Vec<OrderItemInput>,
        delivery_address: &str,
    ) -> Result<Self, DomainError> {
        if user_id.trim().is_empty() {
            return Err(DomainError::Validation("user_id is required".to_string()));
        }
        if items.is_empty() {
            return Err(DomainError::Validation("at least one item is required".to_string()));
        }
        for item in &items {
            if item.product_id.trim().is_empty() {
                return Err(DomainError::Validation("product_id is required".to_string()));
            }
            if item.quantity <= 0 {
                return Err(DomainError::Validation(format!(
                    "quantity for '{}' must be positive",
                    item.product_id
                )));
            }
            check_money(&format!("price for '{}'", item.product_id), &item.price)?;
        }
        let total = total_amount(&items);
        check_money("total_amount", &total)?;

        Ok(Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            total_amount: total,
            items,
            delivery_address: delivery_address.to_string(),
            created_at: Utc::now(),
        })
    }
}

/// Largest amount a NUMERIC(12,2) column holds.
pub const MAX_AMOUNT: &str = "9999999999.99";
const MAX_INTEGER_DIGITS: i64 = 10;

/// Accept `amount` only if a NUMERIC(12,2) column stores it exactly.
///
/// Works on the normalized mantissa and exponent, so inputs such as
/// `1e10000000` are rejected without being expanded.
pub fn check_money(field: &str, amount: &BigDecimal) -> Result<(), DomainError> {
    if amount.sign() == Sign::Minus {
        return Err(DomainError::Validation(format!("{field} must not be negative")));
    }
    let normalized = amount.normalized();
    let (_, scale) = normalized.as_bigint_and_exponent();
    if scale > 2 {
        return Err(DomainError::Validation(format!(
            "{field} has more than two decimal places"
        )));
    }
    if normalized.digits() as i64 - scale > MAX_INTEGER_DIGITS {
        return Err(DomainError::Validation(format!("{field} exceeds {MAX_AMOUNT}")));
    }
    Ok(())
}

/// Exact decimal sum of price × quantity.
pub fn total_amount(items: &[OrderItemInput]) -> BigDecimal {
    items
        .iter()
        .fold(BigDecimal::from(0), |acc, item| acc + &item.price * BigDecimal::from(item.quantity))
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderView {
    pub id: Uuid,
    pub user_id: String,
    pub status: OrderStatus,
    pub total_amount: BigDecimal,
    pub delivery_address: String,
    pub created_at: DateTime<Utc>,
}

/// Read model row fed by `delivery.status.updated`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryStatusView {
    pub order_id: Uuid,
    pub status: DeliveryStatus,
    pub tracking_number: String,
    pub estimated_delivery: String,
    pub current_location: Option<String>,
    /// Stages applied so far; orders updates that share a status.
    pub step: i32,
}

impl DeliveryStatusView {
    /// Whether `self` would move the read model backwards from a row at
    /// `current` status and `current_step`.
    pub fn is_behind(&self, current: DeliveryStatus, current_step: i32) -> bool {
        (current, current_step) > (self.status, self.step)
    }
}

/// What the order side knows about shipping.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryTracking {
    pub order_id: Uuid,
    pub order_status: OrderStatus,
    pub delivery: Option<DeliveryStatusView>,
}

impl DeliveryTracking {
    pub const NOT_DISPATCHED: &'static str = "NOT_DISPATCHED";

    pub fn status_label(&self) -> &'static str {
        self.delivery
            .as_ref()
            .map(|d| d.status.as_str())
            .unwrap_or(Self::NOT_DISPATCHED)
    }
}

/// Result of applying a payment outcome to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Applied,
    AlreadyApplied,
    /// The order already holds a different terminal status; left untouched.
    Conflict(OrderStatus),
}

/// Decide how `target` applies to an order currently in `current`.
pub fn resolve_status_change(current: OrderStatus, target: OrderStatus) -> StatusChange {
    if current == target {
        StatusChange::AlreadyApplied
    } else if current.is_terminal() {
        StatusChange::Conflict(current)
    } else {
        StatusChange::Applied
    }
}
