use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use uuid::Uuid;

use super::errors::DomainError;
use super::events::{DeliveryStatusUpdatedEvent, OutboxMessage, TOPIC_DELIVERY_STATUS_UPDATED};

pub const INITIAL_LOCATION: &str = "Processing";
pub const FALLBACK_ADDRESS: &str = "Default Address";
pub const ESTIMATED_DELIVERY_DAYS: i64 = 3;
pub const TRACKING_NUMBER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeliveryStatus {
    Pending,
    InTransit,
    OutForDelivery,
    Delivered,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::InTransit => "IN_TRANSIT",
            DeliveryStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            DeliveryStatus::Delivered => "DELIVERED",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(DeliveryStatus::Pending),
            "IN_TRANSIT" => Ok(DeliveryStatus::InTransit),
            "OUT_FOR_DELIVERY" => Ok(DeliveryStatus::OutForDelivery),
            "DELIVERED" => Ok(DeliveryStatus::Delivered),
            other => Err(DomainError::Validation(format!("unknown delivery status '{other}'"))),
        }
    }
}

/// One step of the physical progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub status: DeliveryStatus,
    pub location: &'static str,
    /// Wait after the previous stage (or after creation, for the first).
    pub delay_secs: i64,
}

pub const STAGES: [Stage; 4] = [
    Stage {
        status: DeliveryStatus::InTransit,
        location: "Warehouse A - Processed",
        delay_secs: 5,
    },
    Stage {
        status: DeliveryStatus::InTransit,
        location: "Sorting Center",
        delay_secs: 10,
    },
    Stage {
        status: DeliveryStatus::OutForDelivery,
        location: "Local Courier Hub",
        delay_secs: 15,
    },
    Stage {
        status: DeliveryStatus::Delivered,
        location: "Delivered to address",
        delay_secs: 20,
    },
];

/// Deadline of stage `step` (zero-based), counted from the delivery's creation.
pub fn stage_due_at(created_at: DateTime<Utc>, step: usize) -> Option<DateTime<Utc>> {
    if step >= STAGES.len() {
        return None;
    }
    let offset: i64 = STAGES[..=step].iter().map(|s| s.delay_secs).sum();
    Some(created_at + Duration::seconds(offset))
}

pub fn generate_tracking_number() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .to_uppercase()
        .chars()
        .take(TRACKING_NUMBER_LEN)
        .collect()
}

pub fn estimated_delivery(created_at: DateTime<Utc>) -> String {
    (created_at + Duration::days(ESTIMATED_DELIVERY_DAYS))
        .format("%Y-%m-%d")
        .to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDelivery {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: String,
    pub address: String,
    pub tracking_number: String,
    pub estimated_delivery: String,
    pub created_at: DateTime<Utc>,
}

impl NewDelivery {
    pub fn new(order_id: Uuid, user_id: &str, address: Option<&str>) -> Self {
        // Postgres keeps microseconds; deadlines must match what is stored.
        let created_at = Utc::now().trunc_subsecs(6);
        let address = address
            .filter(|a| !a.trim().is_empty())
            .unwrap_or(FALLBACK_ADDRESS);
        Self {
            id: Uuid::new_v4(),
            order_id,
            user_id: user_id.to_string(),
            address: address.to_string(),
            tracking_number: generate_tracking_number(),
            estimated_delivery: estimated_delivery(created_at),
            created_at,
        }
    }

    pub fn view(&self) -> DeliveryView {
        DeliveryView {
            id: self.id,
            order_id: self.order_id,
            user_id: self.user_id.clone(),
            address: self.address.clone(),
            status: DeliveryStatus::Pending,
            step: 0,
            tracking_number: self.tracking_number.clone(),
            current_location: INITIAL_LOCATION.to_string(),
            estimated_delivery: self.estimated_delivery.clone(),
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryView {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: String,
    pub address: String,
    pub status: DeliveryStatus,
    /// Number of entries of `STAGES` already applied.
    pub step: i32,
    pub tracking_number: String,
    pub current_location: String,
    pub estimated_delivery: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryView {
    pub fn next_stage(&self) -> Option<&'static Stage> {
        usize::try_from(self.step).ok().and_then(|s| STAGES.get(s))
    }

    pub fn next_due_at(&self) -> Option<DateTime<Utc>> {
        usize::try_from(self.step)
            .ok()
            .and_then(|s| stage_due_at(self.created_at, s))
    }

    pub fn status_event(&self) -> Result<OutboxMessage, DomainError> {
        OutboxMessage::new(
            TOPIC_DELIVERY_STATUS_UPDATED,
            self.order_id,
            &DeliveryStatusUpdatedEvent {
                order_id: self.order_id,
                delivery_id: self.id,
                status: self.status.as_str().to_string(),
                tracking_number: self.tracking_number.clone(),
                estimated_date: self.estimated_delivery.clone(),
                current_location: Some(self.current_location.clone()),
                step: self.step,
            },
        )
    }

    /// The view as it will look once `stage` has been applied at `now`.
    pub fn advanced(&self, stage: &Stage, now: DateTime<Utc>) -> DeliveryView {
        DeliveryView {
            status: stage.status,
            step: self.step + 1,
            current_location: stage.location.to_string(),
            updated_at: now,
            ..self.clone()
        }
    }
}

/// Result of a create-delivery request.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryCreation {
    Created(DeliveryView),
    /// A delivery for the order already existed.
    Existing(DeliveryView),
}

impl DeliveryCreation {
    pub fn view(&self) -> &DeliveryView {
        match self {
            DeliveryCreation::Created(v) | DeliveryCreation::Existing(v) => v,
        }
    }
}
