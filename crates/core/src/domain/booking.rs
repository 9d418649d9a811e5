use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::conversation::ConversationId;
use crate::domain::offering::{Offering, OfferingId};
use crate::domain::tenant::TenantId;
use crate::flows::parsers::{parse_future_date, parse_phone_handle, parse_slot, InputRejection};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Paid,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn holds_slot(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub tenant_id: TenantId,
    pub conversation_id: ConversationId,
    pub offering_id: OfferingId,
    pub customer_handle: String,
    pub scheduled_date: NaiveDate,
    pub slot_label: String,
    pub amount: Decimal,
    pub status: BookingStatus,
    pub payment_ref: Option<String>,
    pub cancellation_reason: Option<String>,
    pub idempotency_key: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub conversation_id: ConversationId,
    pub offering_id: OfferingId,
    pub customer_handle: String,
    pub date: String,
    pub slot: String,
    pub idempotency_key: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPatch {
    pub offering_id: Option<OfferingId>,
    pub customer_handle: Option<String>,
    pub date: Option<String>,
    pub slot: Option<String>,
    pub metadata: Option<BTreeMap<String, String>>,
}

impl BookingPatch {
    pub fn reschedules(&self) -> bool {
        self.offering_id.is_some() || self.date.is_some() || self.slot.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub reference: String,
    pub amount: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub field: String,
    pub rule: String,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), rule: rule.into(), message: message.into() }
    }
}

impl From<InputRejection> for Violation {
    fn from(value: InputRejection) -> Self {
        Self::new(value.field, value.reason.as_str(), value.message)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BookingError {
    #[error("booking validation failed: {}", summarize(.violations))]
    ValidationFailed { violations: Vec<Violation> },
    #[error("slot {slot} on {date} is already booked for offering {offering_id}")]
    Conflict { offering_id: String, date: NaiveDate, slot: String },
    #[error("booking not found: {0}")]
    NotFound(String),
    #[error("booking {0} is cancelled")]
    Cancelled(String),
    #[error("booking {0} is already cancelled")]
    AlreadyCancelled(String),
    #[error("booking {0} is already paid")]
    AlreadyPaid(String),
    #[error("booking {0} is already confirmed")]
    AlreadyConfirmed(String),
    #[error("booking {id} cannot move from {from} to {to}")]
    InvalidStatusTransition { id: String, from: &'static str, to: &'static str },
    #[error("booking storage failure: {0}")]
    Storage(String),
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|violation| format!("{} ({})", violation.field, violation.rule))
        .collect::<Vec<_>>()
        .join(", ")
}

impl BookingError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationFailed { .. } => "VALIDATION_FAILED",
            Self::Conflict { .. } => "BOOKING_CONFLICT",
            Self::NotFound(_) => "BOOKING_NOT_FOUND",
            Self::Cancelled(_) => "BOOKING_CANCELLED",
            Self::AlreadyCancelled(_) => "BOOKING_ALREADY_CANCELLED",
            Self::AlreadyPaid(_) => "BOOKING_ALREADY_PAID",
            Self::AlreadyConfirmed(_) => "BOOKING_ALREADY_CONFIRMED",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::Storage(_) => "STORAGE_FAILURE",
        }
    }

    /// Rejections the caller caused, as opposed to infrastructure failures.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

/// Field-level checks on the raw request. Referential checks (offering exists
/// and is active, conversation exists) are appended by the caller that owns
/// the repositories; everything is reported together.
pub fn validate_request_fields(
    request: &BookingRequest,
    now: DateTime<Utc>,
) -> (Vec<Violation>, Option<NaiveDate>, Option<String>) {
    let mut violations = Vec::new();

    if request.conversation_id.0.trim().is_empty() {
        violations.push(Violation::new("conversation_id", "required", "conversation id is required"));
    }
    if request.offering_id.0.trim().is_empty() {
        violations.push(Violation::new("offering_id", "required", "offering id is required"));
    }
    if let Err(rejection) = parse_phone_handle(&request.customer_handle) {
        violations.push(rejection.into());
    }

    let date = parse_future_date(&request.date, now)
        .map_err(|rejection| violations.push(rejection.into()))
        .ok();
    let slot = parse_slot(&request.slot).map_err(|rejection| violations.push(rejection.into())).ok();

    (violations, date, slot)
}

pub fn offering_violations(offering: Option<&Offering>, offering_id: &OfferingId) -> Vec<Violation> {
    match offering {
        None if offering_id.0.trim().is_empty() => Vec::new(),
        None => vec![Violation::new(
            "offering_id",
            "exists",
            format!("offering `{}` does not exist", offering_id.0),
        )],
        Some(offering) if !offering.active => vec![Violation::new(
            "offering_id",
            "active",
            format!("offering `{}` is not active", offering.name),
        )],
        Some(_) => Vec::new(),
    }
}

/// First existing booking that holds the same slot, ignoring cancelled
/// bookings and the booking being rescheduled.
pub fn find_conflict<'a>(
    existing: &'a [Booking],
    offering_id: &OfferingId,
    date: NaiveDate,
    slot: &str,
    exclude: Option<&BookingId>,
) -> Option<&'a Booking> {
    existing.iter().find(|booking| {
        booking.status.holds_slot()
            && &booking.offering_id == offering_id
            && booking.scheduled_date == date
            && booking.slot_label == slot
            && Some(&booking.id) != exclude
    })
}

impl Booking {
    pub fn new_pending(
        tenant_id: TenantId,
        request: &BookingRequest,
        date: NaiveDate,
        slot: String,
        amount: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: BookingId(Uuid::new_v4().to_string()),
            tenant_id,
            conversation_id: request.conversation_id.clone(),
            offering_id: request.offering_id.clone(),
            customer_handle: request.customer_handle.trim().to_string(),
            scheduled_date: date,
            slot_label: slot,
            amount,
            status: BookingStatus::Pending,
            payment_ref: None,
            cancellation_reason: None,
            idempotency_key: request.idempotency_key.clone(),
            metadata: request.metadata.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn record_payment(&mut self, payment: &PaymentInfo) -> Result<(), BookingError> {
        match self.status {
            BookingStatus::Pending => {}
            BookingStatus::Paid | BookingStatus::Confirmed => {
                return Err(BookingError::AlreadyPaid(self.id.0.clone()))
            }
            BookingStatus::Cancelled => return Err(BookingError::Cancelled(self.id.0.clone())),
        }

        let mut violations = Vec::new();
        if payment.reference.trim().is_empty() {
            violations.push(Violation::new("payment_ref", "required", "payment reference is required"));
        }
        if let Some(amount) = payment.amount {
            if amount != self.amount {
                violations.push(Violation::new(
                    "amount",
                    "matches_booking",
                    format!("paid amount {amount} does not match booking amount {}", self.amount),
                ));
            }
        }
        if !violations.is_empty() {
            return Err(BookingError::ValidationFailed { violations });
        }

        self.status = BookingStatus::Paid;
        self.payment_ref = Some(payment.reference.trim().to_string());
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn confirm(&mut self) -> Result<(), BookingError> {
        match self.status {
            BookingStatus::Paid => {
                self.status = BookingStatus::Confirmed;
                self.updated_at = Utc::now();
                Ok(())
            }
            BookingStatus::Pending => Err(BookingError::InvalidStatusTransition {
                id: self.id.0.clone(),
                from: BookingStatus::Pending.as_str(),
                to: BookingStatus::Confirmed.as_str(),
            }),
            BookingStatus::Confirmed => Err(BookingError::AlreadyConfirmed(self.id.0.clone())),
            BookingStatus::Cancelled => Err(BookingError::Cancelled(self.id.0.clone())),
        }
    }

    pub fn cancel(&mut self, reason: &str) -> Result<(), BookingError> {
        if self.status == BookingStatus::Cancelled {
            return Err(BookingError::AlreadyCancelled(self.id.0.clone()));
        }
        self.status = BookingStatus::Cancelled;
        let reason = reason.trim();
        self.cancellation_reason = (!reason.is_empty()).then(|| reason.to_string());
        self.updated_at = Utc::now();
        Ok(())
    }
}
