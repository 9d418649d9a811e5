use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::booking::BookingId;
use crate::domain::conversation::ConversationId;
use crate::domain::offering::{Offering, OfferingId};
use crate::domain::outbound::{OutboundRequest, Priority};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Greeting,
    AwaitingService,
    AwaitingDate,
    AwaitingTime,
    AwaitingPayment,
    Completed,
    BookingFlow,
}

impl ConversationState {
    pub const ALL: [ConversationState; 7] = [
        ConversationState::Greeting,
        ConversationState::AwaitingService,
        ConversationState::AwaitingDate,
        ConversationState::AwaitingTime,
        ConversationState::AwaitingPayment,
        ConversationState::Completed,
        ConversationState::BookingFlow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::AwaitingService => "awaiting_service",
            Self::AwaitingDate => "awaiting_date",
            Self::AwaitingTime => "awaiting_time",
            Self::AwaitingPayment => "awaiting_payment",
            Self::Completed => "completed",
            Self::BookingFlow => "booking_flow",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == value.trim())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedOffering {
    pub id: OfferingId,
    pub name: String,
    pub price: Decimal,
    pub duration_minutes: u32,
}

impl From<&Offering> for SelectedOffering {
    fn from(value: &Offering) -> Self {
        Self {
            id: value.id.clone(),
            name: value.name.clone(),
            price: value.price,
            duration_minutes: value.duration_minutes,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TraversalOutcome {
    Booked { booking_id: BookingId },
    Abandoned,
}

/// Result of a finished traversal, kept for audit after the conversation
/// starts over. Never read back by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalRecord {
    pub traversal: u32,
    pub outcome: Option<TraversalOutcome>,
    pub offering_name: Option<String>,
    pub date: Option<NaiveDate>,
    pub slot: Option<String>,
    pub closed_at: DateTime<Utc>,
}

/// Accumulating key/value state carried between turns.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationContext {
    pub traversal: u32,
    pub listed_offerings: Vec<OfferingId>,
    pub offering: Option<SelectedOffering>,
    pub date: Option<NaiveDate>,
    pub slot: Option<String>,
    pub outcome: Option<TraversalOutcome>,
    pub previous: Option<TraversalRecord>,
    pub attributes: BTreeMap<String, String>,
}

impl ConversationContext {
    /// Booking idempotency key for the current traversal.
    pub fn booking_key(&self, conversation_id: &ConversationId) -> String {
        format!("{}:{}", conversation_id.0, self.traversal)
    }

    pub fn booked(&self) -> Option<&BookingId> {
        match &self.outcome {
            Some(TraversalOutcome::Booked { booking_id }) => Some(booking_id),
            _ => None,
        }
    }

    /// Moves the finished traversal into `previous` and clears everything the
    /// next traversal collects.
    pub fn archive(&mut self, now: DateTime<Utc>) {
        self.previous = Some(TraversalRecord {
            traversal: self.traversal,
            outcome: self.outcome.take(),
            offering_name: self.offering.take().map(|offering| offering.name),
            date: self.date.take(),
            slot: self.slot.take(),
            closed_at: now,
        });
        self.listed_offerings.clear();
        self.traversal += 1;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FlowAction {
    BookingCreated { booking_id: BookingId },
    BookingAbandoned,
    TraversalArchived { traversal: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: ConversationState,
    pub to: ConversationState,
    pub reply: OutboundRequest,
    pub reply_priority: Priority,
    pub context: ConversationContext,
    pub actions: Vec<FlowAction>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ConversationContext, ConversationState, TraversalOutcome};
    use crate::domain::booking::BookingId;
    use crate::domain::conversation::ConversationId;

    #[test]
    fn state_storage_encoding_round_trips() {
        for state in ConversationState::ALL {
            assert_eq!(ConversationState::parse(state.as_str()), Some(state));
        }
        assert_eq!(ConversationState::parse("awaiting_payment "), Some(ConversationState::AwaitingPayment));
        assert_eq!(ConversationState::parse("done"), None);
    }

    #[test]
    fn archive_keeps_previous_result_and_starts_a_new_traversal() {
        let mut context = ConversationContext {
            slot: Some("10:00".to_string()),
            outcome: Some(TraversalOutcome::Booked { booking_id: BookingId("b-1".to_string()) }),
            ..ConversationContext::default()
        };
        let first_key = context.booking_key(&ConversationId("c-1".to_string()));

        context.archive(Utc::now());

        let previous = context.previous.as_ref().expect("previous traversal");
        assert_eq!(previous.traversal, 0);
        assert_eq!(previous.slot.as_deref(), Some("10:00"));
        assert!(context.booked().is_none());
        assert!(context.slot.is_none());
        assert_eq!(context.traversal, 1);
        assert_ne!(context.booking_key(&ConversationId("c-1".to_string())), first_key);
    }

    #[test]
    fn context_deserializes_with_missing_fields() {
        let context: ConversationContext =
            serde_json::from_str(r#"{"traversal": 3}"#).expect("partial context");
        assert_eq!(context.traversal, 3);
        assert!(context.listed_offerings.is_empty());
    }
}
