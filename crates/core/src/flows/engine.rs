use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::domain::booking::{Booking, BookingError, BookingRequest};
use crate::domain::conversation::ConversationId;
use crate::domain::message::InteractiveSelection;
use crate::domain::offering::Offering;
use crate::domain::outbound::{ListRow, MessageKind, OutboundRequest, Priority, ReplyButton};
use crate::domain::tenant::{ActiveFlow, TenantId, TenantProfile};
use crate::flows::parsers::{
    choose_offering, choose_offering_by_selection, classify_payment_reply, detect_booking_intent,
    parse_express_booking, parse_future_date, parse_slot, PaymentReply, CANCEL_SELECTION_ID,
    CONFIRM_SELECTION_ID, OFFERING_SELECTION_PREFIX,
};
use crate::flows::states::{
    ConversationContext, ConversationState, FlowAction, SelectedOffering, TransitionOutcome,
    TraversalOutcome,
};

pub const GENERIC_RETRY_REPLY: &str =
    "Sorry, something went wrong on our side and nothing was changed. Please send your last message again.";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("offering lookup failed: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait OfferingCatalog: Send + Sync {
    async fn active_offerings(&self, tenant_id: &TenantId) -> Result<Vec<Offering>, CatalogError>;
}

#[async_trait]
pub trait BookingPort: Send + Sync {
    async fn create_booking(
        &self,
        tenant_id: &TenantId,
        request: BookingRequest,
    ) -> Result<Booking, BookingError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Booking(#[from] BookingError),
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: &'static str, timeout_ms: u64 },
    #[error("conversation context is missing `{0}`")]
    IncompleteContext(&'static str),
}

impl FlowError {
    /// Customer-facing text for a failed turn. The conversation keeps its
    /// previous state, so every message here is safe to answer again.
    pub fn user_reply(&self) -> String {
        match self {
            Self::Booking(BookingError::Conflict { .. }) => {
                "Sorry, that time was just taken by someone else. Reply *cancel* to start over and pick another time.".to_string()
            }
            Self::Booking(BookingError::ValidationFailed { violations }) => {
                let lines = violations
                    .iter()
                    .map(|violation| format!("- {}", violation.message))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("I could not complete the booking:\n{lines}\nReply *cancel* to start over.")
            }
            _ => GENERIC_RETRY_REPLY.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FlowSettings {
    pub call_timeout: Duration,
    pub confirm_keywords: Vec<String>,
    pub cancel_keywords: Vec<String>,
    pub booking_intent_keywords: Vec<String>,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for FlowSettings {
    fn from(value: &EngineConfig) -> Self {
        let lower = |words: &[String]| words.iter().map(|word| word.to_lowercase()).collect();
        Self {
            call_timeout: Duration::from_millis(value.call_timeout_ms),
            confirm_keywords: lower(&value.confirm_keywords),
            cancel_keywords: lower(&value.cancel_keywords),
            booking_intent_keywords: lower(&value.booking_intent_keywords),
        }
    }
}

/// Everything one turn needs. The tenant profile is passed per call; the
/// engine holds no tenant state of its own.
#[derive(Clone, Copy, Debug)]
pub struct TurnInput<'a> {
    pub profile: &'a TenantProfile,
    pub conversation_id: &'a ConversationId,
    pub customer_handle: &'a str,
    pub state: ConversationState,
    pub context: &'a ConversationContext,
    pub text: Option<&'a str>,
    pub selection: Option<&'a InteractiveSelection>,
    pub now: DateTime<Utc>,
}

impl TurnInput<'_> {
    fn selection_id(&self) -> Option<&str> {
        self.selection.map(|selection| selection.id.as_str())
    }
}

struct Step {
    to: ConversationState,
    reply: OutboundRequest,
    priority: Priority,
}

impl Step {
    fn normal(to: ConversationState, reply: OutboundRequest) -> Self {
        Self { to, reply, priority: Priority::Normal }
    }
}

pub struct ConversationEngine {
    settings: FlowSettings,
    catalog: Arc<dyn OfferingCatalog>,
    bookings: Arc<dyn BookingPort>,
}

impl ConversationEngine {
    pub fn new(
        settings: FlowSettings,
        catalog: Arc<dyn OfferingCatalog>,
        bookings: Arc<dyn BookingPort>,
    ) -> Self {
        Self { settings, catalog, bookings }
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    /// Runs one turn. On `Err` nothing has been applied: the caller keeps the
    /// state and context it passed in and answers with `FlowError::user_reply`.
    pub async fn transition(&self, input: TurnInput<'_>) -> Result<TransitionOutcome, FlowError> {
        let mut context = input.context.clone();
        let mut actions = Vec::new();
        let mut state = input.state;

        if state == ConversationState::Completed {
            actions.push(FlowAction::TraversalArchived { traversal: context.traversal });
            context.archive(input.now);
            state = ConversationState::Greeting;
        }

        let step = match state {
            ConversationState::Greeting | ConversationState::Completed => {
                self.greet(&input, &mut context).await?
            }
            ConversationState::AwaitingService => self.select_service(&input, &mut context).await?,
            ConversationState::AwaitingDate => select_date(&input, &mut context),
            ConversationState::AwaitingTime => select_time(&input, &mut context)?,
            ConversationState::AwaitingPayment => {
                self.settle_payment(&input, &mut context, &mut actions).await?
            }
            ConversationState::BookingFlow => self.express_booking(&input, &mut context).await?,
        };

        let reply = step
            .reply
            .with_metadata("conversation_id", input.conversation_id.0.clone())
            .with_metadata("state", step.to.as_str());

        Ok(TransitionOutcome {
            from: input.state,
            to: step.to,
            reply,
            reply_priority: step.priority,
            context,
            actions,
        })
    }

    async fn greet(
        &self,
        input: &TurnInput<'_>,
        context: &mut ConversationContext,
    ) -> Result<Step, FlowError> {
        let offerings = self.active_offerings(&input.profile.tenant_id).await?;
        if offerings.is_empty() {
            return Ok(Step::normal(
                ConversationState::Greeting,
                OutboundRequest::text(
                    input.customer_handle,
                    format!(
                        "Hi! {} has no services open for booking right now. Please check back later.",
                        input.profile.display_name
                    ),
                ),
            ));
        }

        context.listed_offerings = offerings.iter().map(|offering| offering.id.clone()).collect();

        let express = input.profile.active_flow == ActiveFlow::Booking
            && input
                .text
                .is_some_and(|text| detect_booking_intent(text, &self.settings.booking_intent_keywords));

        if express {
            let example = (input.now + chrono::Duration::days(1)).date_naive();
            let intro = format!(
                "Hi! Welcome to {}. To book, reply with the service, date and time in one message, for example `1 {example} 14:30`.",
                input.profile.display_name
            );
            return Ok(Step::normal(
                ConversationState::BookingFlow,
                offering_menu(input, &offerings, &intro),
            ));
        }

        let intro = format!(
            "Hi! Welcome to {}. Here is what we offer:",
            input.profile.display_name
        );
        Ok(Step::normal(ConversationState::AwaitingService, offering_menu(input, &offerings, &intro)))
    }

    async fn select_service(
        &self,
        input: &TurnInput<'_>,
        context: &mut ConversationContext,
    ) -> Result<Step, FlowError> {
        let offerings = self.active_offerings(&input.profile.tenant_id).await?;

        let chosen = match (input.selection_id(), input.text) {
            (Some(selection), _) if selection.starts_with(OFFERING_SELECTION_PREFIX) => {
                choose_offering_by_selection(selection, &offerings)
            }
            (_, Some(text)) => choose_offering(text, &context.listed_offerings, &offerings),
            (selection, None) => {
                choose_offering(selection.unwrap_or_default(), &context.listed_offerings, &offerings)
            }
        };

        match chosen {
            Ok(offering) => {
                let selected = SelectedOffering::from(offering);
                let reply = OutboundRequest::text(
                    input.customer_handle,
                    format!(
                        "Great choice: {} ({}). Which date would you like? Reply with a date like {}.",
                        selected.name,
                        money(&input.profile.currency, selected.price),
                        (input.now + chrono::Duration::days(1)).date_naive()
                    ),
                );
                context.offering = Some(selected);
                Ok(Step::normal(ConversationState::AwaitingDate, reply))
            }
            Err(rejection) => {
                if !offerings.is_empty() {
                    context.listed_offerings =
                        offerings.iter().map(|offering| offering.id.clone()).collect();
                }
                Ok(Step::normal(
                    ConversationState::AwaitingService,
                    offering_menu(input, &offerings, &rejection.message),
                ))
            }
        }
    }

    async fn settle_payment(
        &self,
        input: &TurnInput<'_>,
        context: &mut ConversationContext,
        actions: &mut Vec<FlowAction>,
    ) -> Result<Step, FlowError> {
        let offering = context.offering.clone().ok_or(FlowError::IncompleteContext("offering"))?;
        let date = context.date.ok_or(FlowError::IncompleteContext("date"))?;
        let slot = context.slot.clone().ok_or(FlowError::IncompleteContext("slot"))?;

        let reply = classify_payment_reply(
            input.text,
            input.selection_id(),
            &self.settings.confirm_keywords,
            &self.settings.cancel_keywords,
        );

        match reply {
            PaymentReply::Confirm => {
                if let Some(existing) = context.booked() {
                    return Ok(Step::normal(
                        ConversationState::Completed,
                        OutboundRequest::text(
                            input.customer_handle,
                            format!("You're already booked. Reference: {}.", existing.0),
                        ),
                    ));
                }

                let request = BookingRequest {
                    conversation_id: input.conversation_id.clone(),
                    offering_id: offering.id.clone(),
                    customer_handle: input.customer_handle.to_string(),
                    date: date.to_string(),
                    slot: slot.clone(),
                    idempotency_key: Some(context.booking_key(input.conversation_id)),
                    metadata: [("channel".to_string(), "chat".to_string())].into_iter().collect(),
                };
                let booking = self
                    .bounded(
                        "booking create",
                        self.bookings.create_booking(&input.profile.tenant_id, request),
                    )
                    .await??;

                actions.push(FlowAction::BookingCreated { booking_id: booking.id.clone() });
                context.outcome = Some(TraversalOutcome::Booked { booking_id: booking.id.clone() });

                let body = format!(
                    "You're booked! {} on {} at {}. Reference: {}. Amount due: {}.",
                    offering.name,
                    booking.scheduled_date,
                    booking.slot_label,
                    booking.id.0,
                    money(&input.profile.currency, booking.amount)
                );
                Ok(Step {
                    to: ConversationState::Completed,
                    reply: OutboundRequest::text(input.customer_handle, body)
                        .with_metadata("booking_id", booking.id.0.clone()),
                    priority: Priority::High,
                })
            }
            PaymentReply::Cancel => {
                actions.push(FlowAction::BookingAbandoned);
                context.outcome = Some(TraversalOutcome::Abandoned);
                Ok(Step::normal(
                    ConversationState::Completed,
                    OutboundRequest::text(
                        input.customer_handle,
                        "No problem, nothing was booked. Message us any time to start again.",
                    ),
                ))
            }
            PaymentReply::Unclear => Ok(Step::normal(
                ConversationState::AwaitingPayment,
                booking_summary(input, &offering, date, &slot),
            )),
        }
    }

    async fn express_booking(
        &self,
        input: &TurnInput<'_>,
        context: &mut ConversationContext,
    ) -> Result<Step, FlowError> {
        let offerings = self.active_offerings(&input.profile.tenant_id).await?;
        let text = input.text.unwrap_or_default();

        match parse_express_booking(text, &context.listed_offerings, &offerings, input.now) {
            Ok(parsed) => {
                let selected = SelectedOffering::from(parsed.offering);
                let reply = booking_summary(input, &selected, parsed.date, &parsed.slot);
                context.offering = Some(selected);
                context.date = Some(parsed.date);
                context.slot = Some(parsed.slot);
                Ok(Step::normal(ConversationState::AwaitingPayment, reply))
            }
            Err(problems) => {
                let lines = problems
                    .iter()
                    .map(|problem| format!("- {}", problem.message))
                    .collect::<Vec<_>>()
                    .join("\n");
                let example = (input.now + chrono::Duration::days(1)).date_naive();
                Ok(Step::normal(
                    ConversationState::BookingFlow,
                    OutboundRequest::text(
                        input.customer_handle,
                        format!(
                            "I need a service, a date and a time, for example `1 {example} 14:30`.\n{lines}"
                        ),
                    ),
                ))
            }
        }
    }

    async fn active_offerings(&self, tenant_id: &TenantId) -> Result<Vec<Offering>, FlowError> {
        let offerings = self
            .bounded("offering lookup", self.catalog.active_offerings(tenant_id))
            .await??;
        Ok(offerings.into_iter().filter(|offering| offering.active).collect())
    }

    async fn bounded<F, T>(&self, operation: &'static str, call: F) -> Result<T, FlowError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.settings.call_timeout, call).await.map_err(|_| {
            FlowError::Timeout {
                operation,
                timeout_ms: u64::try_from(self.settings.call_timeout.as_millis()).unwrap_or(u64::MAX),
            }
        })
    }
}

fn select_date(input: &TurnInput<'_>, context: &mut ConversationContext) -> Step {
    match parse_future_date(input.text.unwrap_or_default(), input.now) {
        Ok(date) => {
            context.date = Some(date);
            Step::normal(
                ConversationState::AwaitingTime,
                OutboundRequest::text(
                    input.customer_handle,
                    format!("{date} it is. What time suits you? Reply in 24-hour HH:MM, for example 14:30."),
                ),
            )
        }
        Err(rejection) => Step::normal(
            ConversationState::AwaitingDate,
            OutboundRequest::text(input.customer_handle, rejection.message),
        ),
    }
}

fn select_time(input: &TurnInput<'_>, context: &mut ConversationContext) -> Result<Step, FlowError> {
    match parse_slot(input.text.unwrap_or_default()) {
        Ok(slot) => {
            let offering = context.offering.clone().ok_or(FlowError::IncompleteContext("offering"))?;
            let date = context.date.ok_or(FlowError::IncompleteContext("date"))?;
            let reply = booking_summary(input, &offering, date, &slot);
            context.slot = Some(slot);
            Ok(Step::normal(ConversationState::AwaitingPayment, reply))
        }
        Err(rejection) => Ok(Step::normal(
            ConversationState::AwaitingTime,
            OutboundRequest::text(input.customer_handle, rejection.message),
        )),
    }
}

fn money(currency: &str, amount: Decimal) -> String {
    format!("{currency} {amount:.2}")
}

fn offering_menu(input: &TurnInput<'_>, offerings: &[Offering], intro: &str) -> OutboundRequest {
    let lines = offerings
        .iter()
        .enumerate()
        .map(|(index, offering)| {
            format!(
                "{}. {} - {} ({} min)",
                index + 1,
                offering.name,
                money(&input.profile.currency, offering.price),
                offering.duration_minutes
            )
        })
        .collect::<Vec<_>>();
    let rows = offerings
        .iter()
        .enumerate()
        .map(|(index, offering)| ListRow {
            id: format!("{OFFERING_SELECTION_PREFIX}{}", offering.id.0),
            title: format!("{}. {}", index + 1, offering.name),
            description: Some(format!(
                "{} - {} min",
                money(&input.profile.currency, offering.price),
                offering.duration_minutes
            )),
        })
        .collect();

    OutboundRequest::text(
        input.customer_handle,
        format!("{intro}\n{}\nReply with a number or the name of a service.", lines.join("\n")),
    )
    .with_kind(MessageKind::List { button_label: "Services".to_string(), rows })
}

fn booking_summary(
    input: &TurnInput<'_>,
    offering: &SelectedOffering,
    date: NaiveDate,
    slot: &str,
) -> OutboundRequest {
    let body = format!(
        "Please check your booking:\nService: {}\nDate: {date}\nTime: {slot}\nPrice: {}\nReply *confirm* to book or *cancel* to stop.",
        offering.name,
        money(&input.profile.currency, offering.price),
    );
    OutboundRequest::text(input.customer_handle, body).with_kind(MessageKind::Buttons {
        buttons: vec![
            ReplyButton::new(CONFIRM_SELECTION_ID, "Confirm"),
            ReplyButton::new(CANCEL_SELECTION_ID, "Cancel"),
        ],
    })
}
