use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use slotline_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use slotline_core::delivery::{Admission, OutboundSink};
use slotline_core::domain::conversation::{Conversation, ConversationId};
use slotline_core::domain::message::{InboundMessage, Message};
use slotline_core::domain::outbound::{OutboundRequest, Priority};
use slotline_core::domain::tenant::{ChannelIdentity, TenantId, TenantProfile};
use slotline_core::errors::ApplicationError;
use slotline_core::flows::{
    ConversationEngine, ConversationState, FlowAction, FlowError, FlowSettings, TurnInput,
};
use slotline_db::repositories::{Repositories, RepositoryError};

use crate::booking::BookingService;
use crate::catalog::RepositoryCatalog;
use crate::locks::KeyedLocks;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no tenant is registered for channel identity `{0}`")]
    UnknownTenant(String),
    #[error("conversation storage failed: {0}")]
    Storage(#[from] RepositoryError),
}

impl From<RuntimeError> for ApplicationError {
    fn from(value: RuntimeError) -> Self {
        match value {
            RuntimeError::UnknownTenant(identity) => Self::UnknownTenant(identity),
            RuntimeError::Storage(error) => Self::Persistence(error.to_string()),
        }
    }
}

/// What happened to one inbound message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnReport {
    /// The external id was already recorded; nothing ran.
    Duplicate { tenant_id: TenantId, message_id: String },
    /// The engine advanced (or deliberately kept) the conversation state.
    Applied {
        tenant_id: TenantId,
        conversation_id: ConversationId,
        from: ConversationState,
        to: ConversationState,
        delivery: Option<Admission>,
    },
    /// A downstream failure; state and context were left untouched.
    Retained {
        tenant_id: TenantId,
        conversation_id: ConversationId,
        state: ConversationState,
        error_code: String,
        delivery: Option<Admission>,
    },
}

fn flow_error_code(error: &FlowError) -> &'static str {
    match error {
        FlowError::Catalog(_) => "CATALOG_UNAVAILABLE",
        FlowError::Booking(booking) => booking.code(),
        FlowError::Timeout { .. } => "TIMEOUT",
        FlowError::IncompleteContext(_) => "INCOMPLETE_CONTEXT",
    }
}

/// Runs inbound messages through the conversation engine: resolves the
/// tenant, serializes turns per (tenant, customer handle), persists the
/// conversation and message log, and hands the reply to delivery.
pub struct ConversationRuntime {
    repositories: Repositories,
    engine: ConversationEngine,
    outbound: Arc<dyn OutboundSink>,
    audit: Arc<dyn AuditSink>,
    conversation_locks: KeyedLocks<(TenantId, String)>,
}

impl ConversationRuntime {
    pub fn new(
        repositories: Repositories,
        engine: ConversationEngine,
        outbound: Arc<dyn OutboundSink>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { repositories, engine, outbound, audit, conversation_locks: KeyedLocks::default() }
    }

    /// Wires the engine to repository-backed offerings and bookings.
    pub fn assemble(
        repositories: Repositories,
        settings: FlowSettings,
        outbound: Arc<dyn OutboundSink>,
        audit: Arc<dyn AuditSink>,
    ) -> (Self, Arc<BookingService>) {
        let bookings = Arc::new(BookingService::new(repositories.clone(), Arc::clone(&audit)));
        let catalog = Arc::new(RepositoryCatalog::new(Arc::clone(&repositories.offerings)));
        let engine = ConversationEngine::new(settings, catalog, bookings.clone());
        (Self::new(repositories, engine, outbound, audit), bookings)
    }

    pub async fn resolve_tenant(
        &self,
        identity: &ChannelIdentity,
    ) -> Result<TenantProfile, RuntimeError> {
        self.repositories
            .tenants
            .find_by_channel_identity(identity)
            .await?
            .ok_or_else(|| RuntimeError::UnknownTenant(identity.0.clone()))
    }

    /// Runs one turn for an inbound message. The message is logged before the
    /// transition runs, so a redelivery of a turn that ended `Retained` is
    /// acknowledged as a duplicate; the customer recovers by sending again.
    pub async fn handle_inbound(
        &self,
        identity: &ChannelIdentity,
        inbound: InboundMessage,
    ) -> Result<TurnReport, RuntimeError> {
        let profile = match self.resolve_tenant(identity).await {
            Ok(profile) => profile,
            Err(RuntimeError::UnknownTenant(identity)) => {
                warn!(
                    event_name = "runtime.inbound.unknown_tenant",
                    channel_identity = %identity,
                    correlation_id = %inbound.id,
                    "skipping inbound message for unregistered channel identity"
                );
                return Err(RuntimeError::UnknownTenant(identity));
            }
            Err(other) => return Err(other),
        };
        let tenant_id = profile.tenant_id.clone();

        let _turn = self
            .conversation_locks
            .lock((tenant_id.clone(), inbound.sender_handle.clone()))
            .await;

        if self.repositories.messages.exists_external(&tenant_id, &inbound.id).await? {
            return Ok(self.duplicate(tenant_id, inbound.id));
        }

        let conversation = self.load_or_start(&tenant_id, &inbound.sender_handle).await?;
        match self
            .repositories
            .messages
            .append(Message::inbound(tenant_id.clone(), conversation.id.clone(), &inbound))
            .await
        {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => return Ok(self.duplicate(tenant_id, inbound.id)),
            Err(other) => return Err(other.into()),
        }

        let now = Utc::now();
        let turn = self
            .engine
            .transition(TurnInput {
                profile: &profile,
                conversation_id: &conversation.id,
                customer_handle: &conversation.customer_handle,
                state: conversation.state,
                context: &conversation.context,
                text: inbound.text.as_deref(),
                selection: inbound.interactive_selection.as_ref(),
                now,
            })
            .await;

        let audit = AuditContext::new(
            Some(tenant_id.clone()),
            Some(conversation.id.clone()),
            inbound.id.clone(),
            "conversation-runtime",
        );

        match turn {
            Ok(outcome) => {
                let mut updated = conversation;
                updated.state = outcome.to;
                updated.context = outcome.context;
                updated.updated_at = now;
                self.repositories.conversations.save(updated.clone()).await?;

                for action in &outcome.actions {
                    if let FlowAction::TraversalArchived { traversal } = action {
                        self.audit.emit(
                            audit
                                .event(
                                    "conversation.traversal_archived",
                                    AuditCategory::Flow,
                                    AuditOutcome::Success,
                                )
                                .with_metadata("traversal", traversal.to_string()),
                        );
                    }
                }
                self.audit.emit(
                    audit
                        .event("conversation.transition", AuditCategory::Flow, AuditOutcome::Success)
                        .with_metadata("from", outcome.from.as_str())
                        .with_metadata("to", outcome.to.as_str()),
                );
                info!(
                    event_name = "runtime.turn.applied",
                    tenant_id = %tenant_id.0,
                    conversation_id = %updated.id.0,
                    correlation_id = %inbound.id,
                    from = outcome.from.as_str(),
                    to = outcome.to.as_str(),
                    "conversation turn applied"
                );

                let delivery =
                    self.reply(&tenant_id, &updated.id, outcome.reply, outcome.reply_priority).await?;
                Ok(TurnReport::Applied {
                    tenant_id,
                    conversation_id: updated.id,
                    from: outcome.from,
                    to: outcome.to,
                    delivery,
                })
            }
            Err(flow_error) => {
                let code = flow_error_code(&flow_error);
                let rejected = matches!(&flow_error, FlowError::Booking(booking) if booking.is_rejection());
                if rejected {
                    warn!(
                        event_name = "runtime.turn.rejected",
                        tenant_id = %tenant_id.0,
                        conversation_id = %conversation.id.0,
                        correlation_id = %inbound.id,
                        code,
                        error = %flow_error,
                        "turn rejected; conversation state retained"
                    );
                } else {
                    error!(
                        event_name = "runtime.turn.failed",
                        tenant_id = %tenant_id.0,
                        conversation_id = %conversation.id.0,
                        correlation_id = %inbound.id,
                        code,
                        error = %flow_error,
                        "turn failed; conversation state retained"
                    );
                }
                self.audit.emit(
                    audit
                        .event(
                            "conversation.transition",
                            AuditCategory::Flow,
                            if rejected { AuditOutcome::Rejected } else { AuditOutcome::Failed },
                        )
                        .with_metadata("state", conversation.state.as_str())
                        .with_metadata("code", code),
                );

                let reply = OutboundRequest::text(
                    conversation.customer_handle.clone(),
                    flow_error.user_reply(),
                )
                .with_metadata("conversation_id", conversation.id.0.clone())
                .with_metadata("state", conversation.state.as_str());
                let delivery =
                    self.reply(&tenant_id, &conversation.id, reply, Priority::Normal).await?;
                Ok(TurnReport::Retained {
                    tenant_id,
                    conversation_id: conversation.id,
                    state: conversation.state,
                    error_code: code.to_string(),
                    delivery,
                })
            }
        }
    }

    async fn load_or_start(
        &self,
        tenant_id: &TenantId,
        customer_handle: &str,
    ) -> Result<Conversation, RuntimeError> {
        if let Some(existing) =
            self.repositories.conversations.find_by_handle(tenant_id, customer_handle).await?
        {
            return Ok(existing);
        }

        let conversation = Conversation::start(tenant_id.clone(), customer_handle);
        self.repositories.conversations.save(conversation.clone()).await?;
        info!(
            event_name = "runtime.conversation.started",
            tenant_id = %tenant_id.0,
            conversation_id = %conversation.id.0,
            "conversation started"
        );
        Ok(conversation)
    }

    /// Logs the reply and submits it. A delivery refusal is logged and
    /// reported as `None`; the turn itself is already persisted.
    async fn reply(
        &self,
        tenant_id: &TenantId,
        conversation_id: &ConversationId,
        request: OutboundRequest,
        priority: Priority,
    ) -> Result<Option<Admission>, RuntimeError> {
        self.repositories
            .messages
            .append(Message::outbound(
                tenant_id.clone(),
                conversation_id.clone(),
                request.kind.message_type(),
                request.body.clone(),
            ))
            .await?;

        match self.outbound.submit(tenant_id, request, priority).await {
            Ok(admission) => Ok(Some(admission)),
            Err(delivery_error) => {
                warn!(
                    event_name = "runtime.reply.not_submitted",
                    tenant_id = %tenant_id.0,
                    conversation_id = %conversation_id.0,
                    error = %delivery_error,
                    "reply was not accepted for delivery"
                );
                Ok(None)
            }
        }
    }

    fn duplicate(&self, tenant_id: TenantId, message_id: String) -> TurnReport {
        info!(
            event_name = "runtime.inbound.duplicate",
            tenant_id = %tenant_id.0,
            correlation_id = %message_id,
            "inbound message already processed"
        );
        self.audit.emit(
            AuditContext::new(Some(tenant_id.clone()), None, message_id.clone(), "conversation-runtime")
                .event("inbound.duplicate", AuditCategory::Ingress, AuditOutcome::Rejected),
        );
        TurnReport::Duplicate { tenant_id, message_id }
    }
}
