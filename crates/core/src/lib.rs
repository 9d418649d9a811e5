pub mod audit;
pub mod config;
pub mod delivery;
pub mod domain;
pub mod errors;
pub mod flows;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use delivery::{Admission, DeliveryError, OutboundSink};
pub use domain::booking::{Booking, BookingError, BookingId, BookingRequest, BookingStatus};
pub use domain::conversation::{Conversation, ConversationId};
pub use domain::message::{InboundMessage, Message, MessageDirection, MessageType};
pub use domain::offering::{Offering, OfferingId};
pub use domain::outbound::{OutboundEnvelope, OutboundRequest, Priority};
pub use domain::tenant::{ChannelIdentity, TenantChannelCredential, TenantId, TenantProfile};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{ConversationEngine, ConversationState, FlowError};
