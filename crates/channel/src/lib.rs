//! Messaging channel interface for slotline.
//!
//! - **Inbound** (`inbound`) - canonical inbound message checks before the runtime sees them
//! - **Rendering** (`render`) - outbound requests to channel send payloads (text, buttons, list, template)
//! - **Transport** (`transport`) - HTTP sender plus log and recording senders
//! - **Credentials** (`credentials`) - tenant channel credentials behind a short TTL cache
//! - **Delivery** (`delivery`) - per-tenant, rate-limited, priority-ordered delivery queue
//!
//! # Architecture
//!
//! ```text
//! Runtime reply → DeliveryQueue::submit → admission (rate windows + priority)
//!                        ↓ queued                ↓ immediate
//!                 per-tenant drain task  →  ChannelTransport::send
//! ```

pub mod credentials;
pub mod delivery;
pub mod inbound;
pub mod render;
pub mod transport;

pub use credentials::{CachedCredentialResolver, CredentialError, CredentialSource};
pub use delivery::{DeliveryQueue, DeliverySettings};
pub use transport::{ChannelTransport, HttpTransport, LogTransport, RecordingTransport, TransportError};
