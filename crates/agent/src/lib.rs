//! Conversation runtime - turns inbound messages into persisted state and replies
//!
//! This crate sits between the channel edge and the conversation engine:
//! - Resolves the tenant from the channel identity a message arrived on
//! - Serializes turns per (tenant, customer handle)
//! - Loads or lazily creates the conversation and appends to the message log
//! - Runs one engine transition and hands the reply to delivery
//!
//! # Architecture
//!
//! ```text
//! inbound message
//!   → ConversationRuntime (tenant lookup, per-conversation lock, dedupe)
//!     → ConversationEngine (slotline-core)
//!         → RepositoryCatalog   (offering lookups)
//!         → BookingService      (validation, per-slot lock, lifecycle)
//!     → OutboundSink            (slotline-channel delivery queue)
//! ```
//!
//! # Failure Handling
//!
//! A failed transition never advances the conversation. The runtime keeps the
//! stored state and context, answers with the engine's retry-safe reply, and
//! reports the turn as `TurnReport::Retained`.

pub mod booking;
pub mod catalog;
pub mod locks;
pub mod runtime;

pub use booking::BookingService;
pub use catalog::RepositoryCatalog;
pub use locks::KeyedLocks;
pub use runtime::{ConversationRuntime, RuntimeError, TurnReport};
