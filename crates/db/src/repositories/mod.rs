use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use slotline_core::domain::booking::{Booking, BookingId};
use slotline_core::domain::conversation::{Conversation, ConversationId};
use slotline_core::domain::message::Message;
use slotline_core::domain::offering::{Offering, OfferingId};
use slotline_core::domain::tenant::{
    ChannelIdentity, TenantChannelCredential, TenantId, TenantProfile,
};

pub mod booking;
pub mod conversation;
pub mod memory;
pub mod message;
pub mod offering;
mod rows;
pub mod tenant;

pub use booking::SqlBookingRepository;
pub use conversation::SqlConversationRepository;
pub use memory::{
    InMemoryBookingRepository, InMemoryConversationRepository, InMemoryMessageRepository,
    InMemoryOfferingRepository, InMemoryTenantRepository,
};
pub use message::SqlMessageRepository;
pub use offering::SqlOfferingRepository;
pub use tenant::SqlTenantRepository;

use crate::DbPool;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("uniqueness conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Maps unique-index violations to `Conflict` so callers can tell a lost
    /// race from an outage.
    pub(crate) fn from_write(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(database) if database.is_unique_violation() => {
                Self::Conflict(database.message().to_string())
            }
            _ => Self::Database(error),
        }
    }
}

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn find_by_channel_identity(
        &self,
        identity: &ChannelIdentity,
    ) -> Result<Option<TenantProfile>, RepositoryError>;

    async fn find_profile(&self, tenant_id: &TenantId)
        -> Result<Option<TenantProfile>, RepositoryError>;

    async fn find_credential(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<TenantChannelCredential>, RepositoryError>;

    async fn list_profiles(&self) -> Result<Vec<TenantProfile>, RepositoryError>;

    async fn save_profile(&self, profile: TenantProfile) -> Result<(), RepositoryError>;

    async fn save_credential(
        &self,
        credential: TenantChannelCredential,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_handle(
        &self,
        tenant_id: &TenantId,
        customer_handle: &str,
    ) -> Result<Option<Conversation>, RepositoryError>;

    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError>;

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError>;
}

/// Append-only message log.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: Message) -> Result<(), RepositoryError>;

    async fn list_for_conversation(
        &self,
        tenant_id: &TenantId,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn exists_external(
        &self,
        tenant_id: &TenantId,
        external_id: &str,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait OfferingRepository: Send + Sync {
    /// Active offerings ordered by name, the order customers see them listed.
    async fn list_active(&self, tenant_id: &TenantId) -> Result<Vec<Offering>, RepositoryError>;

    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &OfferingId,
    ) -> Result<Option<Offering>, RepositoryError>;

    async fn save(&self, offering: Offering) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &BookingId,
    ) -> Result<Option<Booking>, RepositoryError>;

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &TenantId,
        key: &str,
    ) -> Result<Option<Booking>, RepositoryError>;

    /// Non-cancelled bookings for one offering on one calendar day.
    async fn list_active_for_day(
        &self,
        tenant_id: &TenantId,
        offering_id: &OfferingId,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, RepositoryError>;

    /// Fails with `Conflict` when another non-cancelled booking holds the
    /// slot or the idempotency key is taken.
    async fn insert(&self, booking: Booking) -> Result<(), RepositoryError>;

    async fn update(&self, booking: Booking) -> Result<(), RepositoryError>;
}

/// One storage backend, chosen once at startup.
#[derive(Clone)]
pub struct Repositories {
    pub tenants: Arc<dyn TenantRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub offerings: Arc<dyn OfferingRepository>,
    pub bookings: Arc<dyn BookingRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            tenants: Arc::new(InMemoryTenantRepository::default()),
            conversations: Arc::new(InMemoryConversationRepository::default()),
            messages: Arc::new(InMemoryMessageRepository::default()),
            offerings: Arc::new(InMemoryOfferingRepository::default()),
            bookings: Arc::new(InMemoryBookingRepository::default()),
        }
    }

    pub fn sql(pool: DbPool) -> Self {
        Self {
            tenants: Arc::new(SqlTenantRepository::new(pool.clone())),
            conversations: Arc::new(SqlConversationRepository::new(pool.clone())),
            messages: Arc::new(SqlMessageRepository::new(pool.clone())),
            offerings: Arc::new(SqlOfferingRepository::new(pool.clone())),
            bookings: Arc::new(SqlBookingRepository::new(pool)),
        }
    }
}
