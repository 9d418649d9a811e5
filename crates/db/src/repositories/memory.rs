use std::collections::HashMap;

use chrono::NaiveDate;
use tokio::sync::RwLock;

use slotline_core::domain::booking::{find_conflict, Booking, BookingId};
use slotline_core::domain::conversation::{Conversation, ConversationId};
use slotline_core::domain::message::Message;
use slotline_core::domain::offering::{Offering, OfferingId};
use slotline_core::domain::tenant::{
    ChannelIdentity, TenantChannelCredential, TenantId, TenantProfile,
};

use super::{
    BookingRepository, ConversationRepository, MessageRepository, OfferingRepository,
    RepositoryError, TenantRepository,
};

#[derive(Default)]
pub struct InMemoryTenantRepository {
    profiles: RwLock<HashMap<String, TenantProfile>>,
    credentials: RwLock<HashMap<String, TenantChannelCredential>>,
}

#[async_trait::async_trait]
impl TenantRepository for InMemoryTenantRepository {
    async fn find_by_channel_identity(
        &self,
        identity: &ChannelIdentity,
    ) -> Result<Option<TenantProfile>, RepositoryError> {
        let tenant_id = {
            let credentials = self.credentials.read().await;
            credentials
                .values()
                .find(|credential| &credential.channel_identity == identity)
                .map(|credential| credential.tenant_id.0.clone())
        };

        match tenant_id {
            Some(tenant_id) => Ok(self.profiles.read().await.get(&tenant_id).cloned()),
            None => Ok(None),
        }
    }

    async fn find_profile(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<TenantProfile>, RepositoryError> {
        Ok(self.profiles.read().await.get(&tenant_id.0).cloned())
    }

    async fn find_credential(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<TenantChannelCredential>, RepositoryError> {
        Ok(self.credentials.read().await.get(&tenant_id.0).cloned())
    }

    async fn list_profiles(&self) -> Result<Vec<TenantProfile>, RepositoryError> {
        let mut profiles = self.profiles.read().await.values().cloned().collect::<Vec<_>>();
        profiles.sort_by(|left, right| left.tenant_id.cmp(&right.tenant_id));
        Ok(profiles)
    }

    async fn save_profile(&self, profile: TenantProfile) -> Result<(), RepositoryError> {
        let mut profiles = self.profiles.write().await;
        profiles.insert(profile.tenant_id.0.clone(), profile);
        Ok(())
    }

    async fn save_credential(
        &self,
        credential: TenantChannelCredential,
    ) -> Result<(), RepositoryError> {
        if !self.profiles.read().await.contains_key(&credential.tenant_id.0) {
            return Err(RepositoryError::Decode(format!(
                "tenant `{}` does not exist",
                credential.tenant_id.0
            )));
        }

        let mut credentials = self.credentials.write().await;
        let taken = credentials.values().any(|existing| {
            existing.channel_identity == credential.channel_identity
                && existing.tenant_id != credential.tenant_id
        });
        if taken {
            return Err(RepositoryError::Conflict(format!(
                "channel identity `{}` already belongs to another tenant",
                credential.channel_identity.0
            )));
        }

        credentials.insert(credential.tenant_id.0.clone(), credential);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<String, Conversation>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_by_handle(
        &self,
        tenant_id: &TenantId,
        customer_handle: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .values()
            .find(|conversation| {
                &conversation.tenant_id == tenant_id
                    && conversation.customer_handle == customer_handle
            })
            .cloned())
    }

    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(&id.0)
            .filter(|conversation| &conversation.tenant_id == tenant_id)
            .cloned())
    }

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let duplicate = conversations.values().any(|existing| {
            existing.tenant_id == conversation.tenant_id
                && existing.customer_handle == conversation.customer_handle
                && existing.id != conversation.id
        });
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "tenant `{}` already has a conversation with `{}`",
                conversation.tenant_id.0, conversation.customer_handle
            )));
        }

        conversations.insert(conversation.id.0.clone(), conversation);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<Vec<Message>>,
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(&self, message: Message) -> Result<(), RepositoryError> {
        let mut messages = self.messages.write().await;
        if let Some(external_id) = &message.external_id {
            let seen = messages.iter().any(|existing| {
                existing.tenant_id == message.tenant_id
                    && existing.external_id.as_ref() == Some(external_id)
            });
            if seen {
                return Err(RepositoryError::Conflict(format!(
                    "message `{external_id}` was already recorded"
                )));
            }
        }

        messages.push(message);
        Ok(())
    }

    async fn list_for_conversation(
        &self,
        tenant_id: &TenantId,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|message| {
                &message.tenant_id == tenant_id && &message.conversation_id == conversation_id
            })
            .cloned()
            .collect())
    }

    async fn exists_external(
        &self,
        tenant_id: &TenantId,
        external_id: &str,
    ) -> Result<bool, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages.iter().any(|message| {
            &message.tenant_id == tenant_id && message.external_id.as_deref() == Some(external_id)
        }))
    }
}

#[derive(Default)]
pub struct InMemoryOfferingRepository {
    offerings: RwLock<HashMap<String, Offering>>,
}

#[async_trait::async_trait]
impl OfferingRepository for InMemoryOfferingRepository {
    async fn list_active(&self, tenant_id: &TenantId) -> Result<Vec<Offering>, RepositoryError> {
        let offerings = self.offerings.read().await;
        let mut active = offerings
            .values()
            .filter(|offering| &offering.tenant_id == tenant_id && offering.active)
            .cloned()
            .collect::<Vec<_>>();
        active.sort_by(|left, right| {
            left.name
                .to_lowercase()
                .cmp(&right.name.to_lowercase())
                .then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(active)
    }

    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &OfferingId,
    ) -> Result<Option<Offering>, RepositoryError> {
        let offerings = self.offerings.read().await;
        Ok(offerings.get(&id.0).filter(|offering| &offering.tenant_id == tenant_id).cloned())
    }

    async fn save(&self, offering: Offering) -> Result<(), RepositoryError> {
        let mut offerings = self.offerings.write().await;
        offerings.insert(offering.id.0.clone(), offering);
        Ok(())
    }
}

/// Slot and idempotency-key uniqueness are checked under the write lock, the
/// same guarantees the SQL backend gets from its partial unique indexes.
#[derive(Default)]
pub struct InMemoryBookingRepository {
    bookings: RwLock<HashMap<String, Booking>>,
}

fn tenant_bookings<'a>(
    bookings: &'a HashMap<String, Booking>,
    tenant_id: &'a TenantId,
) -> impl Iterator<Item = &'a Booking> + 'a {
    bookings.values().filter(move |booking| &booking.tenant_id == tenant_id)
}

fn check_slot(
    bookings: &HashMap<String, Booking>,
    booking: &Booking,
) -> Result<(), RepositoryError> {
    if !booking.status.holds_slot() {
        return Ok(());
    }
    let same_tenant = tenant_bookings(bookings, &booking.tenant_id).cloned().collect::<Vec<_>>();
    match find_conflict(
        &same_tenant,
        &booking.offering_id,
        booking.scheduled_date,
        &booking.slot_label,
        Some(&booking.id),
    ) {
        Some(holder) => Err(RepositoryError::Conflict(format!(
            "slot {} on {} is held by booking `{}`",
            booking.slot_label, booking.scheduled_date, holder.id.0
        ))),
        None => Ok(()),
    }
}

#[async_trait::async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &BookingId,
    ) -> Result<Option<Booking>, RepositoryError> {
        let bookings = self.bookings.read().await;
        Ok(bookings.get(&id.0).filter(|booking| &booking.tenant_id == tenant_id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &TenantId,
        key: &str,
    ) -> Result<Option<Booking>, RepositoryError> {
        let bookings = self.bookings.read().await;
        let found = tenant_bookings(&bookings, tenant_id)
            .find(|booking| booking.idempotency_key.as_deref() == Some(key))
            .cloned();
        Ok(found)
    }

    async fn list_active_for_day(
        &self,
        tenant_id: &TenantId,
        offering_id: &OfferingId,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let bookings = self.bookings.read().await;
        let mut active = tenant_bookings(&bookings, tenant_id)
            .filter(|booking| {
                booking.status.holds_slot()
                    && &booking.offering_id == offering_id
                    && booking.scheduled_date == date
            })
            .cloned()
            .collect::<Vec<_>>();
        active.sort_by(|left, right| left.slot_label.cmp(&right.slot_label));
        Ok(active)
    }

    async fn insert(&self, booking: Booking) -> Result<(), RepositoryError> {
        let mut bookings = self.bookings.write().await;
        if bookings.contains_key(&booking.id.0) {
            return Err(RepositoryError::Conflict(format!(
                "booking `{}` already exists",
                booking.id.0
            )));
        }
        if let Some(key) = &booking.idempotency_key {
            let taken = tenant_bookings(&bookings, &booking.tenant_id)
                .any(|existing| existing.idempotency_key.as_ref() == Some(key));
            if taken {
                return Err(RepositoryError::Conflict(format!(
                    "idempotency key `{key}` already used"
                )));
            }
        }
        check_slot(&bookings, &booking)?;

        bookings.insert(booking.id.0.clone(), booking);
        Ok(())
    }

    async fn update(&self, booking: Booking) -> Result<(), RepositoryError> {
        let mut bookings = self.bookings.write().await;
        let known = bookings
            .get(&booking.id.0)
            .is_some_and(|existing| existing.tenant_id == booking.tenant_id);
        if !known {
            return Err(RepositoryError::Decode(format!(
                "booking `{}` does not exist for tenant `{}`",
                booking.id.0, booking.tenant_id.0
            )));
        }
        check_slot(&bookings, &booking)?;

        bookings.insert(booking.id.0.clone(), booking);
        Ok(())
    }
}
