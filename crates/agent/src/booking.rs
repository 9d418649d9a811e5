use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use slotline_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use slotline_core::domain::booking::{
    find_conflict, offering_violations, validate_request_fields, Booking, BookingError, BookingId,
    BookingPatch, BookingRequest, PaymentInfo, Violation,
};
use slotline_core::domain::offering::{Offering, OfferingId};
use slotline_core::domain::tenant::TenantId;
use slotline_core::flows::BookingPort;
use slotline_db::repositories::{Repositories, RepositoryError};

use crate::locks::KeyedLocks;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct SlotKey {
    tenant_id: TenantId,
    offering_id: OfferingId,
    date: NaiveDate,
    slot: String,
}

/// Validates and persists bookings. Creation and rescheduling check for a
/// conflicting booking while holding the slot's lock; the storage uniqueness
/// guarantee backs that up across processes.
pub struct BookingService {
    repositories: Repositories,
    slot_locks: KeyedLocks<SlotKey>,
    booking_locks: KeyedLocks<BookingId>,
    audit: Arc<dyn AuditSink>,
}

fn storage(error: RepositoryError) -> BookingError {
    BookingError::Storage(error.to_string())
}

impl BookingService {
    pub fn new(repositories: Repositories, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            repositories,
            slot_locks: KeyedLocks::default(),
            booking_locks: KeyedLocks::default(),
            audit,
        }
    }

    pub async fn create(
        &self,
        tenant_id: &TenantId,
        request: BookingRequest,
    ) -> Result<Booking, BookingError> {
        if let Some(existing) = self.replayed(tenant_id, &request).await? {
            return Ok(existing);
        }

        let (mut violations, date, slot) = validate_request_fields(&request, Utc::now());
        let offering = self.find_offering(tenant_id, &request.offering_id).await?;
        violations.extend(offering_violations(offering.as_ref(), &request.offering_id));
        violations.extend(self.conversation_violations(tenant_id, &request).await?);

        let (Some(date), Some(slot), Some(offering), true) =
            (date, slot, offering, violations.is_empty())
        else {
            self.audit_rejection(tenant_id, &request, "booking.create", "VALIDATION_FAILED");
            return Err(BookingError::ValidationFailed { violations });
        };

        let _slot_guard = self
            .slot_locks
            .lock(SlotKey {
                tenant_id: tenant_id.clone(),
                offering_id: offering.id.clone(),
                date,
                slot: slot.clone(),
            })
            .await;

        // A concurrent create with the same key may have finished while this
        // one waited for the slot.
        if let Some(existing) = self.replayed(tenant_id, &request).await? {
            return Ok(existing);
        }

        let existing = self
            .repositories
            .bookings
            .list_active_for_day(tenant_id, &offering.id, date)
            .await
            .map_err(storage)?;
        if find_conflict(&existing, &offering.id, date, &slot, None).is_some() {
            self.audit_rejection(tenant_id, &request, "booking.create", "BOOKING_CONFLICT");
            return Err(BookingError::Conflict { offering_id: offering.id.0, date, slot });
        }

        let booking = Booking::new_pending(tenant_id.clone(), &request, date, slot, offering.price);
        match self.repositories.bookings.insert(booking.clone()).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(detail)) => {
                if let Some(existing) =
                    self.find_by_key(tenant_id, request.idempotency_key.as_deref()).await?
                {
                    return Ok(existing);
                }
                warn!(
                    event_name = "booking.create.conflict",
                    tenant_id = %tenant_id.0,
                    detail = %detail,
                    "storage rejected booking for a taken slot"
                );
                self.audit_rejection(tenant_id, &request, "booking.create", "BOOKING_CONFLICT");
                return Err(BookingError::Conflict {
                    offering_id: booking.offering_id.0,
                    date: booking.scheduled_date,
                    slot: booking.slot_label,
                });
            }
            Err(error) => return Err(storage(error)),
        }

        self.audit_change(&booking, "booking.created");
        Ok(booking)
    }

    /// Applies a partial change. Moving to another offering, date or slot is
    /// conflict-checked like a new booking, ignoring the booking itself.
    pub async fn update(
        &self,
        tenant_id: &TenantId,
        id: &BookingId,
        patch: BookingPatch,
    ) -> Result<Booking, BookingError> {
        let _booking_guard = self.booking_locks.lock(id.clone()).await;
        let mut booking = self.load(tenant_id, id).await?;
        if !booking.status.holds_slot() {
            return Err(BookingError::Cancelled(id.0.clone()));
        }

        let merged = BookingRequest {
            conversation_id: booking.conversation_id.clone(),
            offering_id: patch.offering_id.clone().unwrap_or_else(|| booking.offering_id.clone()),
            customer_handle: patch
                .customer_handle
                .clone()
                .unwrap_or_else(|| booking.customer_handle.clone()),
            date: patch.date.clone().unwrap_or_else(|| booking.scheduled_date.to_string()),
            slot: patch.slot.clone().unwrap_or_else(|| booking.slot_label.clone()),
            idempotency_key: None,
            metadata: patch.metadata.clone().unwrap_or_else(|| booking.metadata.clone()),
        };

        let (mut violations, date, slot) = validate_request_fields(&merged, Utc::now());
        if patch.date.is_none() {
            violations.retain(|violation| violation.field != "date");
        }
        let date = if patch.date.is_none() { Some(booking.scheduled_date) } else { date };

        let offering = match &patch.offering_id {
            Some(offering_id) => {
                let offering = self.find_offering(tenant_id, offering_id).await?;
                violations.extend(offering_violations(offering.as_ref(), offering_id));
                offering
            }
            None => None,
        };

        let (Some(date), Some(slot), true) = (date, slot, violations.is_empty()) else {
            return Err(BookingError::ValidationFailed { violations });
        };

        let _slot_guard = if patch.reschedules() {
            let key = SlotKey {
                tenant_id: tenant_id.clone(),
                offering_id: merged.offering_id.clone(),
                date,
                slot: slot.clone(),
            };
            let guard = self.slot_locks.lock(key).await;
            let existing = self
                .repositories
                .bookings
                .list_active_for_day(tenant_id, &merged.offering_id, date)
                .await
                .map_err(storage)?;
            if find_conflict(&existing, &merged.offering_id, date, &slot, Some(&booking.id))
                .is_some()
            {
                return Err(BookingError::Conflict {
                    offering_id: merged.offering_id.0,
                    date,
                    slot,
                });
            }
            Some(guard)
        } else {
            None
        };

        booking.offering_id = merged.offering_id;
        booking.customer_handle = merged.customer_handle.trim().to_string();
        booking.scheduled_date = date;
        booking.slot_label = slot;
        booking.metadata = merged.metadata;
        if let Some(offering) = offering {
            booking.amount = offering.price;
        }
        booking.updated_at = Utc::now();

        self.persist(&booking).await?;
        self.audit_change(&booking, "booking.updated");
        Ok(booking)
    }

    pub async fn cancel(
        &self,
        tenant_id: &TenantId,
        id: &BookingId,
        reason: &str,
    ) -> Result<Booking, BookingError> {
        self.change_status(tenant_id, id, "booking.cancelled", |booking| booking.cancel(reason))
            .await
    }

    pub async fn record_payment(
        &self,
        tenant_id: &TenantId,
        id: &BookingId,
        payment: PaymentInfo,
    ) -> Result<Booking, BookingError> {
        self.change_status(tenant_id, id, "booking.paid", |booking| booking.record_payment(&payment))
            .await
    }

    pub async fn confirm(&self, tenant_id: &TenantId, id: &BookingId) -> Result<Booking, BookingError> {
        self.change_status(tenant_id, id, "booking.confirmed", Booking::confirm).await
    }

    pub async fn get(&self, tenant_id: &TenantId, id: &BookingId) -> Result<Booking, BookingError> {
        self.load(tenant_id, id).await
    }

    async fn change_status<F>(
        &self,
        tenant_id: &TenantId,
        id: &BookingId,
        event_type: &'static str,
        apply: F,
    ) -> Result<Booking, BookingError>
    where
        F: FnOnce(&mut Booking) -> Result<(), BookingError> + Send,
    {
        let _booking_guard = self.booking_locks.lock(id.clone()).await;
        let mut booking = self.load(tenant_id, id).await?;
        if let Err(error) = apply(&mut booking) {
            self.audit.emit(
                AuditContext::new(
                    Some(tenant_id.clone()),
                    Some(booking.conversation_id.clone()),
                    booking.id.0.clone(),
                    "booking-service",
                )
                .event(event_type, AuditCategory::Booking, AuditOutcome::Rejected)
                .with_metadata("code", error.code()),
            );
            return Err(error);
        }

        self.persist(&booking).await?;
        self.audit_change(&booking, event_type);
        Ok(booking)
    }

    async fn persist(&self, booking: &Booking) -> Result<(), BookingError> {
        match self.repositories.bookings.update(booking.clone()).await {
            Ok(()) => Ok(()),
            Err(RepositoryError::Conflict(_)) => Err(BookingError::Conflict {
                offering_id: booking.offering_id.0.clone(),
                date: booking.scheduled_date,
                slot: booking.slot_label.clone(),
            }),
            Err(error) => Err(storage(error)),
        }
    }

    async fn load(&self, tenant_id: &TenantId, id: &BookingId) -> Result<Booking, BookingError> {
        self.repositories
            .bookings
            .find_by_id(tenant_id, id)
            .await
            .map_err(storage)?
            .ok_or_else(|| BookingError::NotFound(id.0.clone()))
    }

    async fn replayed(
        &self,
        tenant_id: &TenantId,
        request: &BookingRequest,
    ) -> Result<Option<Booking>, BookingError> {
        let existing = self.find_by_key(tenant_id, request.idempotency_key.as_deref()).await?;
        if let Some(existing) = &existing {
            info!(
                event_name = "booking.create.replayed",
                tenant_id = %tenant_id.0,
                booking_id = %existing.id.0,
                "idempotency key matched an existing booking"
            );
        }
        Ok(existing)
    }

    async fn find_by_key(
        &self,
        tenant_id: &TenantId,
        key: Option<&str>,
    ) -> Result<Option<Booking>, BookingError> {
        match key {
            Some(key) => self
                .repositories
                .bookings
                .find_by_idempotency_key(tenant_id, key)
                .await
                .map_err(storage),
            None => Ok(None),
        }
    }

    async fn find_offering(
        &self,
        tenant_id: &TenantId,
        offering_id: &OfferingId,
    ) -> Result<Option<Offering>, BookingError> {
        if offering_id.0.trim().is_empty() {
            return Ok(None);
        }
        self.repositories.offerings.find_by_id(tenant_id, offering_id).await.map_err(storage)
    }

    async fn conversation_violations(
        &self,
        tenant_id: &TenantId,
        request: &BookingRequest,
    ) -> Result<Vec<Violation>, BookingError> {
        if request.conversation_id.0.trim().is_empty() {
            return Ok(Vec::new());
        }
        let conversation = self
            .repositories
            .conversations
            .find_by_id(tenant_id, &request.conversation_id)
            .await
            .map_err(storage)?;
        Ok(match conversation {
            Some(_) => Vec::new(),
            None => vec![Violation::new(
                "conversation_id",
                "exists",
                format!("conversation `{}` does not exist", request.conversation_id.0),
            )],
        })
    }

    fn audit_change(&self, booking: &Booking, event_type: &'static str) {
        info!(
            event_name = event_type,
            tenant_id = %booking.tenant_id.0,
            conversation_id = %booking.conversation_id.0,
            booking_id = %booking.id.0,
            status = booking.status.as_str(),
            "booking changed"
        );
        self.audit.emit(
            AuditContext::new(
                Some(booking.tenant_id.clone()),
                Some(booking.conversation_id.clone()),
                booking.id.0.clone(),
                "booking-service",
            )
            .event(event_type, AuditCategory::Booking, AuditOutcome::Success)
            .with_metadata("booking_id", booking.id.0.clone())
            .with_metadata("status", booking.status.as_str())
            .with_metadata("slot", format!("{} {}", booking.scheduled_date, booking.slot_label)),
        );
    }

    fn audit_rejection(
        &self,
        tenant_id: &TenantId,
        request: &BookingRequest,
        event_type: &'static str,
        code: &'static str,
    ) {
        self.audit.emit(
            AuditContext::new(
                Some(tenant_id.clone()),
                Some(request.conversation_id.clone()),
                request.idempotency_key.clone().unwrap_or_else(|| request.conversation_id.0.clone()),
                "booking-service",
            )
            .event(event_type, AuditCategory::Booking, AuditOutcome::Rejected)
            .with_metadata("code", code),
        );
    }
}

#[async_trait]
impl BookingPort for BookingService {
    async fn create_booking(
        &self,
        tenant_id: &TenantId,
        request: BookingRequest,
    ) -> Result<Booking, BookingError> {
        self.create(tenant_id, request).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use slotline_core::audit::InMemoryAuditSink;
    use slotline_core::domain::booking::{
        BookingError, BookingPatch, BookingRequest, BookingStatus, PaymentInfo,
    };
    use slotline_core::domain::conversation::{Conversation, ConversationId};
    use slotline_core::domain::offering::{Offering, OfferingId};
    use slotline_core::domain::tenant::{ActiveFlow, TenantId, TenantProfile};
    use slotline_db::repositories::Repositories;
    use slotline_db::{connect_with_settings, migrations};

    use super::BookingService;

    struct Fixture {
        service: Arc<BookingService>,
        audit: InMemoryAuditSink,
        tenant_id: TenantId,
        conversation_id: ConversationId,
    }

    async fn fixture(repositories: Repositories) -> Fixture {
        let tenant_id = TenantId("tenant-a".to_string());
        repositories
            .tenants
            .save_profile(TenantProfile {
                tenant_id: tenant_id.clone(),
                display_name: "Studio A".to_string(),
                currency: "USD".to_string(),
                active_flow: ActiveFlow::Catalog,
            })
            .await
            .expect("tenant");
        for (id, name, active) in [("haircut", "Haircut", true), ("facial", "Facial", false)] {
            repositories
                .offerings
                .save(Offering {
                    id: OfferingId(id.to_string()),
                    tenant_id: tenant_id.clone(),
                    name: name.to_string(),
                    price: Decimal::new(2500, 2),
                    duration_minutes: 30,
                    active,
                })
                .await
                .expect("offering");
        }
        repositories
            .offerings
            .save(Offering {
                id: OfferingId("massage".to_string()),
                tenant_id: tenant_id.clone(),
                name: "Massage".to_string(),
                price: Decimal::new(6000, 2),
                duration_minutes: 60,
                active: true,
            })
            .await
            .expect("offering");
        let conversation = Conversation::start(tenant_id.clone(), "15551234567");
        repositories.conversations.save(conversation.clone()).await.expect("conversation");

        let audit = InMemoryAuditSink::default();
        Fixture {
            service: Arc::new(BookingService::new(repositories, Arc::new(audit.clone()))),
            audit,
            tenant_id,
            conversation_id: conversation.id,
        }
    }

    fn tomorrow() -> String {
        (Utc::now() + Duration::days(1)).date_naive().to_string()
    }

    fn request(fixture: &Fixture, slot: &str) -> BookingRequest {
        BookingRequest {
            conversation_id: fixture.conversation_id.clone(),
            offering_id: OfferingId("haircut".to_string()),
            customer_handle: "15551234567".to_string(),
            date: tomorrow(),
            slot: slot.to_string(),
            idempotency_key: None,
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn create_persists_pending_booking_at_offering_price() {
        let fixture = fixture(Repositories::in_memory()).await;
        let booking =
            fixture.service.create(&fixture.tenant_id, request(&fixture, "10:00")).await.expect("create");

        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.amount, Decimal::new(2500, 2));
        assert_eq!(fixture.audit.event_types(), vec!["booking.created"]);
        let stored = fixture.service.get(&fixture.tenant_id, &booking.id).await.expect("stored");
        assert_eq!(stored, booking);
    }

    #[tokio::test]
    async fn validation_reports_every_violation_together() {
        let fixture = fixture(Repositories::in_memory()).await;
        let bad = BookingRequest {
            conversation_id: ConversationId("missing".to_string()),
            offering_id: OfferingId("facial".to_string()),
            customer_handle: "call me".to_string(),
            date: "2020-01-01".to_string(),
            slot: "25:00".to_string(),
            ..request(&fixture, "10:00")
        };

        let error = fixture.service.create(&fixture.tenant_id, bad).await.expect_err("invalid");
        let BookingError::ValidationFailed { violations } = error else {
            panic!("expected validation failure");
        };
        let mut fields = violations.iter().map(|v| v.field.as_str()).collect::<Vec<_>>();
        fields.sort_unstable();
        assert_eq!(fields, vec!["conversation_id", "customer_handle", "date", "offering_id", "time"]);
    }

    #[tokio::test]
    async fn second_booking_for_same_slot_conflicts_and_cancel_frees_it() {
        let fixture = fixture(Repositories::in_memory()).await;
        let first =
            fixture.service.create(&fixture.tenant_id, request(&fixture, "10:00")).await.expect("first");

        let error = fixture
            .service
            .create(&fixture.tenant_id, request(&fixture, "10:00"))
            .await
            .expect_err("conflict");
        assert_eq!(error.code(), "BOOKING_CONFLICT");

        fixture.service.cancel(&fixture.tenant_id, &first.id, "changed plans").await.expect("cancel");
        fixture
            .service
            .create(&fixture.tenant_id, request(&fixture, "10:00"))
            .await
            .expect("slot free again");
    }

    async fn race_for_one_slot(repositories: Repositories) {
        let fixture = fixture(repositories).await;
        let mut handles = Vec::new();
        for _ in 0..2 {
            let service = Arc::clone(&fixture.service);
            let tenant_id = fixture.tenant_id.clone();
            let request = request(&fixture, "11:30");
            handles.push(tokio::spawn(async move { service.create(&tenant_id, request).await }));
        }

        let mut successes = Vec::new();
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.expect("join") {
                Ok(booking) => successes.push(booking),
                Err(error) => {
                    assert_eq!(error.code(), "BOOKING_CONFLICT");
                    conflicts += 1;
                }
            }
        }
        assert_eq!(successes.len(), 1);
        assert_eq!(successes[0].status, BookingStatus::Pending);
        assert_eq!(conflicts, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_for_one_slot_in_memory() {
        race_for_one_slot(Repositories::in_memory()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_for_one_slot_in_sqlite() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        race_for_one_slot(Repositories::sql(pool)).await;
    }

    #[tokio::test]
    async fn idempotency_key_returns_existing_booking() {
        let fixture = fixture(Repositories::in_memory()).await;
        let keyed = BookingRequest {
            idempotency_key: Some(format!("{}:0", fixture.conversation_id.0)),
            ..request(&fixture, "12:00")
        };

        let first = fixture.service.create(&fixture.tenant_id, keyed.clone()).await.expect("first");
        let replay = fixture.service.create(&fixture.tenant_id, keyed).await.expect("replay");
        assert_eq!(first.id, replay.id);
        assert_eq!(fixture.audit.event_types(), vec!["booking.created"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_with_one_key_share_the_booking() {
        let fixture = fixture(Repositories::in_memory()).await;
        let keyed = BookingRequest {
            idempotency_key: Some(format!("{}:0", fixture.conversation_id.0)),
            ..request(&fixture, "13:00")
        };

        let mut handles = Vec::new();
        for _ in 0..4 {
            let service = Arc::clone(&fixture.service);
            let tenant_id = fixture.tenant_id.clone();
            let request = keyed.clone();
            handles.push(tokio::spawn(async move { service.create(&tenant_id, request).await }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.expect("join").expect("same key never conflicts").id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(fixture.audit.event_types(), vec!["booking.created"]);
    }

    #[tokio::test]
    async fn lifecycle_and_illegal_transitions() {
        let fixture = fixture(Repositories::in_memory()).await;
        let tenant = &fixture.tenant_id;
        let booking = fixture.service.create(tenant, request(&fixture, "09:00")).await.expect("create");

        let early = fixture.service.confirm(tenant, &booking.id).await.expect_err("not paid yet");
        assert_eq!(early.code(), "INVALID_STATUS_TRANSITION");

        let payment = PaymentInfo { reference: "pay_123".to_string(), amount: Some(Decimal::new(25, 0)) };
        let paid = fixture.service.record_payment(tenant, &booking.id, payment.clone()).await.expect("pay");
        assert_eq!(paid.status, BookingStatus::Paid);
        let twice = fixture.service.record_payment(tenant, &booking.id, payment).await.expect_err("paid");
        assert_eq!(twice.code(), "BOOKING_ALREADY_PAID");

        let confirmed = fixture.service.confirm(tenant, &booking.id).await.expect("confirm");
        assert_eq!(confirmed.status, BookingStatus::Confirmed);

        fixture.service.cancel(tenant, &booking.id, "").await.expect("cancel");
        let again = fixture.service.cancel(tenant, &booking.id, "").await.expect_err("cancelled");
        assert_eq!(again.code(), "BOOKING_ALREADY_CANCELLED");
        let confirm_cancelled = fixture.service.confirm(tenant, &booking.id).await.expect_err("cancelled");
        assert_eq!(confirm_cancelled.code(), "BOOKING_CANCELLED");

        let missing = fixture
            .service
            .confirm(tenant, &slotline_core::domain::booking::BookingId("nope".to_string()))
            .await
            .expect_err("missing");
        assert_eq!(missing.code(), "BOOKING_NOT_FOUND");
    }

    #[tokio::test]
    async fn reschedule_checks_conflicts_but_ignores_itself() {
        let fixture = fixture(Repositories::in_memory()).await;
        let tenant = &fixture.tenant_id;
        let morning = fixture.service.create(tenant, request(&fixture, "09:00")).await.expect("morning");
        fixture.service.create(tenant, request(&fixture, "10:00")).await.expect("ten");

        let same_slot = fixture
            .service
            .update(
                tenant,
                &morning.id,
                BookingPatch { slot: Some("09:00".to_string()), ..BookingPatch::default() },
            )
            .await
            .expect("rescheduling onto itself is fine");
        assert_eq!(same_slot.slot_label, "09:00");

        let taken = fixture
            .service
            .update(
                tenant,
                &morning.id,
                BookingPatch { slot: Some("10:00".to_string()), ..BookingPatch::default() },
            )
            .await
            .expect_err("taken");
        assert_eq!(taken.code(), "BOOKING_CONFLICT");

        let moved = fixture
            .service
            .update(
                tenant,
                &morning.id,
                BookingPatch {
                    offering_id: Some(OfferingId("massage".to_string())),
                    slot: Some("10:00".to_string()),
                    ..BookingPatch::default()
                },
            )
            .await
            .expect("other offering at ten is free");
        assert_eq!(moved.amount, Decimal::new(6000, 2));

        let invalid = fixture
            .service
            .update(
                tenant,
                &morning.id,
                BookingPatch { date: Some("2020-01-01".to_string()), ..BookingPatch::default() },
            )
            .await
            .expect_err("past date");
        assert_eq!(invalid.code(), "VALIDATION_FAILED");
    }
}
