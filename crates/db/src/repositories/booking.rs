use chrono::NaiveDate;
use sqlx::{sqlite::SqliteRow, Row};

use slotline_core::domain::booking::{Booking, BookingId, BookingStatus};
use slotline_core::domain::conversation::ConversationId;
use slotline_core::domain::offering::OfferingId;
use slotline_core::domain::tenant::TenantId;

use super::rows::{encode_json, parse_date, parse_decimal, parse_metadata, parse_timestamp};
use super::{BookingRepository, RepositoryError};
use crate::DbPool;

pub struct SqlBookingRepository {
    pool: DbPool,
}

impl SqlBookingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_BOOKING: &str = "SELECT id, tenant_id, conversation_id, offering_id, customer_handle,
            scheduled_date, slot_label, amount, status, payment_ref, cancellation_reason,
            idempotency_key, metadata_json, created_at, updated_at
     FROM booking";

#[async_trait::async_trait]
impl BookingRepository for SqlBookingRepository {
    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &BookingId,
    ) -> Result<Option<Booking>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_BOOKING} WHERE tenant_id = ? AND id = ?"))
            .bind(&tenant_id.0)
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(booking_from_row).transpose()
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &TenantId,
        key: &str,
    ) -> Result<Option<Booking>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_BOOKING} WHERE tenant_id = ? AND idempotency_key = ?"
        ))
        .bind(&tenant_id.0)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(booking_from_row).transpose()
    }

    async fn list_active_for_day(
        &self,
        tenant_id: &TenantId,
        offering_id: &OfferingId,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_BOOKING}
             WHERE tenant_id = ? AND offering_id = ? AND scheduled_date = ? AND status <> 'cancelled'
             ORDER BY slot_label ASC"
        ))
        .bind(&tenant_id.0)
        .bind(&offering_id.0)
        .bind(date.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(booking_from_row).collect()
    }

    async fn insert(&self, booking: Booking) -> Result<(), RepositoryError> {
        let metadata_json = encode_json("metadata_json", &booking.metadata)?;

        sqlx::query(
            "INSERT INTO booking
                 (id, tenant_id, conversation_id, offering_id, customer_handle, scheduled_date,
                  slot_label, amount, status, payment_ref, cancellation_reason, idempotency_key,
                  metadata_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&booking.id.0)
        .bind(&booking.tenant_id.0)
        .bind(&booking.conversation_id.0)
        .bind(&booking.offering_id.0)
        .bind(&booking.customer_handle)
        .bind(booking.scheduled_date.to_string())
        .bind(&booking.slot_label)
        .bind(booking.amount.to_string())
        .bind(booking.status.as_str())
        .bind(&booking.payment_ref)
        .bind(&booking.cancellation_reason)
        .bind(&booking.idempotency_key)
        .bind(metadata_json)
        .bind(booking.created_at.to_rfc3339())
        .bind(booking.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from_write)?;

        Ok(())
    }

    async fn update(&self, booking: Booking) -> Result<(), RepositoryError> {
        let metadata_json = encode_json("metadata_json", &booking.metadata)?;

        let result = sqlx::query(
            "UPDATE booking SET
                 offering_id = ?,
                 customer_handle = ?,
                 scheduled_date = ?,
                 slot_label = ?,
                 amount = ?,
                 status = ?,
                 payment_ref = ?,
                 cancellation_reason = ?,
                 metadata_json = ?,
                 updated_at = ?
             WHERE tenant_id = ? AND id = ?",
        )
        .bind(&booking.offering_id.0)
        .bind(&booking.customer_handle)
        .bind(booking.scheduled_date.to_string())
        .bind(&booking.slot_label)
        .bind(booking.amount.to_string())
        .bind(booking.status.as_str())
        .bind(&booking.payment_ref)
        .bind(&booking.cancellation_reason)
        .bind(metadata_json)
        .bind(booking.updated_at.to_rfc3339())
        .bind(&booking.tenant_id.0)
        .bind(&booking.id.0)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from_write)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Decode(format!(
                "booking `{}` does not exist for tenant `{}`",
                booking.id.0, booking.tenant_id.0
            )));
        }

        Ok(())
    }
}

fn booking_from_row(row: SqliteRow) -> Result<Booking, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = BookingStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown booking status `{status_raw}`")))?;
    let metadata_raw = row.try_get::<String, _>("metadata_json")?;

    Ok(Booking {
        id: BookingId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        offering_id: OfferingId(row.try_get("offering_id")?),
        customer_handle: row.try_get("customer_handle")?,
        scheduled_date: parse_date("scheduled_date", row.try_get("scheduled_date")?)?,
        slot_label: row.try_get("slot_label")?,
        amount: parse_decimal("amount", row.try_get("amount")?)?,
        status,
        payment_ref: row.try_get("payment_ref")?,
        cancellation_reason: row.try_get("cancellation_reason")?,
        idempotency_key: row.try_get("idempotency_key")?,
        metadata: parse_metadata(&metadata_raw)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use slotline_core::domain::booking::{Booking, BookingRequest, BookingStatus};
    use slotline_core::domain::conversation::{Conversation, ConversationId};
    use slotline_core::domain::offering::{Offering, OfferingId};
    use slotline_core::domain::tenant::{ActiveFlow, TenantId, TenantProfile};

    use super::SqlBookingRepository;
    use crate::repositories::{
        BookingRepository, ConversationRepository, OfferingRepository, RepositoryError,
        SqlConversationRepository, SqlOfferingRepository, SqlTenantRepository, TenantRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    struct Fixture {
        pool: DbPool,
        tenant_id: TenantId,
        conversation_id: ConversationId,
        offering_id: OfferingId,
    }

    async fn setup() -> Fixture {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let tenant_id = TenantId("tenant-a".to_string());
        SqlTenantRepository::new(pool.clone())
            .save_profile(TenantProfile {
                tenant_id: tenant_id.clone(),
                display_name: "Studio A".to_string(),
                currency: "USD".to_string(),
                active_flow: ActiveFlow::Catalog,
            })
            .await
            .expect("tenant");
        let offering = Offering {
            id: OfferingId("off-1".to_string()),
            tenant_id: tenant_id.clone(),
            name: "Haircut".to_string(),
            price: Decimal::new(25, 0),
            duration_minutes: 30,
            active: true,
        };
        SqlOfferingRepository::new(pool.clone()).save(offering.clone()).await.expect("offering");
        let conversation = Conversation::start(tenant_id.clone(), "15550001111");
        SqlConversationRepository::new(pool.clone())
            .save(conversation.clone())
            .await
            .expect("conversation");

        Fixture { pool, tenant_id, conversation_id: conversation.id, offering_id: offering.id }
    }

    fn booking(fixture: &Fixture, slot: &str, key: Option<&str>) -> Booking {
        let request = BookingRequest {
            conversation_id: fixture.conversation_id.clone(),
            offering_id: fixture.offering_id.clone(),
            customer_handle: "15550001111".to_string(),
            date: "2030-01-02".to_string(),
            slot: slot.to_string(),
            idempotency_key: key.map(str::to_string),
            metadata: BTreeMap::from([("source".to_string(), "test".to_string())]),
        };
        Booking::new_pending(
            fixture.tenant_id.clone(),
            &request,
            NaiveDate::from_ymd_opt(2030, 1, 2).expect("date"),
            slot.to_string(),
            Decimal::new(25, 0),
        )
    }

    #[tokio::test]
    async fn insert_and_find_round_trip() {
        let fixture = setup().await;
        let repo = SqlBookingRepository::new(fixture.pool.clone());
        let created = booking(&fixture, "10:00", Some("conv:0"));

        repo.insert(created.clone()).await.expect("insert");
        let found = repo.find_by_id(&fixture.tenant_id, &created.id).await.expect("find");
        assert_eq!(found, Some(created.clone()));

        let by_key = repo
            .find_by_idempotency_key(&fixture.tenant_id, "conv:0")
            .await
            .expect("find by key");
        assert_eq!(by_key.map(|item| item.id), Some(created.id));
    }

    #[tokio::test]
    async fn unique_index_rejects_second_active_booking_for_slot() {
        let fixture = setup().await;
        let repo = SqlBookingRepository::new(fixture.pool.clone());
        repo.insert(booking(&fixture, "10:00", None)).await.expect("first");

        let error = repo.insert(booking(&fixture, "10:00", None)).await.expect_err("second");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn cancelled_booking_frees_the_slot() {
        let fixture = setup().await;
        let repo = SqlBookingRepository::new(fixture.pool.clone());
        let mut first = booking(&fixture, "10:00", None);
        repo.insert(first.clone()).await.expect("first");

        first.cancel("customer asked").expect("cancel");
        repo.update(first.clone()).await.expect("persist cancel");
        repo.insert(booking(&fixture, "10:00", None)).await.expect("slot is free again");

        let date = NaiveDate::from_ymd_opt(2030, 1, 2).expect("date");
        let active = repo
            .list_active_for_day(&fixture.tenant_id, &fixture.offering_id, date)
            .await
            .expect("list");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, BookingStatus::Pending);

        let stored = repo.find_by_id(&fixture.tenant_id, &first.id).await.expect("find");
        assert_eq!(
            stored.and_then(|item| item.cancellation_reason),
            Some("customer asked".to_string())
        );
    }

    #[tokio::test]
    async fn update_of_unknown_booking_is_an_error() {
        let fixture = setup().await;
        let repo = SqlBookingRepository::new(fixture.pool.clone());
        let error = repo.update(booking(&fixture, "11:00", None)).await.expect_err("missing row");
        assert!(matches!(error, RepositoryError::Decode(_)));
    }
}
