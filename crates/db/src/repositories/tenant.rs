use chrono::Utc;
use secrecy::ExposeSecret;
use sqlx::{sqlite::SqliteRow, Row};

use slotline_core::domain::tenant::{
    ActiveFlow, ChannelIdentity, RateLimitPolicy, TenantChannelCredential, TenantId,
    TenantProfile,
};

use super::rows::parse_u32;
use super::{RepositoryError, TenantRepository};
use crate::DbPool;

pub struct SqlTenantRepository {
    pool: DbPool,
}

impl SqlTenantRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TenantRepository for SqlTenantRepository {
    async fn find_by_channel_identity(
        &self,
        identity: &ChannelIdentity,
    ) -> Result<Option<TenantProfile>, RepositoryError> {
        let row = sqlx::query(
            "SELECT t.id, t.display_name, t.currency, t.active_flow
             FROM tenant t
             JOIN tenant_channel_credential c ON c.tenant_id = t.id
             WHERE c.channel_identity = ?",
        )
        .bind(&identity.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(profile_from_row).transpose()
    }

    async fn find_profile(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<TenantProfile>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, display_name, currency, active_flow FROM tenant WHERE id = ?",
        )
        .bind(&tenant_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(profile_from_row).transpose()
    }

    async fn find_credential(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<TenantChannelCredential>, RepositoryError> {
        let row = sqlx::query(
            "SELECT tenant_id, channel_identity, secret, per_second, per_minute, per_hour
             FROM tenant_channel_credential
             WHERE tenant_id = ?",
        )
        .bind(&tenant_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(credential_from_row).transpose()
    }

    async fn list_profiles(&self) -> Result<Vec<TenantProfile>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, display_name, currency, active_flow FROM tenant ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(profile_from_row).collect()
    }

    async fn save_profile(&self, profile: TenantProfile) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO tenant (id, display_name, currency, active_flow, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 currency = excluded.currency,
                 active_flow = excluded.active_flow,
                 updated_at = excluded.updated_at",
        )
        .bind(&profile.tenant_id.0)
        .bind(&profile.display_name)
        .bind(&profile.currency)
        .bind(profile.active_flow.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from_write)?;

        Ok(())
    }

    async fn save_credential(
        &self,
        credential: TenantChannelCredential,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO tenant_channel_credential
                 (tenant_id, channel_identity, secret, per_second, per_minute, per_hour, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id) DO UPDATE SET
                 channel_identity = excluded.channel_identity,
                 secret = excluded.secret,
                 per_second = excluded.per_second,
                 per_minute = excluded.per_minute,
                 per_hour = excluded.per_hour,
                 updated_at = excluded.updated_at",
        )
        .bind(&credential.tenant_id.0)
        .bind(&credential.channel_identity.0)
        .bind(credential.secret.expose_secret())
        .bind(i64::from(credential.rate_limit.per_second))
        .bind(i64::from(credential.rate_limit.per_minute))
        .bind(i64::from(credential.rate_limit.per_hour))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from_write)?;

        Ok(())
    }
}

fn profile_from_row(row: SqliteRow) -> Result<TenantProfile, RepositoryError> {
    let flow_raw = row.try_get::<String, _>("active_flow")?;
    let active_flow = ActiveFlow::parse(&flow_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown active_flow `{flow_raw}`")))?;

    Ok(TenantProfile {
        tenant_id: TenantId(row.try_get("id")?),
        display_name: row.try_get("display_name")?,
        currency: row.try_get("currency")?,
        active_flow,
    })
}

fn credential_from_row(row: SqliteRow) -> Result<TenantChannelCredential, RepositoryError> {
    Ok(TenantChannelCredential {
        tenant_id: TenantId(row.try_get("tenant_id")?),
        channel_identity: ChannelIdentity(row.try_get("channel_identity")?),
        secret: row.try_get::<String, _>("secret")?.into(),
        rate_limit: RateLimitPolicy::new(
            parse_u32("per_second", row.try_get("per_second")?)?,
            parse_u32("per_minute", row.try_get("per_minute")?)?,
            parse_u32("per_hour", row.try_get("per_hour")?)?,
        ),
    })
}
