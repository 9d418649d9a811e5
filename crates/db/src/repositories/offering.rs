use sqlx::{sqlite::SqliteRow, Row};

use slotline_core::domain::offering::{Offering, OfferingId};
use slotline_core::domain::tenant::TenantId;

use super::rows::{parse_decimal, parse_u32};
use super::{OfferingRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOfferingRepository {
    pool: DbPool,
}

impl SqlOfferingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OfferingRepository for SqlOfferingRepository {
    async fn list_active(&self, tenant_id: &TenantId) -> Result<Vec<Offering>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, price, duration_minutes, active
             FROM offering
             WHERE tenant_id = ? AND active = 1
             ORDER BY name COLLATE NOCASE ASC, id ASC",
        )
        .bind(&tenant_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(offering_from_row).collect()
    }

    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &OfferingId,
    ) -> Result<Option<Offering>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, price, duration_minutes, active
             FROM offering
             WHERE tenant_id = ? AND id = ?",
        )
        .bind(&tenant_id.0)
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(offering_from_row).transpose()
    }

    async fn save(&self, offering: Offering) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO offering (id, tenant_id, name, price, duration_minutes, active)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 price = excluded.price,
                 duration_minutes = excluded.duration_minutes,
                 active = excluded.active",
        )
        .bind(&offering.id.0)
        .bind(&offering.tenant_id.0)
        .bind(&offering.name)
        .bind(offering.price.to_string())
        .bind(i64::from(offering.duration_minutes))
        .bind(offering.active)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from_write)?;

        Ok(())
    }
}

fn offering_from_row(row: SqliteRow) -> Result<Offering, RepositoryError> {
    Ok(Offering {
        id: OfferingId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        name: row.try_get("name")?,
        price: parse_decimal("price", row.try_get("price")?)?,
        duration_minutes: parse_u32("duration_minutes", row.try_get("duration_minutes")?)?,
        active: row.try_get("active")?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use slotline_core::domain::offering::{Offering, OfferingId};
    use slotline_core::domain::tenant::{ActiveFlow, TenantId, TenantProfile};

    use super::SqlOfferingRepository;
    use crate::repositories::{OfferingRepository, SqlTenantRepository, TenantRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        for id in ["tenant-a", "tenant-b"] {
            SqlTenantRepository::new(pool.clone())
                .save_profile(TenantProfile {
                    tenant_id: TenantId(id.to_string()),
                    display_name: id.to_string(),
                    currency: "USD".to_string(),
                    active_flow: ActiveFlow::Catalog,
                })
                .await
                .expect("tenant");
        }
        pool
    }

    fn offering(tenant: &str, id: &str, name: &str, active: bool) -> Offering {
        Offering {
            id: OfferingId(id.to_string()),
            tenant_id: TenantId(tenant.to_string()),
            name: name.to_string(),
            price: Decimal::new(2550, 2),
            duration_minutes: 45,
            active,
        }
    }

    #[tokio::test]
    async fn list_active_is_sorted_filtered_and_scoped() {
        let repo = SqlOfferingRepository::new(setup_pool().await);
        repo.save(offering("tenant-a", "off-2", "Massage", true)).await.expect("save");
        repo.save(offering("tenant-a", "off-1", "haircut", true)).await.expect("save");
        repo.save(offering("tenant-a", "off-3", "Waxing", false)).await.expect("save");
        repo.save(offering("tenant-b", "off-4", "Nails", true)).await.expect("save");

        let listed = repo.list_active(&TenantId("tenant-a".to_string())).await.expect("list");
        let names = listed.iter().map(|item| item.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["haircut", "Massage"]);
        assert_eq!(listed[0].price, Decimal::new(2550, 2));
    }

    #[tokio::test]
    async fn find_by_id_respects_tenant() {
        let repo = SqlOfferingRepository::new(setup_pool().await);
        let saved = offering("tenant-a", "off-1", "Haircut", true);
        repo.save(saved.clone()).await.expect("save");

        let found = repo
            .find_by_id(&TenantId("tenant-a".to_string()), &saved.id)
            .await
            .expect("find");
        assert_eq!(found, Some(saved.clone()));
        assert!(repo
            .find_by_id(&TenantId("tenant-b".to_string()), &saved.id)
            .await
            .expect("find")
            .is_none());
    }
}
