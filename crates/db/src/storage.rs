use thiserror::Error;
use tracing::info;

use slotline_core::config::{DatabaseConfig, StorageBackend};

use crate::repositories::Repositories;
use crate::{connect_with_settings, migrations, DbPool};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to database `{url}`: {source}")]
    Connect { url: String, source: sqlx::Error },
    #[error("failed to apply migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Repositories for the configured backend. `pool` is `None` for the
/// in-memory backend.
#[derive(Clone)]
pub struct Storage {
    pub repositories: Repositories,
    pub pool: Option<DbPool>,
}

impl Storage {
    pub fn backend(&self) -> StorageBackend {
        if self.pool.is_some() {
            StorageBackend::Sqlite
        } else {
            StorageBackend::Memory
        }
    }
}

/// Selects the repository implementation once. SQLite storage is migrated
/// before it is handed out.
pub async fn open_storage(config: &DatabaseConfig) -> Result<Storage, StorageError> {
    match config.backend {
        StorageBackend::Memory => {
            info!(event_name = "storage.opened", backend = "memory", "using in-memory storage");
            Ok(Storage { repositories: Repositories::in_memory(), pool: None })
        }
        StorageBackend::Sqlite => {
            let pool = connect_with_settings(&config.url, config.max_connections, config.timeout_secs)
                .await
                .map_err(|source| StorageError::Connect { url: config.url.clone(), source })?;
            migrations::run_pending(&pool).await?;
            info!(
                event_name = "storage.opened",
                backend = "sqlite",
                max_connections = config.max_connections,
                "sqlite storage ready"
            );
            Ok(Storage { repositories: Repositories::sql(pool.clone()), pool: Some(pool) })
        }
    }
}
