use crate::commands::{async_runtime, load_config, CommandResult};
use slotline_core::config::StorageBackend;
use slotline_db::{open_storage, StorageError};

pub fn run() -> CommandResult {
    let config = match load_config("migrate") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    if config.database.backend == StorageBackend::Memory {
        return CommandResult::success(
            "migrate",
            "memory backend selected; there is no schema to migrate",
        );
    }

    let runtime = match async_runtime("migrate") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let storage = open_storage(&config.database).await?;
        if let Some(pool) = storage.pool {
            pool.close().await;
        }
        Ok::<(), StorageError>(())
    });

    match result {
        Ok(()) => CommandResult::success(
            "migrate",
            format!("applied pending migrations to `{}`", config.database.url),
        ),
        Err(StorageError::Connect { url, source }) => CommandResult::failure(
            "migrate",
            "db_connectivity",
            format!("failed to connect to `{url}`: {source}"),
            4,
        ),
        Err(StorageError::Migrate(error)) => {
            CommandResult::failure("migrate", "migration", error.to_string(), 5)
        }
    }
}
