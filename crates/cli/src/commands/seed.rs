use crate::commands::{async_runtime, load_config, CommandResult};
use slotline_core::config::StorageBackend;
use slotline_db::{open_storage, DemoSeedDataset, SeedResult, StorageError};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    if config.database.backend == StorageBackend::Memory {
        return CommandResult::failure(
            "seed",
            "unsupported_backend",
            "seed writes demo data to SQLite; set database.backend = \"sqlite\"",
            2,
        );
    }

    let runtime = match async_runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let storage = open_storage(&config.database).await.map_err(|error| match error {
            StorageError::Connect { .. } => ("db_connectivity", error.to_string(), 4u8),
            StorageError::Migrate(_) => ("migration", error.to_string(), 5u8),
        })?;

        let seeded = DemoSeedDataset::load(&storage.repositories)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8));
        let verification = match &seeded {
            Ok(_) => DemoSeedDataset::verify(&storage.repositories)
                .await
                .map_err(|error| ("seed_verification", error.to_string(), 6u8)),
            Err(failure) => Err(failure.clone()),
        };

        if let Some(pool) = storage.pool {
            pool.close().await;
        }

        let seeded = seeded?;
        let verification = verification?;
        if !verification.all_present {
            let failed_checks = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            return Err((
                "seed_verification",
                format!("seed verification failed for checks: {}", failed_checks.join(", ")),
                6u8,
            ));
        }
        Ok::<SeedResult, (&'static str, String, u8)>(seeded)
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", describe(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn describe(seeded: &SeedResult) -> String {
    let offerings =
        seeded.offerings_seeded.iter().map(|offering| format!("  - {offering}")).collect::<Vec<_>>();
    format!(
        "seeded demo tenant `{}` on channel identity `{}` with {} offerings:\n{}",
        seeded.tenant_id,
        seeded.channel_identity,
        seeded.offerings_seeded.len(),
        offerings.join("\n")
    )
}
