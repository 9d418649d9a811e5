pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod storage;

pub use connection::{connect, connect_with_settings, ping, DbPool};
pub use fixtures::{DemoSeedDataset, SeedResult, VerificationResult};
pub use repositories::{RepositoryError, Repositories};
pub use storage::{open_storage, Storage, StorageError};
