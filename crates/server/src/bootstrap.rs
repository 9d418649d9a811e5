use std::sync::Arc;

use slotline_agent::{BookingService, ConversationRuntime};
use slotline_channel::transport::transport_from_config;
use slotline_channel::{CredentialSource, DeliveryQueue, DeliverySettings};
use slotline_core::audit::TracingAuditSink;
use slotline_core::config::{AppConfig, ConfigError, LoadOptions};
use slotline_core::flows::FlowSettings;
use slotline_db::{open_storage, Storage, StorageError};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub storage: Storage,
    pub delivery: DeliveryQueue,
    pub runtime: Arc<ConversationRuntime>,
    pub bookings: Arc<BookingService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        backend = config.database.backend.as_str(),
        "starting application bootstrap"
    );
    let storage = open_storage(&config.database).await?;

    let settings = DeliverySettings::from(&config.delivery);
    let transport = transport_from_config(&config.channel, settings.send_timeout);
    let credentials: Arc<dyn CredentialSource> = Arc::new(storage.repositories.tenants.clone());
    let delivery = DeliveryQueue::new(transport, credentials, settings);

    let (runtime, bookings) = ConversationRuntime::assemble(
        storage.repositories.clone(),
        FlowSettings::from(&config.engine),
        Arc::new(delivery.clone()),
        Arc::new(TracingAuditSink),
    );
    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        "conversation runtime and delivery queue initialized"
    );

    Ok(Application { config, storage, delivery, runtime: Arc::new(runtime), bookings })
}
