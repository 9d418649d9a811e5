use std::sync::Arc;

use async_trait::async_trait;

use slotline_core::domain::offering::Offering;
use slotline_core::domain::tenant::TenantId;
use slotline_core::flows::{CatalogError, OfferingCatalog};
use slotline_db::repositories::OfferingRepository;

/// Serves the engine's offering lookups from the offering repository.
pub struct RepositoryCatalog {
    offerings: Arc<dyn OfferingRepository>,
}

impl RepositoryCatalog {
    pub fn new(offerings: Arc<dyn OfferingRepository>) -> Self {
        Self { offerings }
    }
}

#[async_trait]
impl OfferingCatalog for RepositoryCatalog {
    async fn active_offerings(&self, tenant_id: &TenantId) -> Result<Vec<Offering>, CatalogError> {
        self.offerings
            .list_active(tenant_id)
            .await
            .map_err(|error| CatalogError::Unavailable(error.to_string()))
    }
}
