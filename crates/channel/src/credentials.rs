use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use slotline_core::domain::tenant::{TenantChannelCredential, TenantId};
use slotline_db::repositories::TenantRepository;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("no channel credential for tenant `{0}`")]
    Missing(String),
    #[error("credential lookup failed: {0}")]
    Lookup(String),
    #[error("credential lookup timed out after {0}ms")]
    Timeout(u64),
}

impl CredentialError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Missing(_))
    }
}

#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self, tenant_id: &TenantId) -> Result<TenantChannelCredential, CredentialError>;
}

#[async_trait]
impl CredentialSource for Arc<dyn TenantRepository> {
    async fn fetch(&self, tenant_id: &TenantId) -> Result<TenantChannelCredential, CredentialError> {
        self.find_credential(tenant_id)
            .await
            .map_err(|error| CredentialError::Lookup(error.to_string()))?
            .ok_or_else(|| CredentialError::Missing(tenant_id.0.clone()))
    }
}

struct CachedCredential {
    credential: TenantChannelCredential,
    fetched_at: Instant,
}

/// Serves credentials from memory for `ttl`, so a rotated secret is picked up
/// within one TTL without a lookup per send.
pub struct CachedCredentialResolver {
    source: Arc<dyn CredentialSource>,
    ttl: Duration,
    lookup_timeout: Duration,
    entries: RwLock<HashMap<TenantId, CachedCredential>>,
}

impl CachedCredentialResolver {
    pub fn new(source: Arc<dyn CredentialSource>, ttl: Duration, lookup_timeout: Duration) -> Self {
        Self { source, ttl, lookup_timeout, entries: RwLock::new(HashMap::new()) }
    }

    pub async fn resolve(
        &self,
        tenant_id: &TenantId,
    ) -> Result<TenantChannelCredential, CredentialError> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(tenant_id) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.credential.clone());
                }
            }
        }

        let credential = tokio::time::timeout(self.lookup_timeout, self.source.fetch(tenant_id))
            .await
            .map_err(|_| {
                CredentialError::Timeout(
                    u64::try_from(self.lookup_timeout.as_millis()).unwrap_or(u64::MAX),
                )
            })??;
        debug!(tenant_id = %tenant_id.0, "channel credential refreshed");

        let mut entries = self.entries.write().await;
        entries.insert(
            tenant_id.clone(),
            CachedCredential { credential: credential.clone(), fetched_at: Instant::now() },
        );
        Ok(credential)
    }

    pub async fn invalidate(&self, tenant_id: &TenantId) {
        self.entries.write().await.remove(tenant_id);
    }
}
