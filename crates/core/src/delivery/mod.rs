//! Delivery primitives shared by the conversation runtime and the channel
//! queue: admission results, rate windows, priority lanes and retry backoff.

pub mod queue;
pub mod rate_limit;
pub mod retry;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::outbound::{OutboundRequest, Priority};
use crate::domain::tenant::TenantId;

pub use queue::{PriorityQueue, QueueDepth};
pub use rate_limit::{CeilingHeadroom, RateCeiling, SlidingWindowLimiter};
pub use retry::RetryPolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    /// Sent on the caller's path.
    Delivered,
    /// Held for the background drain (no headroom, or a retryable failure).
    Queued,
    /// Permanently rejected; moved to the failed bucket.
    Failed,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery is shut down")]
    ShutDown,
    #[error("no channel credentials for tenant `{0}`")]
    UnknownTenant(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryCounters {
    pub sent: u64,
    pub queued: u64,
    pub failed: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub tenant_id: TenantId,
    pub depth: QueueDepth,
    pub headroom: Vec<CeilingHeadroom>,
    pub counters: DeliveryCounters,
    pub failed_bucket: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BulkSummary {
    pub successful: usize,
    pub queued: usize,
    pub failed: usize,
}

impl BulkSummary {
    pub fn record(&mut self, admission: Admission) {
        match admission {
            Admission::Delivered => self.successful += 1,
            Admission::Queued => self.queued += 1,
            Admission::Failed => self.failed += 1,
        }
    }
}

#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn submit(
        &self,
        tenant_id: &TenantId,
        request: OutboundRequest,
        priority: Priority,
    ) -> Result<Admission, DeliveryError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmittedReply {
    pub tenant_id: TenantId,
    pub request: OutboundRequest,
    pub priority: Priority,
}

/// Accepts every reply and keeps it for inspection.
#[derive(Clone, Default)]
pub struct InMemoryOutboundSink {
    submitted: Arc<Mutex<Vec<SubmittedReply>>>,
}

impl InMemoryOutboundSink {
    pub fn submitted(&self) -> Vec<SubmittedReply> {
        match self.submitted.lock() {
            Ok(items) => items.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl OutboundSink for InMemoryOutboundSink {
    async fn submit(
        &self,
        tenant_id: &TenantId,
        request: OutboundRequest,
        priority: Priority,
    ) -> Result<Admission, DeliveryError> {
        let reply = SubmittedReply { tenant_id: tenant_id.clone(), request, priority };
        match self.submitted.lock() {
            Ok(mut items) => items.push(reply),
            Err(poisoned) => poisoned.into_inner().push(reply),
        }
        Ok(Admission::Delivered)
    }
}
