use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use slotline_core::config::DeliveryConfig;
use slotline_core::delivery::{
    Admission, BulkSummary, DeliveryCounters, DeliveryError, DeliveryStats, OutboundSink,
    PriorityQueue, RetryPolicy, SlidingWindowLimiter,
};
use slotline_core::domain::outbound::{OutboundEnvelope, OutboundRequest, Priority};
use slotline_core::domain::tenant::{RateLimitPolicy, TenantChannelCredential, TenantId};

use crate::credentials::{CachedCredentialResolver, CredentialError, CredentialSource};
use crate::render::render;
use crate::transport::{ChannelTransport, TransportError};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeliverySettings {
    pub retry: RetryPolicy,
    pub send_timeout: Duration,
    pub credential_ttl: Duration,
    pub failed_bucket_capacity: usize,
    pub default_rate_limit: RateLimitPolicy,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self::from(&DeliveryConfig::default())
    }
}

impl From<&DeliveryConfig> for DeliverySettings {
    fn from(value: &DeliveryConfig) -> Self {
        Self {
            retry: RetryPolicy::from(value),
            send_timeout: Duration::from_millis(value.send_timeout_ms),
            credential_ttl: Duration::from_secs(value.credential_ttl_secs),
            failed_bucket_capacity: value.failed_bucket_capacity,
            default_rate_limit: value.default_rate_limit,
        }
    }
}

/// Zero ceilings mean "not configured" and take the default.
fn effective_policy(policy: RateLimitPolicy, fallback: RateLimitPolicy) -> RateLimitPolicy {
    let pick = |value: u32, fallback: u32| if value == 0 { fallback.max(1) } else { value };
    RateLimitPolicy {
        per_second: pick(policy.per_second, fallback.per_second),
        per_minute: pick(policy.per_minute, fallback.per_minute),
        per_hour: pick(policy.per_hour, fallback.per_hour),
    }
}

struct LaneState {
    limiter: SlidingWindowLimiter,
    queue: PriorityQueue,
    counters: DeliveryCounters,
    failed: VecDeque<OutboundEnvelope>,
}

struct TenantLane {
    tenant_id: TenantId,
    state: Mutex<LaneState>,
    wake: Notify,
}

enum DrainStep {
    Recheck,
    SleepUntil(Instant),
    Send(OutboundEnvelope),
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

struct Shared {
    transport: Arc<dyn ChannelTransport>,
    credentials: CachedCredentialResolver,
    settings: DeliverySettings,
    lanes: Mutex<HashMap<TenantId, Arc<TenantLane>>>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Per-tenant outbound queue. Sends go out on the caller's path while the
/// tenant has rate headroom and nothing of equal or higher priority is
/// waiting; everything else is held and drained by one background task per
/// tenant.
#[derive(Clone)]
pub struct DeliveryQueue {
    shared: Arc<Shared>,
}

impl DeliveryQueue {
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        credentials: Arc<dyn CredentialSource>,
        settings: DeliverySettings,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                transport,
                credentials: CachedCredentialResolver::new(
                    credentials,
                    settings.credential_ttl,
                    settings.send_timeout,
                ),
                settings,
                lanes: Mutex::new(HashMap::new()),
                shutdown,
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub async fn enqueue(
        &self,
        tenant_id: &TenantId,
        request: OutboundRequest,
        priority: Priority,
    ) -> Result<Admission, DeliveryError> {
        if *self.shared.shutdown.borrow() {
            return Err(DeliveryError::ShutDown);
        }

        let credential = match self.shared.credentials.resolve(tenant_id).await {
            Ok(credential) => Some(credential),
            Err(CredentialError::Missing(_)) => {
                return Err(DeliveryError::UnknownTenant(tenant_id.0.clone()))
            }
            Err(error) => {
                warn!(
                    event_name = "delivery.credentials_unavailable",
                    tenant_id = %tenant_id.0,
                    error = %error,
                    "credential lookup failed; holding message for the drain task"
                );
                None
            }
        };
        let lane = self.shared.lane(tenant_id).await;
        let envelope = OutboundEnvelope::new(tenant_id.clone(), request, priority);

        let Some(credential) = credential else {
            return Ok(self.shared.hold(&lane, envelope).await);
        };

        {
            let mut state = lane.state.lock().await;
            self.shared.sync_policy(&lane.tenant_id, &mut state, &credential);
            let now = Instant::now();
            let must_wait = state.queue.has_eligible_at_or_above(priority, now)
                || state.limiter.try_acquire(now).is_err();
            if must_wait {
                drop(state);
                return Ok(self.shared.hold(&lane, envelope).await);
            }
        }

        Ok(self.shared.attempt(&lane, envelope, &credential).await)
    }

    /// Drives every request through the normal admission path on its own.
    pub async fn submit_bulk(
        &self,
        tenant_id: &TenantId,
        requests: Vec<OutboundRequest>,
        priority: Priority,
    ) -> Result<BulkSummary, DeliveryError> {
        let mut summary = BulkSummary::default();
        for request in requests {
            summary.record(self.enqueue(tenant_id, request, priority).await?);
        }
        info!(
            event_name = "delivery.bulk_submitted",
            tenant_id = %tenant_id.0,
            successful = summary.successful,
            queued = summary.queued,
            failed = summary.failed,
            "bulk send admitted"
        );
        Ok(summary)
    }

    pub async fn stats(&self, tenant_id: &TenantId) -> Option<DeliveryStats> {
        let lane = self.shared.lanes.lock().await.get(tenant_id).cloned()?;
        Some(lane.snapshot().await)
    }

    pub async fn stats_all(&self) -> Vec<DeliveryStats> {
        let lanes = self.shared.lanes.lock().await.values().cloned().collect::<Vec<_>>();
        let mut stats = Vec::with_capacity(lanes.len());
        for lane in lanes {
            stats.push(lane.snapshot().await);
        }
        stats.sort_by(|left, right| left.tenant_id.cmp(&right.tenant_id));
        stats
    }

    pub async fn failed_envelopes(&self, tenant_id: &TenantId) -> Vec<OutboundEnvelope> {
        let Some(lane) = self.shared.lanes.lock().await.get(tenant_id).cloned() else {
            return Vec::new();
        };
        let state = lane.state.lock().await;
        state.failed.iter().cloned().collect()
    }

    /// Stops admitting work and waits for the drain tasks to exit. Messages
    /// still queued are reported and dropped.
    pub async fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
        let workers = std::mem::take(&mut *self.shared.workers.lock().await);
        for worker in workers {
            if let Err(error) = worker.await {
                warn!(error = %error, "delivery drain task ended abnormally");
            }
        }

        for stats in self.stats_all().await {
            let pending = stats.depth.total();
            if pending > 0 {
                warn!(
                    event_name = "delivery.shutdown_pending",
                    tenant_id = %stats.tenant_id.0,
                    pending,
                    "delivery queue shut down with undelivered messages"
                );
            }
        }
    }
}

#[async_trait]
impl OutboundSink for DeliveryQueue {
    async fn submit(
        &self,
        tenant_id: &TenantId,
        request: OutboundRequest,
        priority: Priority,
    ) -> Result<Admission, DeliveryError> {
        self.enqueue(tenant_id, request, priority).await
    }
}

impl TenantLane {
    async fn snapshot(&self) -> DeliveryStats {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        DeliveryStats {
            tenant_id: self.tenant_id.clone(),
            depth: state.queue.depth(),
            headroom: state.limiter.headroom(now),
            counters: state.counters,
            failed_bucket: state.failed.len(),
        }
    }
}

impl Shared {
    /// Lanes start on the default policy; `sync_policy` applies the tenant's
    /// own ceilings before the first send.
    async fn lane(self: &Arc<Self>, tenant_id: &TenantId) -> Arc<TenantLane> {
        let mut lanes = self.lanes.lock().await;
        if let Some(lane) = lanes.get(tenant_id) {
            return Arc::clone(lane);
        }

        let lane = Arc::new(TenantLane {
            tenant_id: tenant_id.clone(),
            state: Mutex::new(LaneState {
                limiter: SlidingWindowLimiter::new(self.settings.default_rate_limit),
                queue: PriorityQueue::default(),
                counters: DeliveryCounters::default(),
                failed: VecDeque::new(),
            }),
            wake: Notify::new(),
        });
        lanes.insert(tenant_id.clone(), Arc::clone(&lane));
        drop(lanes);

        let worker = tokio::spawn(Arc::clone(self).drain(Arc::clone(&lane), self.shutdown.subscribe()));
        self.workers.lock().await.push(worker);
        info!(event_name = "delivery.lane_started", tenant_id = %tenant_id.0, "delivery lane started");
        lane
    }

    fn sync_policy(
        &self,
        tenant_id: &TenantId,
        state: &mut LaneState,
        credential: &TenantChannelCredential,
    ) {
        let policy = effective_policy(credential.rate_limit, self.settings.default_rate_limit);
        if state.limiter.policy() != policy {
            info!(
                event_name = "delivery.rate_policy_applied",
                tenant_id = %tenant_id.0,
                per_second = policy.per_second,
                per_minute = policy.per_minute,
                per_hour = policy.per_hour,
                "tenant rate policy applied to delivery lane"
            );
            state.limiter.set_policy(policy);
        }
    }

    async fn hold(&self, lane: &TenantLane, envelope: OutboundEnvelope) -> Admission {
        info!(
            event_name = "delivery.queued",
            tenant_id = %lane.tenant_id.0,
            envelope_id = %envelope.id.0,
            priority = envelope.priority.as_str(),
            attempt = envelope.attempt_count,
            "outbound message queued"
        );
        let mut state = lane.state.lock().await;
        state.queue.push(envelope);
        state.counters.queued += 1;
        drop(state);
        lane.wake.notify_one();
        Admission::Queued
    }

    async fn attempt(
        &self,
        lane: &TenantLane,
        mut envelope: OutboundEnvelope,
        credential: &TenantChannelCredential,
    ) -> Admission {
        envelope.attempt_count += 1;
        let result = match render(&envelope.payload) {
            Ok(payload) => {
                match tokio::time::timeout(
                    self.settings.send_timeout,
                    self.transport.send(credential, &payload),
                )
                .await
                {
                    Ok(sent) => sent.map(|_| ()),
                    Err(_) => Err(TransportError::Timeout {
                        timeout_ms: millis(self.settings.send_timeout),
                    }),
                }
            }
            Err(error) => Err(TransportError::from(error)),
        };

        match result {
            Ok(()) => {
                lane.state.lock().await.counters.sent += 1;
                info!(
                    event_name = "delivery.sent",
                    tenant_id = %lane.tenant_id.0,
                    envelope_id = %envelope.id.0,
                    priority = envelope.priority.as_str(),
                    attempt = envelope.attempt_count,
                    "outbound message delivered"
                );
                Admission::Delivered
            }
            Err(error) => {
                let retryable = error.is_retryable();
                self.settle_failure(lane, envelope, error.to_string(), retryable).await
            }
        }
    }

    async fn settle_failure(
        &self,
        lane: &TenantLane,
        mut envelope: OutboundEnvelope,
        reason: String,
        retryable: bool,
    ) -> Admission {
        let retry = self.settings.retry;
        envelope.last_error = Some(reason);

        if retryable && !retry.exhausted(envelope.attempt_count) {
            let delay = retry.backoff_with_jitter(envelope.attempt_count, &mut rand::thread_rng());
            envelope.next_eligible_at = Some(Instant::now() + delay);
            warn!(
                event_name = "delivery.retry_scheduled",
                tenant_id = %lane.tenant_id.0,
                envelope_id = %envelope.id.0,
                attempt = envelope.attempt_count,
                delay_ms = millis(delay),
                error = envelope.last_error.as_deref().unwrap_or_default(),
                "send failed; retrying with backoff"
            );
            return self.hold(lane, envelope).await;
        }

        warn!(
            event_name = "delivery.failed",
            tenant_id = %lane.tenant_id.0,
            envelope_id = %envelope.id.0,
            attempt = envelope.attempt_count,
            retryable,
            error = envelope.last_error.as_deref().unwrap_or_default(),
            "outbound message moved to failed bucket"
        );
        let mut state = lane.state.lock().await;
        state.counters.failed += 1;
        state.failed.push_back(envelope);
        while state.failed.len() > self.settings.failed_bucket_capacity {
            if let Some(evicted) = state.failed.pop_front() {
                debug!(
                    tenant_id = %lane.tenant_id.0,
                    envelope_id = %evicted.id.0,
                    "failed bucket full; oldest entry evicted"
                );
            }
        }
        Admission::Failed
    }

    /// Nothing is popped until the tenant's credential resolves, so every
    /// send is admitted against the tenant's current ceilings.
    async fn drain(self: Arc<Self>, lane: Arc<TenantLane>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = Instant::now();
            let next = lane.state.lock().await.queue.next_eligible_at(now);
            match next {
                None => {
                    pause(&lane, &mut shutdown, None).await;
                    continue;
                }
                Some(at) if at > now => {
                    pause(&lane, &mut shutdown, Some(at)).await;
                    continue;
                }
                Some(_) => {}
            }

            let credential = match self.credentials.resolve(&lane.tenant_id).await {
                Ok(credential) => credential,
                Err(error) => {
                    let popped = lane.state.lock().await.queue.pop_eligible(Instant::now());
                    if let Some(mut envelope) = popped {
                        envelope.attempt_count += 1;
                        let retryable = error.is_retryable();
                        self.settle_failure(&lane, envelope, error.to_string(), retryable).await;
                    }
                    continue;
                }
            };

            let step = {
                let mut state = lane.state.lock().await;
                self.sync_policy(&lane.tenant_id, &mut state, &credential);
                let now = Instant::now();
                match state.limiter.try_acquire(now) {
                    Err(wait) => DrainStep::SleepUntil(now + wait),
                    Ok(()) => {
                        state.queue.pop_eligible(now).map_or(DrainStep::Recheck, DrainStep::Send)
                    }
                }
            };

            match step {
                DrainStep::Recheck => {}
                DrainStep::SleepUntil(at) => pause(&lane, &mut shutdown, Some(at)).await,
                DrainStep::Send(envelope) => {
                    self.attempt(&lane, envelope, &credential).await;
                }
            }
        }
        info!(event_name = "delivery.lane_stopped", tenant_id = %lane.tenant_id.0, "delivery lane stopped");
    }
}

async fn pause(lane: &TenantLane, shutdown: &mut watch::Receiver<bool>, until: Option<Instant>) {
    match until {
        Some(at) => {
            tokio::select! {
                _ = tokio::time::sleep_until(at) => {}
                _ = lane.wake.notified() => {}
                _ = shutdown.changed() => {}
            }
        }
        None => {
            tokio::select! {
                _ = lane.wake.notified() => {}
                _ = shutdown.changed() => {}
            }
        }
    }
}
