use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use slotline_core::config::{ChannelConfig, TransportKind};
use slotline_core::domain::tenant::{TenantChannelCredential, TenantId};

use crate::render::{RenderError, SendPayload};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("channel request failed: {0}")]
    Network(String),
    #[error("channel request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("channel responded {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error(transparent)]
    Render(#[from] RenderError),
}

impl TransportError {
    /// Network trouble, timeouts, throttling and server errors are worth
    /// another attempt. Any other rejection is final for that message.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Render(_) => false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub provider_message_id: Option<String>,
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn send(
        &self,
        credential: &TenantChannelCredential,
        payload: &SendPayload,
    ) -> Result<SendReceipt, TransportError>;
}

pub fn transport_from_config(
    config: &ChannelConfig,
    send_timeout: Duration,
) -> Arc<dyn ChannelTransport> {
    match config.transport {
        TransportKind::Http => {
            Arc::new(HttpTransport::new(config.api_base_url.clone(), send_timeout))
        }
        TransportKind::Log => Arc::new(LogTransport),
    }
}

/// Posts payloads to `{base_url}/{channel_identity}/messages` with the tenant
/// secret as bearer token.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn messages_url(&self, credential: &TenantChannelCredential) -> String {
        format!("{}/{}/messages", self.base_url, credential.channel_identity.0)
    }
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentId>,
}

#[derive(Deserialize)]
struct SentId {
    id: String,
}

#[async_trait]
impl ChannelTransport for HttpTransport {
    async fn send(
        &self,
        credential: &TenantChannelCredential,
        payload: &SendPayload,
    ) -> Result<SendReceipt, TransportError> {
        let response = self
            .client
            .post(self.messages_url(credential))
            .bearer_auth(credential.secret.expose_secret())
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    TransportError::Timeout {
                        timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    }
                } else {
                    TransportError::Network(error.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                detail: detail.chars().take(512).collect(),
            });
        }

        let provider_message_id = response
            .json::<SendResponse>()
            .await
            .ok()
            .and_then(|body| body.messages.into_iter().next())
            .map(|sent| sent.id);
        debug!(
            tenant_id = %credential.tenant_id.0,
            provider_message_id = provider_message_id.as_deref().unwrap_or("unknown"),
            "channel accepted message"
        );
        Ok(SendReceipt { provider_message_id })
    }
}

/// Logs every payload and reports success. For local runs without a channel
/// account.
#[derive(Default)]
pub struct LogTransport;

#[async_trait]
impl ChannelTransport for LogTransport {
    async fn send(
        &self,
        credential: &TenantChannelCredential,
        payload: &SendPayload,
    ) -> Result<SendReceipt, TransportError> {
        let rendered = serde_json::to_string(payload).unwrap_or_default();
        info!(
            event_name = "delivery.log_transport.send",
            tenant_id = %credential.tenant_id.0,
            recipient = %payload.to,
            payload = %rendered,
            "outbound message (log transport)"
        );
        Ok(SendReceipt::default())
    }
}

#[derive(Clone, Debug)]
pub struct SentMessage {
    pub tenant_id: TenantId,
    pub payload: SendPayload,
    pub at: Instant,
}

#[derive(Default)]
struct Recorded {
    sent: Vec<SentMessage>,
    script: VecDeque<TransportError>,
    fail_always: Option<TransportError>,
}

/// Records sends and replays scripted failures. Used by tests across the
/// workspace.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingTransport {
    /// Queues one failure; the next send consumes it.
    pub fn fail_next(&self, error: TransportError) {
        self.with(|recorded| recorded.script.push_back(error));
    }

    pub fn fail_always(&self, error: TransportError) {
        self.with(|recorded| recorded.fail_always = Some(error));
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.with(|recorded| recorded.sent.clone())
    }

    pub fn bodies(&self) -> Vec<String> {
        self.sent().into_iter().map(|message| payload_text(&message.payload)).collect()
    }

    fn with<T>(&self, apply: impl FnOnce(&mut Recorded) -> T) -> T {
        match self.inner.lock() {
            Ok(mut recorded) => apply(&mut recorded),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl ChannelTransport for RecordingTransport {
    async fn send(
        &self,
        credential: &TenantChannelCredential,
        payload: &SendPayload,
    ) -> Result<SendReceipt, TransportError> {
        self.with(|recorded| {
            if let Some(error) = recorded.script.pop_front().or_else(|| recorded.fail_always.clone()) {
                return Err(error);
            }
            recorded.sent.push(SentMessage {
                tenant_id: credential.tenant_id.clone(),
                payload: payload.clone(),
                at: Instant::now(),
            });
            Ok(SendReceipt { provider_message_id: Some(format!("sent-{}", recorded.sent.len())) })
        })
    }
}

fn payload_text(payload: &SendPayload) -> String {
    use crate::render::{Interactive, PayloadContent};

    match &payload.content {
        PayloadContent::Text { text } => text.body.clone(),
        PayloadContent::Interactive { interactive: Interactive::Button { body, .. } }
        | PayloadContent::Interactive { interactive: Interactive::List { body, .. } } => {
            body.body.clone()
        }
        PayloadContent::Template { template } => template.name.clone(),
    }
}
