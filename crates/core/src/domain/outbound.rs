use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::message::MessageType;
use crate::domain::tenant::TenantId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// Drain order, highest first.
    pub const ORDERED: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyButton {
    pub id: String,
    pub title: String,
}

impl ReplyButton {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self { id: id.into(), title: title.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Buttons { buttons: Vec<ReplyButton> },
    List { button_label: String, rows: Vec<ListRow> },
    Template { name: String, language: String, parameters: Vec<String> },
}

impl MessageKind {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Text => MessageType::Text,
            Self::Buttons { .. } => MessageType::Buttons,
            Self::List { .. } => MessageType::List,
            Self::Template { .. } => MessageType::Template,
        }
    }
}

/// Send request produced by the conversation engine and consumed by the
/// delivery queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub recipient_handle: String,
    pub body: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl OutboundRequest {
    pub fn text(recipient: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipient_handle: recipient.into(),
            body: body.into(),
            kind: MessageKind::Text,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvelopeId(pub String);

/// One queued outbound message. Lives only inside the delivery queue and is
/// dropped on terminal success or moved to the failed bucket.
#[derive(Clone, Debug)]
pub struct OutboundEnvelope {
    pub id: EnvelopeId,
    pub tenant_id: TenantId,
    pub payload: OutboundRequest,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub next_eligible_at: Option<Instant>,
    pub last_error: Option<String>,
}

impl OutboundEnvelope {
    pub fn new(tenant_id: TenantId, payload: OutboundRequest, priority: Priority) -> Self {
        Self {
            id: EnvelopeId(Uuid::new_v4().to_string()),
            tenant_id,
            payload,
            priority,
            enqueued_at: Utc::now(),
            attempt_count: 0,
            next_eligible_at: None,
            last_error: None,
        }
    }

    pub fn recipient(&self) -> &str {
        &self.payload.recipient_handle
    }

    pub fn is_eligible(&self, now: Instant) -> bool {
        self.next_eligible_at.map_or(true, |at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::{MessageKind, OutboundRequest, Priority, ReplyButton};

    #[test]
    fn priority_ranks_follow_drain_order() {
        let ranks = Priority::ORDERED.iter().map(Priority::rank).collect::<Vec<_>>();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert_eq!(Priority::parse("LOW"), Some(Priority::Low));
    }

    #[test]
    fn outbound_request_serializes_kind_as_tagged_object() {
        let request = OutboundRequest::text("15551234567", "Confirm?")
            .with_kind(MessageKind::Buttons {
                buttons: vec![ReplyButton::new("confirm", "Confirm")],
            })
            .with_metadata("conversation_id", "c-1");

        let value = serde_json::to_value(&request).expect("serialize request");
        assert_eq!(value["kind"]["kind"], "buttons");
        assert_eq!(value["kind"]["buttons"][0]["id"], "confirm");
        assert_eq!(value["metadata"]["conversation_id"], "c-1");
    }
}
