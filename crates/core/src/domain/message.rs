use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::ConversationId;
use crate::domain::tenant::TenantId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Interactive,
    Buttons,
    List,
    Template,
    Unsupported,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Interactive => "interactive",
            Self::Buttons => "buttons",
            Self::List => "list",
            Self::Template => "template",
            Self::Unsupported => "unsupported",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "interactive" => Some(Self::Interactive),
            "buttons" => Some(Self::Buttons),
            "list" => Some(Self::List),
            "template" => Some(Self::Template),
            "unsupported" => Some(Self::Unsupported),
            _ => None,
        }
    }
}

/// Append-only log entry. Messages are never mutated after they are written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub tenant_id: TenantId,
    pub conversation_id: ConversationId,
    pub external_id: Option<String>,
    pub direction: MessageDirection,
    pub message_type: MessageType,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn inbound(
        tenant_id: TenantId,
        conversation_id: ConversationId,
        inbound: &InboundMessage,
    ) -> Self {
        Self {
            id: MessageId(Uuid::new_v4().to_string()),
            tenant_id,
            conversation_id,
            external_id: Some(inbound.id.clone()),
            direction: MessageDirection::Inbound,
            message_type: inbound.message_type,
            content: inbound.display_text(),
            created_at: inbound.timestamp,
        }
    }

    pub fn outbound(
        tenant_id: TenantId,
        conversation_id: ConversationId,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId(Uuid::new_v4().to_string()),
            tenant_id,
            conversation_id,
            external_id: None,
            direction: MessageDirection::Outbound,
            message_type,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// A button press or list-row pick made by the customer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveSelection {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Canonical inbound shape produced by the webhook collaborator after it has
/// verified and normalized the vendor payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub sender_handle: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub interactive_selection: Option<InteractiveSelection>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn text(id: impl Into<String>, sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sender_handle: sender.into(),
            text: Some(text.into()),
            interactive_selection: None,
            message_type: MessageType::Text,
            timestamp: Utc::now(),
        }
    }

    pub fn selection(
        id: impl Into<String>,
        sender: impl Into<String>,
        selection_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sender_handle: sender.into(),
            text: None,
            interactive_selection: Some(InteractiveSelection {
                id: selection_id.into(),
                title: None,
            }),
            message_type: MessageType::Interactive,
            timestamp: Utc::now(),
        }
    }

    pub fn display_text(&self) -> String {
        match (&self.text, &self.interactive_selection) {
            (Some(text), _) => text.clone(),
            (None, Some(selection)) => {
                selection.title.clone().unwrap_or_else(|| selection.id.clone())
            }
            (None, None) => String::new(),
        }
    }
}
