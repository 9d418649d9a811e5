use serde::{Deserialize, Serialize};
use thiserror::Error;

use slotline_core::domain::message::{InboundMessage, InteractiveSelection, MessageType};
use slotline_core::flows::parsers::parse_phone_handle;

/// What the webhook collaborator hands over after it has verified the vendor
/// request: the business identity the message was addressed to and the
/// message in canonical form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub channel_identity: String,
    pub message: InboundMessage,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InboundRejection {
    #[error("channel identity is required")]
    MissingChannelIdentity,
    #[error("message id is required")]
    MissingMessageId,
    #[error("sender handle rejected: {0}")]
    InvalidSender(String),
}

/// Trims every field, drops blank text and selections, strips the `+` from
/// sender handles so one customer maps to one conversation, and derives the
/// message type from what the message actually carries.
pub fn normalize(envelope: InboundEnvelope) -> Result<InboundEnvelope, InboundRejection> {
    let channel_identity = envelope.channel_identity.trim().to_string();
    if channel_identity.is_empty() {
        return Err(InboundRejection::MissingChannelIdentity);
    }

    let message = envelope.message;
    let id = message.id.trim().to_string();
    if id.is_empty() {
        return Err(InboundRejection::MissingMessageId);
    }

    let sender = parse_phone_handle(&message.sender_handle)
        .map_err(|rejection| InboundRejection::InvalidSender(rejection.message))?;
    let sender_handle = sender.trim_start_matches('+').to_string();

    let text = message.text.map(|text| text.trim().to_string()).filter(|text| !text.is_empty());
    let interactive_selection = message.interactive_selection.and_then(|selection| {
        let id = selection.id.trim().to_string();
        (!id.is_empty()).then(|| InteractiveSelection {
            id,
            title: selection
                .title
                .map(|title| title.trim().to_string())
                .filter(|title| !title.is_empty()),
        })
    });

    let message_type = match (&text, &interactive_selection) {
        (_, Some(_)) => MessageType::Interactive,
        (Some(_), None) => MessageType::Text,
        (None, None) => MessageType::Unsupported,
    };

    Ok(InboundEnvelope {
        channel_identity,
        message: InboundMessage {
            id,
            sender_handle,
            text,
            interactive_selection,
            message_type,
            timestamp: message.timestamp,
        },
    })
}

#[cfg(test)]
mod tests {
    use slotline_core::domain::message::{InboundMessage, InteractiveSelection, MessageType};

    use super::{normalize, InboundEnvelope, InboundRejection};

    fn envelope(message: InboundMessage) -> InboundEnvelope {
        InboundEnvelope { channel_identity: " 15550000000 ".to_string(), message }
    }

    #[test]
    fn trims_fields_and_strips_plus_from_sender() {
        let normalized =
            normalize(envelope(InboundMessage::text(" wamid-1 ", "+15551234567", "  hi  ")))
                .expect("valid inbound");

        assert_eq!(normalized.channel_identity, "15550000000");
        assert_eq!(normalized.message.id, "wamid-1");
        assert_eq!(normalized.message.sender_handle, "15551234567");
        assert_eq!(normalized.message.text.as_deref(), Some("hi"));
        assert_eq!(normalized.message.message_type, MessageType::Text);
    }

    #[test]
    fn selection_wins_over_declared_type() {
        let mut message = InboundMessage::selection("wamid-2", "15551234567", " confirm ");
        message.message_type = MessageType::Text;
        message.interactive_selection =
            Some(InteractiveSelection { id: " confirm ".to_string(), title: Some(" ".to_string()) });

        let normalized = normalize(envelope(message)).expect("valid inbound");
        let selection = normalized.message.interactive_selection.expect("selection");
        assert_eq!(selection.id, "confirm");
        assert!(selection.title.is_none());
        assert_eq!(normalized.message.message_type, MessageType::Interactive);
    }

    #[test]
    fn blank_message_becomes_unsupported() {
        let normalized =
            normalize(envelope(InboundMessage::text("wamid-3", "15551234567", "   ")))
                .expect("still routable");
        assert!(normalized.message.text.is_none());
        assert_eq!(normalized.message.message_type, MessageType::Unsupported);
    }

    #[test]
    fn rejects_unroutable_messages() {
        let missing_identity = InboundEnvelope {
            channel_identity: "  ".to_string(),
            message: InboundMessage::text("wamid-4", "15551234567", "hi"),
        };
        assert_eq!(normalize(missing_identity), Err(InboundRejection::MissingChannelIdentity));

        let missing_id = envelope(InboundMessage::text(" ", "15551234567", "hi"));
        assert_eq!(normalize(missing_id), Err(InboundRejection::MissingMessageId));

        let bad_sender = envelope(InboundMessage::text("wamid-5", "someone@example.com", "hi"));
        assert!(matches!(normalize(bad_sender), Err(InboundRejection::InvalidSender(_))));
    }
}
