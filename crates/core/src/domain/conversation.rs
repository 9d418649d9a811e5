use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::tenant::TenantId;
use crate::flows::states::{ConversationContext, ConversationState};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

/// One logical conversation per (tenant, customer handle). Never deleted;
/// `Completed` is re-entered into `Greeting` by the next inbound message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub tenant_id: TenantId,
    pub customer_handle: String,
    pub state: ConversationState,
    pub context: ConversationContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn start(tenant_id: TenantId, customer_handle: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId(Uuid::new_v4().to_string()),
            tenant_id,
            customer_handle: customer_handle.into(),
            state: ConversationState::Greeting,
            context: ConversationContext::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Conversation;
    use crate::domain::tenant::TenantId;
    use crate::flows::states::ConversationState;

    #[test]
    fn new_conversations_start_in_greeting_with_empty_context() {
        let conversation = Conversation::start(TenantId("t-1".to_string()), "15551234567");

        assert_eq!(conversation.state, ConversationState::Greeting);
        assert_eq!(conversation.context.traversal, 0);
        assert!(conversation.context.offering.is_none());
        assert_eq!(conversation.created_at, conversation.updated_at);
    }
}
