use sqlx::{sqlite::SqliteRow, Row};

use slotline_core::domain::conversation::{Conversation, ConversationId};
use slotline_core::domain::tenant::TenantId;
use slotline_core::flows::{ConversationContext, ConversationState};

use super::rows::{encode_json, parse_timestamp};
use super::{ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_CONVERSATION: &str =
    "SELECT id, tenant_id, customer_handle, state, context_json, created_at, updated_at
     FROM conversation";

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_by_handle(
        &self,
        tenant_id: &TenantId,
        customer_handle: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_CONVERSATION} WHERE tenant_id = ? AND customer_handle = ?"
        ))
        .bind(&tenant_id.0)
        .bind(customer_handle)
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_CONVERSATION} WHERE tenant_id = ? AND id = ?"))
            .bind(&tenant_id.0)
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        let context_json = encode_json("context_json", &conversation.context)?;

        sqlx::query(
            "INSERT INTO conversation
                 (id, tenant_id, customer_handle, state, context_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 state = excluded.state,
                 context_json = excluded.context_json,
                 updated_at = excluded.updated_at",
        )
        .bind(&conversation.id.0)
        .bind(&conversation.tenant_id.0)
        .bind(&conversation.customer_handle)
        .bind(conversation.state.as_str())
        .bind(context_json)
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from_write)?;

        Ok(())
    }
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = ConversationState::parse(&state_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown conversation state `{state_raw}`"))
    })?;
    let context_raw = row.try_get::<String, _>("context_json")?;
    let context = serde_json::from_str::<ConversationContext>(&context_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid context_json: {error}")))?;

    Ok(Conversation {
        id: ConversationId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        customer_handle: row.try_get("customer_handle")?,
        state,
        context,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
