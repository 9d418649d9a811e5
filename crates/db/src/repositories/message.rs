use sqlx::{sqlite::SqliteRow, Row};

use slotline_core::domain::conversation::ConversationId;
use slotline_core::domain::message::{Message, MessageDirection, MessageId, MessageType};
use slotline_core::domain::tenant::TenantId;

use super::rows::parse_timestamp;
use super::{MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(&self, message: Message) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO message
                 (id, tenant_id, conversation_id, external_id, direction, message_type, content, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id.0)
        .bind(&message.tenant_id.0)
        .bind(&message.conversation_id.0)
        .bind(&message.external_id)
        .bind(message.direction.as_str())
        .bind(message.message_type.as_str())
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from_write)?;

        Ok(())
    }

    async fn list_for_conversation(
        &self,
        tenant_id: &TenantId,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, conversation_id, external_id, direction, message_type, content, created_at
             FROM message
             WHERE tenant_id = ? AND conversation_id = ?
             ORDER BY rowid ASC",
        )
        .bind(&tenant_id.0)
        .bind(&conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn exists_external(
        &self,
        tenant_id: &TenantId,
        external_id: &str,
    ) -> Result<bool, RepositoryError> {
        let count = sqlx::query(
            "SELECT COUNT(*) AS count FROM message WHERE tenant_id = ? AND external_id = ?",
        )
        .bind(&tenant_id.0)
        .bind(external_id)
        .fetch_one(&self.pool)
        .await?
        .try_get::<i64, _>("count")?;

        Ok(count > 0)
    }
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let direction_raw = row.try_get::<String, _>("direction")?;
    let direction = MessageDirection::parse(&direction_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown direction `{direction_raw}`")))?;
    let type_raw = row.try_get::<String, _>("message_type")?;
    let message_type = MessageType::parse(&type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message_type `{type_raw}`")))?;

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        external_id: row.try_get("external_id")?,
        direction,
        message_type,
        content: row.try_get("content")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use slotline_core::domain::conversation::Conversation;
    use slotline_core::domain::message::{InboundMessage, Message, MessageDirection, MessageType};
    use slotline_core::domain::tenant::{ActiveFlow, TenantId, TenantProfile};

    use super::SqlMessageRepository;
    use crate::repositories::{
        ConversationRepository, MessageRepository, RepositoryError, SqlConversationRepository,
        SqlTenantRepository, TenantRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> (DbPool, Conversation) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let tenant_id = TenantId("tenant-a".to_string());
        SqlTenantRepository::new(pool.clone())
            .save_profile(TenantProfile {
                tenant_id: tenant_id.clone(),
                display_name: "Studio A".to_string(),
                currency: "USD".to_string(),
                active_flow: ActiveFlow::Catalog,
            })
            .await
            .expect("tenant");
        let conversation = Conversation::start(tenant_id, "15550001111");
        SqlConversationRepository::new(pool.clone())
            .save(conversation.clone())
            .await
            .expect("conversation");
        (pool, conversation)
    }

    #[tokio::test]
    async fn log_preserves_append_order_and_direction() {
        let (pool, conversation) = setup().await;
        let repo = SqlMessageRepository::new(pool);
        let inbound = InboundMessage::text("wamid.1", "15550001111", "hi");

        repo.append(Message::inbound(
            conversation.tenant_id.clone(),
            conversation.id.clone(),
            &inbound,
        ))
        .await
        .expect("append inbound");
        repo.append(Message::outbound(
            conversation.tenant_id.clone(),
            conversation.id.clone(),
            MessageType::List,
            "Here is what we offer",
        ))
        .await
        .expect("append outbound");

        let log = repo
            .list_for_conversation(&conversation.tenant_id, &conversation.id)
            .await
            .expect("list");
        let directions = log.iter().map(|message| message.direction).collect::<Vec<_>>();
        assert_eq!(directions, vec![MessageDirection::Inbound, MessageDirection::Outbound]);
        assert_eq!(log[0].content, "hi");
        assert_eq!(log[1].message_type, MessageType::List);
    }

    #[tokio::test]
    async fn external_ids_are_recorded_once_per_tenant() {
        let (pool, conversation) = setup().await;
        let repo = SqlMessageRepository::new(pool);
        let inbound = InboundMessage::text("wamid.7", "15550001111", "hello");
        let message =
            Message::inbound(conversation.tenant_id.clone(), conversation.id.clone(), &inbound);

        assert!(!repo.exists_external(&conversation.tenant_id, "wamid.7").await.expect("check"));
        repo.append(message).await.expect("append");
        assert!(repo.exists_external(&conversation.tenant_id, "wamid.7").await.expect("check"));

        let replay =
            Message::inbound(conversation.tenant_id.clone(), conversation.id.clone(), &inbound);
        let error = repo.append(replay).await.expect_err("duplicate external id");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }
}
