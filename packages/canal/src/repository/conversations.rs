use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::Row;

use crate::models::{Conversation, ConversationSummary};

use super::ContactRepository;

impl ContactRepository {
    /// Fetch the conversation for a psychologist, creating it on first
    /// contact. At most one exists per psychologist.
    pub async fn find_or_create_conversation(&self, psychologist_id: i64) -> Result<Conversation> {
        sqlx::query(
            r#"
            INSERT INTO conversations (psychologist_id)
            VALUES (?)
            ON CONFLICT(psychologist_id) DO NOTHING
            "#,
        )
        .bind(psychologist_id)
        .execute(&self.pool)
        .await
        .context("Failed to create conversation")?;

        self.get_conversation_for_psychologist(psychologist_id)
            .await?
            .context("Conversation missing after insert")
    }

    pub async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            r#"
            SELECT id, psychologist_id, created_at, updated_at
            FROM conversations
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Conversation {
            id: r.get("id"),
            psychologist_id: r.get("psychologist_id"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    pub async fn get_conversation_for_psychologist(
        &self,
        psychologist_id: i64,
    ) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            r#"
            SELECT id, psychologist_id, created_at, updated_at
            FROM conversations
            WHERE psychologist_id = ?
            "#,
        )
        .bind(psychologist_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Conversation {
            id: r.get("id"),
            psychologist_id: r.get("psychologist_id"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    /// Bump updated_at so the operator list keeps active channels first.
    pub async fn touch_conversation(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Operator-facing list: every conversation with its latest message and
    /// the count of psychologist messages the operator has not read yet.
    pub async fn list_conversation_summaries(&self) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT
                c.id,
                c.psychologist_id,
                (SELECT content FROM messages WHERE conversation_id = c.id ORDER BY id DESC LIMIT 1) as last_message,
                (SELECT created_at FROM messages WHERE conversation_id = c.id ORDER BY id DESC LIMIT 1) as last_message_at,
                (SELECT COUNT(*) FROM messages
                    WHERE conversation_id = c.id
                      AND sender_type = 'psychologist'
                      AND status != 'read') as unread_count
            FROM conversations c
            ORDER BY COALESCE(last_message_at, c.updated_at) DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ConversationSummary {
                id: r.get("id"),
                psychologist_id: r.get("psychologist_id"),
                last_message: r.get("last_message"),
                last_message_at: r.get("last_message_at"),
                unread_count: r.get("unread_count"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{Message, MessageStatus, SenderType};
    use crate::repository::test_helpers;

    #[tokio::test]
    async fn find_or_create_is_idempotent() {
        let repo = test_helpers::test_repository().await;

        let first = repo.find_or_create_conversation(7).await.unwrap();
        let second = repo.find_or_create_conversation(7).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.psychologist_id, 7);

        let other = repo.find_or_create_conversation(8).await.unwrap();
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn get_conversation_by_id_and_psychologist() {
        let repo = test_helpers::test_repository().await;
        let conv = repo.find_or_create_conversation(3).await.unwrap();

        let by_id = repo.get_conversation(conv.id).await.unwrap().unwrap();
        assert_eq!(by_id.psychologist_id, 3);

        let by_psy = repo
            .get_conversation_for_psychologist(3)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_psy.id, conv.id);

        assert!(repo.get_conversation(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn summaries_report_unread_and_last_message() {
        let repo = test_helpers::test_repository().await;
        let conv = repo.find_or_create_conversation(5).await.unwrap();
        let conv_id = conv.id;

        repo.insert_message(&Message::new(conv_id, SenderType::Psychologist, "primeira".into()))
            .await
            .unwrap();
        let second = repo
            .insert_message(&Message::new(conv_id, SenderType::Psychologist, "segunda".into()))
            .await
            .unwrap();
        // Operator's own messages never count as unread
        repo.insert_message(&Message::new(conv_id, SenderType::Admin, "resposta".into()))
            .await
            .unwrap();

        let summaries = repo.list_conversation_summaries().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].psychologist_id, 5);
        assert_eq!(summaries[0].unread_count, 2);
        assert_eq!(summaries[0].last_message.as_deref(), Some("resposta"));

        // Reading clears the count
        repo.mark_conversation_read(conv_id, SenderType::Admin)
            .await
            .unwrap();
        let summaries = repo.list_conversation_summaries().await.unwrap();
        assert_eq!(summaries[0].unread_count, 0);

        let msg = repo
            .get_message_by_id(second.id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.status, MessageStatus::Read);
    }
}
