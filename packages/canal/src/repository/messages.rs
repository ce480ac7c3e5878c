use anyhow::{Context, Result};
use sqlx::Row;

use crate::models::{Message, SenderType};

use super::ContactRepository;

impl ContactRepository {
    /// Persist a message and return the canonical record with its assigned id.
    pub async fn insert_message(&self, msg: &Message) -> Result<Message> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (conversation_id, sender_type, content, created_at, status)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(msg.conversation_id)
        .bind(msg.sender_type)
        .bind(&msg.content)
        .bind(msg.created_at)
        .bind(msg.status)
        .execute(&self.pool)
        .await
        .context("Failed to insert message")?;

        self.touch_conversation(msg.conversation_id).await?;

        let mut canonical = msg.clone();
        canonical.id = Some(result.last_insert_rowid());
        Ok(canonical)
    }

    /// Get paginated history for a conversation, ordered newest-first in the
    /// query. Returns (messages_oldest_first, has_more).
    pub async fn get_history(
        &self,
        conversation_id: i64,
        before_id: Option<i64>,
        limit: i64,
    ) -> Result<(Vec<Message>, bool)> {
        // Fetch limit+1 to detect whether there are more pages
        let fetch_limit = limit + 1;

        let rows = if let Some(bid) = before_id {
            sqlx::query(
                r#"
                SELECT id, conversation_id, sender_type, content, created_at, status
                FROM messages
                WHERE conversation_id = ? AND id < ?
                ORDER BY id DESC
                LIMIT ?
                "#,
            )
            .bind(conversation_id)
            .bind(bid)
            .bind(fetch_limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                SELECT id, conversation_id, sender_type, content, created_at, status
                FROM messages
                WHERE conversation_id = ?
                ORDER BY id DESC
                LIMIT ?
                "#,
            )
            .bind(conversation_id)
            .bind(fetch_limit)
            .fetch_all(&self.pool)
            .await?
        };

        let has_more = rows.len() as i64 > limit;
        let mut messages: Vec<Message> = rows
            .into_iter()
            .take(limit as usize)
            .map(row_to_message)
            .collect();

        // Reverse so oldest is first (natural reading order)
        messages.reverse();

        Ok((messages, has_more))
    }

    /// Messages newer than `after_id`, oldest first. Used by reconciliation
    /// to pick up anything pushed while the socket was down.
    pub async fn get_messages_after(
        &self,
        conversation_id: i64,
        after_id: i64,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, sender_type, content, created_at, status
            FROM messages
            WHERE conversation_id = ? AND id > ?
            ORDER BY id ASC
            "#,
        )
        .bind(conversation_id)
        .bind(after_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_message).collect())
    }

    pub async fn get_message_by_id(&self, id: i64) -> Result<Option<Message>> {
        let row = sqlx::query(
            r#"
            SELECT id, conversation_id, sender_type, content, created_at, status
            FROM messages
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_message))
    }

    /// Advance one message to `delivered` on behalf of `acker`.
    ///
    /// The WHERE clause is the monotonicity guard: only a `sent` message
    /// authored by the other party can advance, so replayed or out-of-order
    /// acknowledgements fall through as no-ops. Returns the updated message,
    /// or None when nothing changed.
    pub async fn mark_delivered(
        &self,
        message_id: i64,
        acker: SenderType,
    ) -> Result<Option<Message>> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = 'delivered'
            WHERE id = ? AND status = 'sent' AND sender_type != ?
            "#,
        )
        .bind(message_id)
        .bind(acker)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_message_by_id(message_id).await
    }

    /// Advance every message the other party sent in this conversation to
    /// `read`. Returns the ids that actually changed, so the caller can echo
    /// one status update per message to its author.
    pub async fn mark_conversation_read(
        &self,
        conversation_id: i64,
        reader: SenderType,
    ) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM messages
            WHERE conversation_id = ? AND sender_type != ? AND status != 'read'
            ORDER BY id ASC
            "#,
        )
        .bind(conversation_id)
        .bind(reader)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<i64> = rows.into_iter().map(|r| r.get("id")).collect();
        if ids.is_empty() {
            return Ok(ids);
        }

        sqlx::query(
            r#"
            UPDATE messages
            SET status = 'read'
            WHERE conversation_id = ? AND sender_type != ? AND status != 'read'
            "#,
        )
        .bind(conversation_id)
        .bind(reader)
        .execute(&self.pool)
        .await?;

        Ok(ids)
    }
}

fn row_to_message(r: sqlx::sqlite::SqliteRow) -> Message {
    Message {
        id: r.get("id"),
        conversation_id: r.get("conversation_id"),
        sender_type: r.get("sender_type"),
        content: r.get("content"),
        created_at: r.get("created_at"),
        status: r.get("status"),
    }
}
