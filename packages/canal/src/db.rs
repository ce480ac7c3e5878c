use anyhow::{Context, Result};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::config::CanalConfig;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &CanalConfig) -> Result<Self> {
        info!("🗄️  Connecting to database: {}", config.db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect(&config.db_url())
            .await
            .with_context(|| format!("Failed to connect to database: {}", config.db_url()))?;

        info!("Running database migrations...");
        self::run_migrations(&pool).await?;

        // Set pragmas for performance
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA cache_size = -64000") // 64MB cache
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA temp_store = MEMORY")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;

        info!("✅ Database initialized successfully");

        Ok(Self { pool })
    }

    pub async fn get_stats(&self) -> Result<DbStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM conversations) as conversation_count,
                (SELECT COUNT(*) FROM messages) as message_count,
                (SELECT COUNT(*) FROM messages WHERE status != 'read') as unread_count,
                (SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()) as db_size
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DbStats {
            conversations: row.try_get::<i64, _>("conversation_count").unwrap_or(0) as u64,
            messages: row.try_get::<i64, _>("message_count").unwrap_or(0) as u64,
            unread_messages: row.try_get::<i64, _>("unread_count").unwrap_or(0) as u64,
            database_size_bytes: row.try_get::<i64, _>("db_size").unwrap_or(0) as u64,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub conversations: u64,
    pub messages: u64,
    pub unread_messages: u64,
    pub database_size_bytes: u64,
}

/// Current schema version - increment when adding migrations
const SCHEMA_VERSION: i64 = 1;

pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Create schema_version table first (if not exists)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL DEFAULT (unixepoch()),
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Check current schema version
    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    if current_version > SCHEMA_VERSION {
        anyhow::bail!(
            "Database schema version {} is newer than supported version {}. Please upgrade the application.",
            current_version,
            SCHEMA_VERSION
        );
    }

    if current_version == SCHEMA_VERSION {
        info!(
            "Database schema is up to date (version {})",
            current_version
        );
        return Ok(());
    }

    info!(
        "Migrating database from version {} to {}",
        current_version, SCHEMA_VERSION
    );

    // One conversation per psychologist; the operator side is implicit.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            psychologist_id INTEGER NOT NULL UNIQUE,
            created_at INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at INTEGER NOT NULL DEFAULT (unixepoch())
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Message log. Status only ever advances: sent -> delivered -> read.
    // The guarded UPDATEs in the repository rely on the CHECK values here.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            sender_type TEXT NOT NULL CHECK (sender_type IN ('admin', 'psychologist')),
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL DEFAULT (unixepoch()),
            status TEXT NOT NULL DEFAULT 'sent' CHECK (status IN ('sent', 'delivered', 'read'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_unread ON messages(conversation_id, status)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_conv_updated_at ON conversations(updated_at DESC)")
        .execute(pool)
        .await?;

    // Record migration
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO schema_version (version, description)
        VALUES (?, ?)
        "#,
    )
    .bind(SCHEMA_VERSION)
    .bind("initial schema: conversations, messages")
    .execute(pool)
    .await?;

    info!("Database migration complete (version {})", SCHEMA_VERSION);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        SqlitePool::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn run_migrations_from_scratch() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();

        // Tables exist and are queryable
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn run_migrations_idempotent() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn schema_version_recorded() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();

        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn newer_schema_version_rejected() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();

        sqlx::query("INSERT INTO schema_version (version, description) VALUES (?, 'future')")
            .bind(SCHEMA_VERSION + 1)
            .execute(&pool)
            .await
            .unwrap();

        let err = run_migrations(&pool).await.unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }

    #[tokio::test]
    async fn message_status_check_constraint() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();

        sqlx::query("INSERT INTO conversations (psychologist_id) VALUES (1)")
            .execute(&pool)
            .await
            .unwrap();

        let result = sqlx::query(
            "INSERT INTO messages (conversation_id, sender_type, content, status) VALUES (1, 'admin', 'hi', 'seen')",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn one_conversation_per_psychologist() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();

        sqlx::query("INSERT INTO conversations (psychologist_id) VALUES (7)")
            .execute(&pool)
            .await
            .unwrap();
        let dup = sqlx::query("INSERT INTO conversations (psychologist_id) VALUES (7)")
            .execute(&pool)
            .await;
        assert!(dup.is_err());
    }
}
