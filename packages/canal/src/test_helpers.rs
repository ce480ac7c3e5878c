use std::sync::Arc;

use crate::AppState;
use crate::config::{ServerConfig, ServerFileConfig};
use crate::db::Database;
use crate::metrics::ServerMetrics;
use crate::repository::ContactRepository;
use crate::ws::SessionRegistry;

/// Build a fully-wired `AppState` backed by an in-memory SQLite database.
/// Suitable for handler and relay tests that exercise real SQL without I/O.
pub async fn test_app_state() -> AppState {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    crate::db::run_migrations(&pool).await.expect("migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("pragma");

    AppState {
        db: Arc::new(Database { pool: pool.clone() }),
        repository: Arc::new(ContactRepository::new(pool)),
        registry: SessionRegistry::new(),
        metrics: Arc::new(ServerMetrics::new()),
        server_config: Arc::new(ServerConfig::from_file(&ServerFileConfig::default())),
    }
}
