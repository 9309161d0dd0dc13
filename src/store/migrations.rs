//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                business_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                sender_name TEXT,
                sender_handle TEXT NOT NULL,
                content TEXT NOT NULL,
                provider_message_id TEXT UNIQUE,
                received_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
            CREATE INDEX IF NOT EXISTS idx_messages_business ON messages(business_id);

            CREATE TABLE IF NOT EXISTS threads (
                conversation_id TEXT PRIMARY KEY,
                business_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                sender_handle TEXT NOT NULL,
                sender_name TEXT,
                last_message_text TEXT NOT NULL,
                last_message_at TEXT NOT NULL,
                last_direction TEXT NOT NULL,
                unread_count INTEGER NOT NULL DEFAULT 0,
                last_intent TEXT,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_threads_business ON threads(business_id);
            CREATE INDEX IF NOT EXISTS idx_threads_last_message_at ON threads(last_message_at);

            CREATE TABLE IF NOT EXISTS outgoing_log (
                id TEXT PRIMARY KEY,
                business_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                recipient_handle TEXT NOT NULL,
                content TEXT NOT NULL,
                status TEXT NOT NULL,
                reply_to TEXT,
                provider_message_id TEXT,
                error TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_outgoing_conversation ON outgoing_log(conversation_id);
            CREATE INDEX IF NOT EXISTS idx_outgoing_provider_id
                ON outgoing_log(business_id, provider_message_id);
            CREATE INDEX IF NOT EXISTS idx_outgoing_reply_to
                ON outgoing_log(business_id, conversation_id, reply_to);
        "#,
    },
    Migration {
        version: 2,
        name: "knowledge_base",
        sql: r#"
            CREATE TABLE IF NOT EXISTS knowledge_sources (
                id TEXT PRIMARY KEY,
                business_id TEXT NOT NULL,
                source_type TEXT NOT NULL,
                title TEXT,
                raw_text TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sources_business ON knowledge_sources(business_id);

            CREATE TABLE IF NOT EXISTS knowledge_chunks (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL REFERENCES knowledge_sources(id) ON DELETE CASCADE,
                business_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                keywords TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_business ON knowledge_chunks(business_id);
            CREATE INDEX IF NOT EXISTS idx_chunks_created ON knowledge_chunks(business_id, created_at);
        "#,
    },
    Migration {
        version: 3,
        name: "followup_queue",
        sql: r#"
            CREATE TABLE IF NOT EXISTS followups (
                id TEXT PRIMARY KEY,
                business_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                scheduled_for TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                sent_text TEXT,
                detail TEXT,
                created_at TEXT NOT NULL,
                processed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_followups_due ON followups(status, scheduled_for);
            CREATE INDEX IF NOT EXISTS idx_followups_conversation ON followups(conversation_id);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(format!("Failed to decode version: {e}"))),
        None => Ok(0),
    }
}

/// Record an applied migration version.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
