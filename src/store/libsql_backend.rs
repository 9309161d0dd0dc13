//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. All timestamps are stored
//! as RFC 3339 text, which keeps lexicographic and chronological order
//! aligned for the indexed range queries.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::types::{Channel, InboundMessage};
use crate::store::migrations;
use crate::store::traits::{
    Database, Direction, FollowUpItem, FollowUpKind, FollowUpStatus, KnowledgeChunk,
    KnowledgeSource, OutgoingLogEntry, OutgoingStatus, RecordedInbound, SourceType, ThreadRollup,
    ThreadUpdate,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests and the dev surface).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Escape `%`, `_` and the escape char itself so a search term is matched
/// literally inside a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn parse_channel(s: &str) -> Channel {
    s.parse().unwrap_or(Channel::Whatsapp)
}

// ── Row mappers ─────────────────────────────────────────────────────

const OUTGOING_COLUMNS: &str = "id, business_id, conversation_id, channel, recipient_handle, \
     content, status, reply_to, provider_message_id, error, created_at";

fn row_to_outgoing(row: &libsql::Row) -> Result<OutgoingLogEntry, libsql::Error> {
    let channel_str: String = row.get(3)?;
    let status_str: String = row.get(6)?;
    let created_str: String = row.get(10)?;

    Ok(OutgoingLogEntry {
        id: row.get(0)?,
        business_id: row.get(1)?,
        conversation_id: row.get(2)?,
        channel: parse_channel(&channel_str),
        recipient_handle: row.get(4)?,
        text: row.get(5)?,
        status: status_str.parse().unwrap_or(OutgoingStatus::Failed),
        reply_to: row.get(7).ok(),
        provider_message_id: row.get(8).ok(),
        error: row.get(9).ok(),
        created_at: parse_datetime(&created_str),
    })
}

const CHUNK_COLUMNS: &str =
    "id, source_id, business_id, chunk_index, content, keywords, created_at";

fn row_to_chunk(row: &libsql::Row) -> Result<KnowledgeChunk, libsql::Error> {
    let keywords_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;

    Ok(KnowledgeChunk {
        id: row.get(0)?,
        source_id: row.get(1)?,
        business_id: row.get(2)?,
        chunk_index: row.get::<i64>(3)? as u32,
        content: row.get(4)?,
        keywords: keywords_str
            .split_whitespace()
            .map(str::to_string)
            .collect(),
        created_at: parse_datetime(&created_str),
    })
}

const FOLLOWUP_COLUMNS: &str = "id, business_id, conversation_id, kind, scheduled_for, status, \
     sent_text, detail, created_at, processed_at";

fn row_to_followup(row: &libsql::Row) -> Result<FollowUpItem, libsql::Error> {
    let kind_str: String = row.get(3)?;
    let scheduled_str: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    let created_str: String = row.get(8)?;
    let processed_str: Option<String> = row.get(9).ok();

    Ok(FollowUpItem {
        id: row.get(0)?,
        business_id: row.get(1)?,
        conversation_id: row.get(2)?,
        kind: kind_str.parse().unwrap_or(FollowUpKind::H24),
        scheduled_for: parse_datetime(&scheduled_str),
        status: status_str.parse().unwrap_or(FollowUpStatus::Pending),
        sent_text: row.get(6).ok(),
        detail: row.get(7).ok(),
        created_at: parse_datetime(&created_str),
        processed_at: parse_optional_datetime(&processed_str),
    })
}

fn row_to_thread(row: &libsql::Row) -> Result<ThreadRollup, libsql::Error> {
    let channel_str: String = row.get(2)?;
    let at_str: String = row.get(6)?;
    let direction_str: String = row.get(7)?;

    Ok(ThreadRollup {
        conversation_id: row.get(0)?,
        business_id: row.get(1)?,
        channel: parse_channel(&channel_str),
        sender_handle: row.get(3)?,
        sender_name: row.get(4).ok(),
        last_message_text: row.get(5)?,
        last_message_at: parse_datetime(&at_str),
        last_direction: if direction_str == "outbound" {
            Direction::Outbound
        } else {
            Direction::Inbound
        },
        unread_count: row.get::<i64>(8)? as u32,
        last_intent: row.get(9).ok(),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Conversations ───────────────────────────────────────────────

    async fn record_inbound(&self, msg: &InboundMessage) -> Result<RecordedInbound, DatabaseError> {
        let conn = self.conn();

        // Dedup on the provider message id: webhook retries carry the
        // same id and must not create a second row.
        if let Some(ref provider_id) = msg.metadata.provider_message_id {
            let mut rows = conn
                .query(
                    "SELECT id FROM messages WHERE provider_message_id = ?1",
                    params![provider_id.as_str()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("record_inbound lookup: {e}")))?;

            if let Ok(Some(row)) = rows.next().await {
                let id: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("record_inbound id: {e}")))?;
                debug!(provider_id = %provider_id, "Inbound message already on file");
                return Ok(RecordedInbound {
                    id,
                    duplicate: true,
                });
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO messages (id, business_id, conversation_id, channel, sender_name, \
                 sender_handle, content, provider_message_id, received_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id.as_str(),
                msg.business_id.as_str(),
                msg.conversation_id.as_str(),
                msg.channel.as_str(),
                opt_text(msg.sender_name.as_deref()),
                msg.sender_handle.as_str(),
                msg.message_text.as_str(),
                opt_text(msg.metadata.provider_message_id.as_deref()),
                msg.timestamp.to_rfc3339(),
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("record_inbound: {e}")))?;

        debug!(id = %id, conversation_id = %msg.conversation_id, "Inbound message recorded");
        Ok(RecordedInbound {
            id,
            duplicate: false,
        })
    }

    async fn count_inbound(&self, conversation_id: &str) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_inbound: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count_inbound: {e}")))?;
                Ok(count.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_inbound: {e}"))),
        }
    }

    async fn thread(&self, conversation_id: &str) -> Result<Option<ThreadRollup>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT conversation_id, business_id, channel, sender_handle, sender_name, \
                     last_message_text, last_message_at, last_direction, unread_count, last_intent
                 FROM threads WHERE conversation_id = ?1",
                params![conversation_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("thread: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let thread = row_to_thread(&row)
                    .map_err(|e| DatabaseError::Query(format!("thread row parse: {e}")))?;
                Ok(Some(thread))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("thread: {e}"))),
        }
    }

    async fn update_thread(&self, update: &ThreadUpdate) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let at = update.at.to_rfc3339();

        // Upsert with a monotone guard: last_message_* only moves forward.
        // An out-of-order inbound still bumps the unread counter.
        self.conn()
            .execute(
                "INSERT INTO threads (conversation_id, business_id, channel, sender_handle, \
                     sender_name, last_message_text, last_message_at, last_direction, \
                     unread_count, last_intent, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, \
                     CASE WHEN ?8 = 'inbound' THEN 1 ELSE 0 END, ?9, ?10)
                 ON CONFLICT(conversation_id) DO UPDATE SET
                     sender_name = COALESCE(excluded.sender_name, threads.sender_name),
                     last_message_text = CASE
                         WHEN excluded.last_message_at >= threads.last_message_at
                         THEN excluded.last_message_text ELSE threads.last_message_text END,
                     last_direction = CASE
                         WHEN excluded.last_message_at >= threads.last_message_at
                         THEN excluded.last_direction ELSE threads.last_direction END,
                     last_message_at = MAX(threads.last_message_at, excluded.last_message_at),
                     unread_count = threads.unread_count +
                         CASE WHEN excluded.last_direction = 'inbound' THEN 1 ELSE 0 END,
                     last_intent = COALESCE(excluded.last_intent, threads.last_intent),
                     updated_at = excluded.updated_at",
                params![
                    update.conversation_id.as_str(),
                    update.business_id.as_str(),
                    update.channel.as_str(),
                    update.sender_handle.as_str(),
                    opt_text(update.sender_name.as_deref()),
                    update.text.as_str(),
                    at,
                    update.direction.as_str(),
                    opt_text(update.intent.as_deref()),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_thread: {e}")))?;
        Ok(())
    }

    async fn append_outbound(&self, entry: &OutgoingLogEntry) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO outgoing_log (id, business_id, conversation_id, channel, \
                     recipient_handle, content, status, reply_to, provider_message_id, \
                     error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    entry.id.as_str(),
                    entry.business_id.as_str(),
                    entry.conversation_id.as_str(),
                    entry.channel.as_str(),
                    entry.recipient_handle.as_str(),
                    entry.text.as_str(),
                    entry.status.as_str(),
                    opt_text(entry.reply_to.as_deref()),
                    opt_text(entry.provider_message_id.as_deref()),
                    opt_text(entry.error.as_deref()),
                    entry.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_outbound: {e}")))?;

        debug!(
            id = %entry.id,
            conversation_id = %entry.conversation_id,
            status = entry.status.as_str(),
            "Outbound attempt logged"
        );
        Ok(())
    }

    async fn find_outbound_by_provider_id(
        &self,
        business_id: &str,
        provider_message_id: &str,
    ) -> Result<Option<OutgoingLogEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {OUTGOING_COLUMNS} FROM outgoing_log \
                     WHERE business_id = ?1 AND provider_message_id = ?2 LIMIT 1"
                ),
                params![business_id, provider_message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_outbound_by_provider_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_outgoing(&row).map_err(|e| {
                DatabaseError::Query(format!("outgoing row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!(
                "find_outbound_by_provider_id: {e}"
            ))),
        }
    }

    async fn find_outbound_reply(
        &self,
        business_id: &str,
        conversation_id: &str,
        channel: Channel,
        reply_to: Option<&str>,
        text: &str,
    ) -> Result<Option<OutgoingLogEntry>, DatabaseError> {
        // Failed attempts don't count: a retry after a provider error
        // should go through.
        let mut rows = match reply_to {
            Some(reply_to) => self
                .conn()
                .query(
                    &format!(
                        "SELECT {OUTGOING_COLUMNS} FROM outgoing_log \
                         WHERE business_id = ?1 AND conversation_id = ?2 AND channel = ?3 \
                           AND status IN ('sent', 'mocked') AND reply_to = ?4 LIMIT 1"
                    ),
                    params![business_id, conversation_id, channel.as_str(), reply_to],
                )
                .await,
            None => self
                .conn()
                .query(
                    &format!(
                        "SELECT {OUTGOING_COLUMNS} FROM outgoing_log \
                         WHERE business_id = ?1 AND conversation_id = ?2 AND channel = ?3 \
                           AND status IN ('sent', 'mocked') AND content = ?4 LIMIT 1"
                    ),
                    params![business_id, conversation_id, channel.as_str(), text],
                )
                .await,
        }
        .map_err(|e| DatabaseError::Query(format!("find_outbound_reply: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_outgoing(&row).map_err(|e| {
                DatabaseError::Query(format!("outgoing row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_outbound_reply: {e}"))),
        }
    }

    // ── Knowledge ───────────────────────────────────────────────────

    async fn insert_source(&self, source: &KnowledgeSource) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO knowledge_sources (id, business_id, source_type, title, raw_text, \
                     created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    source.id.as_str(),
                    source.business_id.as_str(),
                    source.source_type.as_str(),
                    opt_text(source.title.as_deref()),
                    source.raw_text.as_str(),
                    source.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_source: {e}")))?;
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[KnowledgeChunk]) -> Result<(), DatabaseError> {
        for chunk in chunks {
            self.conn()
                .execute(
                    "INSERT INTO knowledge_chunks (id, source_id, business_id, chunk_index, \
                         content, keywords, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        chunk.id.as_str(),
                        chunk.source_id.as_str(),
                        chunk.business_id.as_str(),
                        chunk.chunk_index as i64,
                        chunk.content.as_str(),
                        chunk.keywords.join(" "),
                        chunk.created_at.to_rfc3339(),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("insert_chunks: {e}")))?;
        }
        debug!(count = chunks.len(), "Knowledge chunks inserted");
        Ok(())
    }

    async fn search_chunks(
        &self,
        business_id: &str,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<KnowledgeChunk>, DatabaseError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM knowledge_chunks WHERE business_id = ?1 AND ("
        );
        let mut bind: Vec<libsql::Value> =
            vec![libsql::Value::Text(business_id.to_string())];
        for (i, term) in terms.iter().enumerate() {
            if i > 0 {
                sql.push_str(" OR ");
            }
            let n = i + 2;
            sql.push_str(&format!(
                "content LIKE ?{n} ESCAPE '\\' OR keywords LIKE ?{n} ESCAPE '\\'"
            ));
            bind.push(libsql::Value::Text(format!("%{}%", escape_like(term))));
        }
        sql.push_str(&format!(") ORDER BY created_at DESC LIMIT {limit}"));

        let mut rows = self
            .conn()
            .query(&sql, bind)
            .await
            .map_err(|e| DatabaseError::Query(format!("search_chunks: {e}")))?;

        let mut chunks = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            chunks.push(
                row_to_chunk(&row)
                    .map_err(|e| DatabaseError::Query(format!("chunk row parse: {e}")))?,
            );
        }
        Ok(chunks)
    }

    async fn recent_chunks(
        &self,
        business_id: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgeChunk>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CHUNK_COLUMNS} FROM knowledge_chunks WHERE business_id = ?1 \
                     ORDER BY created_at DESC, chunk_index ASC LIMIT {limit}"
                ),
                params![business_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_chunks: {e}")))?;

        let mut chunks = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            chunks.push(
                row_to_chunk(&row)
                    .map_err(|e| DatabaseError::Query(format!("chunk row parse: {e}")))?,
            );
        }
        Ok(chunks)
    }

    async fn has_knowledge(&self, business_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM knowledge_chunks WHERE business_id = ?1 LIMIT 1",
                params![business_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("has_knowledge: {e}")))?;

        match rows.next().await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("has_knowledge: {e}"))),
        }
    }

    async fn delete_knowledge(&self, business_id: &str) -> Result<(u64, u64), DatabaseError> {
        let conn = self.conn();

        // Chunks first so the counts reflect what was actually removed
        // even though the FK cascade would cover them.
        let chunk_count = conn
            .execute(
                "DELETE FROM knowledge_chunks WHERE business_id = ?1",
                params![business_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_knowledge chunks: {e}")))?;

        let source_count = conn
            .execute(
                "DELETE FROM knowledge_sources WHERE business_id = ?1",
                params![business_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_knowledge sources: {e}")))?;

        info!(
            business_id = %business_id,
            sources = source_count,
            chunks = chunk_count,
            "Knowledge base cleared"
        );
        Ok((source_count, chunk_count))
    }

    // ── Follow-up queue ─────────────────────────────────────────────

    async fn insert_followup(&self, item: &FollowUpItem) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO followups (id, business_id, conversation_id, kind, scheduled_for, \
                     status, sent_text, detail, created_at, processed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    item.id.as_str(),
                    item.business_id.as_str(),
                    item.conversation_id.as_str(),
                    item.kind.as_str(),
                    item.scheduled_for.to_rfc3339(),
                    item.status.as_str(),
                    opt_text(item.sent_text.as_deref()),
                    opt_text(item.detail.as_deref()),
                    item.created_at.to_rfc3339(),
                    opt_text(item.processed_at.map(|t| t.to_rfc3339()).as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_followup: {e}")))?;
        Ok(())
    }

    async fn due_followups(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FollowUpItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {FOLLOWUP_COLUMNS} FROM followups \
                     WHERE status = 'pending' AND scheduled_for <= ?1 \
                     ORDER BY scheduled_for ASC LIMIT {limit}"
                ),
                params![now.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("due_followups: {e}")))?;

        let mut items = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            items.push(
                row_to_followup(&row)
                    .map_err(|e| DatabaseError::Query(format!("followup row parse: {e}")))?,
            );
        }
        Ok(items)
    }

    async fn complete_followup(
        &self,
        id: &str,
        status: FollowUpStatus,
        sent_text: Option<&str>,
        detail: Option<&str>,
        processed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        // Guarded by the pending status: a concurrent scheduler run that
        // already transitioned this row leaves it untouched here.
        let affected = self
            .conn()
            .execute(
                "UPDATE followups SET status = ?1, sent_text = ?2, detail = ?3, \
                     processed_at = ?4
                 WHERE id = ?5 AND status = 'pending'",
                params![
                    status.as_str(),
                    opt_text(sent_text),
                    opt_text(detail),
                    processed_at.to_rfc3339(),
                    id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_followup: {e}")))?;

        Ok(affected > 0)
    }

    async fn followup(&self, id: &str) -> Result<Option<FollowUpItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {FOLLOWUP_COLUMNS} FROM followups WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("followup: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_followup(&row).map_err(|e| {
                DatabaseError::Query(format!("followup row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("followup: {e}"))),
        }
    }
}
