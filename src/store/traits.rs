//! Unified `Database` trait: single async interface for all persistence.
//!
//! Covers the three repository concerns the pipeline depends on
//! (conversations + outbound log, knowledge, follow-up queue) as one
//! trait so a single backend can satisfy all of them. The concrete store
//! is an external collaborator from the pipeline's point of view; the
//! bundled libsql backend exists for the dev surface and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::pipeline::types::{Channel, InboundMessage};

// ── Conversations ───────────────────────────────────────────────────

/// Message direction on a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Result of recording an inbound message.
#[derive(Debug, Clone)]
pub struct RecordedInbound {
    /// Row id (new or pre-existing).
    pub id: String,
    /// True when the provider message id was already on file, meaning a webhook
    /// redelivery, not a new message.
    pub duplicate: bool,
}

/// Per-conversation rollup consumed by the CRM inbox and the scheduler's
/// re-engagement check.
#[derive(Debug, Clone)]
pub struct ThreadRollup {
    pub conversation_id: String,
    pub business_id: String,
    pub channel: Channel,
    pub sender_handle: String,
    pub sender_name: Option<String>,
    pub last_message_text: String,
    pub last_message_at: DateTime<Utc>,
    pub last_direction: Direction,
    pub unread_count: u32,
    pub last_intent: Option<String>,
}

/// One thread-rollup mutation (inbound recording or outbound dispatch).
#[derive(Debug, Clone)]
pub struct ThreadUpdate {
    pub conversation_id: String,
    pub business_id: String,
    pub channel: Channel,
    pub sender_handle: String,
    pub sender_name: Option<String>,
    pub text: String,
    pub at: DateTime<Utc>,
    pub direction: Direction,
    pub intent: Option<String>,
}

/// Outcome status of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingStatus {
    /// Dry run; nothing was sent.
    Mocked,
    Sent,
    Failed,
}

impl OutgoingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutgoingStatus::Mocked => "mocked",
            OutgoingStatus::Sent => "sent",
            OutgoingStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for OutgoingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mocked" => Ok(OutgoingStatus::Mocked),
            "sent" => Ok(OutgoingStatus::Sent),
            "failed" => Ok(OutgoingStatus::Failed),
            other => Err(format!("unknown outgoing status: {other}")),
        }
    }
}

/// One dispatch attempt, successful or not. Append-only: idempotency is
/// achieved by checking before inserting, never by updating.
#[derive(Debug, Clone)]
pub struct OutgoingLogEntry {
    pub id: String,
    pub business_id: String,
    pub conversation_id: String,
    pub channel: Channel,
    pub recipient_handle: String,
    pub text: String,
    pub status: OutgoingStatus,
    /// Provider id of the inbound message this replies to.
    pub reply_to: Option<String>,
    /// Provider id the channel assigned to our outbound message.
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Knowledge ───────────────────────────────────────────────────────

/// Origin of an ingested knowledge unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Url,
    Text,
    Document,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Url => "url",
            SourceType::Text => "text",
            SourceType::Document => "document",
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "url" => Ok(SourceType::Url),
            "text" => Ok(SourceType::Text),
            "document" => Ok(SourceType::Document),
            other => Err(format!("unknown source type: {other}")),
        }
    }
}

/// One ingested knowledge unit.
#[derive(Debug, Clone)]
pub struct KnowledgeSource {
    pub id: String,
    pub business_id: String,
    pub source_type: SourceType,
    pub title: Option<String>,
    pub raw_text: String,
    pub created_at: DateTime<Utc>,
}

/// A bounded slice of a source's text, the retrieval unit.
#[derive(Debug, Clone)]
pub struct KnowledgeChunk {
    pub id: String,
    pub source_id: String,
    pub business_id: String,
    pub chunk_index: u32,
    pub content: String,
    /// Stopword-filtered, lowercased, deduplicated.
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ── Follow-ups ──────────────────────────────────────────────────────

/// Delay class of a nurture nudge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUpKind {
    H24,
    H48,
    D5,
    D7,
}

impl FollowUpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowUpKind::H24 => "24h",
            FollowUpKind::H48 => "48h",
            FollowUpKind::D5 => "5d",
            FollowUpKind::D7 => "7d",
        }
    }
}

impl std::str::FromStr for FollowUpKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24h" => Ok(FollowUpKind::H24),
            "48h" => Ok(FollowUpKind::H48),
            "5d" => Ok(FollowUpKind::D5),
            "7d" => Ok(FollowUpKind::D7),
            other => Err(format!("unknown follow-up kind: {other}")),
        }
    }
}

/// Follow-up item status. `Sent`, `Cancelled`, and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUpStatus {
    Pending,
    Sent,
    Cancelled,
    Failed,
}

impl FollowUpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowUpStatus::Pending => "pending",
            FollowUpStatus::Sent => "sent",
            FollowUpStatus::Cancelled => "cancelled",
            FollowUpStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for FollowUpStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FollowUpStatus::Pending),
            "sent" => Ok(FollowUpStatus::Sent),
            "cancelled" => Ok(FollowUpStatus::Cancelled),
            "failed" => Ok(FollowUpStatus::Failed),
            other => Err(format!("unknown follow-up status: {other}")),
        }
    }
}

/// One scheduled nurture nudge.
#[derive(Debug, Clone)]
pub struct FollowUpItem {
    pub id: String,
    pub business_id: String,
    pub conversation_id: String,
    pub kind: FollowUpKind,
    pub scheduled_for: DateTime<Utc>,
    pub status: FollowUpStatus,
    /// Literal text sent, recorded on success.
    pub sent_text: Option<String>,
    /// Cancellation/failure reason.
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

// ── Trait ───────────────────────────────────────────────────────────

/// Backend-agnostic database trait covering conversations, knowledge,
/// and the follow-up queue.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Conversations ───────────────────────────────────────────────

    /// Record an inbound message, deduplicating on its provider message
    /// id. Returns the row id and whether it was already on file.
    async fn record_inbound(&self, msg: &InboundMessage) -> Result<RecordedInbound, DatabaseError>;

    /// Count inbound messages recorded for a conversation.
    async fn count_inbound(&self, conversation_id: &str) -> Result<u64, DatabaseError>;

    /// Load a conversation's rollup, if any.
    async fn thread(&self, conversation_id: &str) -> Result<Option<ThreadRollup>, DatabaseError>;

    /// Upsert the conversation rollup. `last_message_at` never moves
    /// backwards: an update older than the stored timestamp only bumps
    /// the unread counter.
    async fn update_thread(&self, update: &ThreadUpdate) -> Result<(), DatabaseError>;

    /// Append one dispatch attempt to the outbound log.
    async fn append_outbound(&self, entry: &OutgoingLogEntry) -> Result<(), DatabaseError>;

    /// Find an outbound log entry whose provider message id matches:
    /// the echo check for loop prevention.
    async fn find_outbound_by_provider_id(
        &self,
        business_id: &str,
        provider_message_id: &str,
    ) -> Result<Option<OutgoingLogEntry>, DatabaseError>;

    /// Find a prior non-failed outbound entry for this conversation that
    /// answers the same inbound message (`reply_to`) or, when no reply-to
    /// id is available, carries the exact same text: the dispatch
    /// idempotency gate.
    async fn find_outbound_reply(
        &self,
        business_id: &str,
        conversation_id: &str,
        channel: Channel,
        reply_to: Option<&str>,
        text: &str,
    ) -> Result<Option<OutgoingLogEntry>, DatabaseError>;

    // ── Knowledge ───────────────────────────────────────────────────

    /// Insert one knowledge source row.
    async fn insert_source(&self, source: &KnowledgeSource) -> Result<(), DatabaseError>;

    /// Insert a source's chunk batch.
    async fn insert_chunks(&self, chunks: &[KnowledgeChunk]) -> Result<(), DatabaseError>;

    /// Indexed candidate search: chunks whose content or keyword bag
    /// contains any of `terms`, newest first, up to `limit`.
    async fn search_chunks(
        &self,
        business_id: &str,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<KnowledgeChunk>, DatabaseError>;

    /// Most recently ingested chunks for a business.
    async fn recent_chunks(
        &self,
        business_id: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgeChunk>, DatabaseError>;

    /// Whether the business has any knowledge chunks at all.
    async fn has_knowledge(&self, business_id: &str) -> Result<bool, DatabaseError>;

    /// Delete all knowledge for a business, chunks before sources.
    /// Returns `(source_count, chunk_count)` deleted.
    async fn delete_knowledge(&self, business_id: &str) -> Result<(u64, u64), DatabaseError>;

    // ── Follow-up queue ─────────────────────────────────────────────

    /// Enqueue a nudge (called by the external nurture trigger and tests).
    async fn insert_followup(&self, item: &FollowUpItem) -> Result<(), DatabaseError>;

    /// Pending items due at or before `now`, ascending, up to `limit`.
    async fn due_followups(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FollowUpItem>, DatabaseError>;

    /// Transition one item out of `pending` into a terminal state.
    /// Guarded by the current status: returns `false` when the item was
    /// no longer pending (someone else got there first), and the row is
    /// left untouched.
    async fn complete_followup(
        &self,
        id: &str,
        status: FollowUpStatus,
        sent_text: Option<&str>,
        detail: Option<&str>,
        processed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Load one follow-up item (test/observability helper).
    async fn followup(&self, id: &str) -> Result<Option<FollowUpItem>, DatabaseError>;
}
