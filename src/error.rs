//! Error types for replyflow.

/// Top-level error type for the conversation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Normalization error: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Knowledge error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("Reply error: {0}")]
    Reply(#[from] ReplyError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown business: {0}")]
    UnknownBusiness(String),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Webhook payload normalization errors.
///
/// Raised at the intake boundary before any write happens; the caller
/// answers the webhook with a 400 and performs no side effects.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Invalid {channel} payload: {reason}")]
    InvalidPayload { channel: String, reason: String },
}

/// Knowledge ingestion/retrieval errors.
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("Nothing to ingest: content is empty after normalization")]
    EmptyContent,

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Auto-reply rule engine errors.
#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Outbound dispatch errors.
///
/// These describe why a dispatch attempt failed; the dispatcher folds them
/// into a `Failed` outcome and still writes a log row, so callers rarely
/// see them raw.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Message has no recipient handle")]
    MissingRecipient,

    #[error("Missing {channel} credentials for business {business_id}")]
    MissingCredentials {
        channel: String,
        business_id: String,
    },

    #[error("{channel} send failed: {reason}")]
    Provider { channel: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// A failure on a best-effort side path (thread-rollup writes).
///
/// Deliberately not part of `Error`: callers log it and move on. Typing it
/// (rather than a silent catch) lets tests assert the write was attempted.
#[derive(Debug, thiserror::Error)]
#[error("Non-fatal: {context}: {reason}")]
pub struct NonFatalError {
    pub context: String,
    pub reason: String,
}

impl NonFatalError {
    pub fn new(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
