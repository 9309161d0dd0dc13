//! Persistence layer: the `Database` trait and its libSQL backend.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    Database, Direction, FollowUpItem, FollowUpKind, FollowUpStatus, KnowledgeChunk,
    KnowledgeSource, OutgoingLogEntry, OutgoingStatus, RecordedInbound, SourceType, ThreadRollup,
    ThreadUpdate,
};
