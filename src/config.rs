//! Configuration types.

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Chunk window size in words for knowledge ingestion.
    pub chunk_words: usize,
    /// Overlap in words between consecutive chunks.
    pub chunk_overlap_words: usize,
    /// Default number of chunks returned by retrieval.
    pub retrieve_limit: usize,
    /// Follow-up items processed per scheduler run.
    pub followup_batch_size: usize,
    /// Grace window in hours: an inbound message this close to the
    /// scheduled time cancels the nudge.
    pub followup_grace_hours: i64,
    /// When set, the dispatcher logs sends as `mocked` instead of calling
    /// the channel APIs.
    pub dry_run: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_words: 800,
            chunk_overlap_words: 120,
            retrieve_limit: 4,
            followup_batch_size: 50,
            followup_grace_hours: 24,
            dry_run: false,
        }
    }
}
