//! Business knowledge base: chunked-text ingestion and keyword retrieval.
//!
//! Retrieval is deliberately non-semantic: chunks are ranked by keyword
//! overlap, so a query term present verbatim in a chunk always outranks a
//! chunk with no overlap at all. No embeddings, no external calls.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::KnowledgeError;
use crate::store::{Database, KnowledgeChunk, KnowledgeSource, SourceType};

/// Combined English + Spanish stopword list for keyword extraction.
/// Language-agnostic on purpose: ingested text and queries mix both.
const STOPWORDS: &[&str] = &[
    // English
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "does", "for", "from",
    "has", "have", "how", "i", "if", "in", "is", "it", "its", "me", "my", "no", "not", "of",
    "on", "or", "our", "so", "that", "the", "their", "them", "there", "they", "this", "to",
    "was", "we", "what", "when", "where", "which", "who", "will", "with", "you", "your",
    // Spanish
    "al", "como", "con", "de", "del", "el", "ella", "en", "es", "esta", "este", "esto", "la",
    "las", "le", "lo", "los", "mas", "mi", "muy", "nos", "o", "para", "pero", "por", "que",
    "se", "si", "sin", "son", "su", "sus", "te", "tu", "un", "una", "unas", "unos", "y", "ya",
];

/// Receipt for one ingestion.
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub source_id: String,
    pub chunk_count: usize,
}

/// Receipt for a knowledge-base clear.
#[derive(Debug, Clone)]
pub struct ClearReceipt {
    pub source_count: u64,
    pub chunk_count: u64,
}

/// Collapse all whitespace runs to single spaces and trim.
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercased, punctuation-stripped, stopword-filtered, deduplicated
/// keyword bag. Order of first occurrence is preserved.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    for raw in text.split_whitespace() {
        let word: String = raw
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        if word.len() < 3 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if seen.insert(word.clone()) {
            keywords.push(word);
        }
    }
    keywords
}

/// Split into overlapping word windows so boundary information is not
/// lost mid-sentence.
fn chunk_text(text: &str, window: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let step = window.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + window).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Fraction of query keywords present in the chunk (0..1).
fn overlap_score(chunk: &KnowledgeChunk, query_keywords: &[String]) -> f64 {
    if query_keywords.is_empty() {
        return 0.0;
    }
    let content_lower = chunk.content.to_lowercase();
    let matching = query_keywords
        .iter()
        .filter(|kw| chunk.keywords.iter().any(|k| k == *kw) || content_lower.contains(kw.as_str()))
        .count();
    matching as f64 / query_keywords.len() as f64
}

/// Knowledge ingestion and retrieval over the `Database` trait.
pub struct KnowledgeService {
    store: Arc<dyn Database>,
    config: PipelineConfig,
}

impl KnowledgeService {
    pub fn new(store: Arc<dyn Database>, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Ingest one source: normalize, chunk, annotate, persist.
    pub async fn ingest(
        &self,
        business_id: &str,
        source_type: SourceType,
        title: Option<&str>,
        raw_text: &str,
    ) -> Result<IngestReceipt, KnowledgeError> {
        let normalized = normalize_whitespace(raw_text);
        if normalized.is_empty() {
            return Err(KnowledgeError::EmptyContent);
        }

        let now = Utc::now();
        let source = KnowledgeSource {
            id: Uuid::new_v4().to_string(),
            business_id: business_id.to_string(),
            source_type,
            title: title.map(str::to_string),
            raw_text: normalized.clone(),
            created_at: now,
        };
        self.store.insert_source(&source).await?;

        let chunks: Vec<KnowledgeChunk> =
            chunk_text(&normalized, self.config.chunk_words, self.config.chunk_overlap_words)
                .into_iter()
                .enumerate()
                .map(|(i, content)| KnowledgeChunk {
                    id: Uuid::new_v4().to_string(),
                    source_id: source.id.clone(),
                    business_id: business_id.to_string(),
                    chunk_index: i as u32,
                    keywords: extract_keywords(&content),
                    content,
                    created_at: now,
                })
                .collect();
        self.store.insert_chunks(&chunks).await?;

        info!(
            business_id = %business_id,
            source_id = %source.id,
            chunks = chunks.len(),
            "Knowledge source ingested"
        );
        Ok(IngestReceipt {
            source_id: source.id,
            chunk_count: chunks.len(),
        })
    }

    /// Replace the whole knowledge base: clear, then ingest.
    ///
    /// Not atomic; there is a visible window where the base is empty.
    pub async fn replace(
        &self,
        business_id: &str,
        source_type: SourceType,
        title: Option<&str>,
        raw_text: &str,
    ) -> Result<IngestReceipt, KnowledgeError> {
        self.clear(business_id).await?;
        self.ingest(business_id, source_type, title, raw_text).await
    }

    /// Retrieve the `limit` best-matching chunks for a query.
    pub async fn retrieve(
        &self,
        business_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgeChunk>, KnowledgeError> {
        let mut query_keywords = extract_keywords(query);
        if query_keywords.is_empty() {
            // Nothing survived the stopword filter; fall back to the raw
            // terms so short queries still match something.
            query_keywords = query
                .split_whitespace()
                .take(5)
                .map(|w| w.to_lowercase())
                .collect();
        }
        if query_keywords.is_empty() {
            return Ok(Vec::new());
        }

        let candidate_limit = (limit * 3).max(12);
        let mut candidates = self
            .store
            .search_chunks(business_id, &query_keywords, candidate_limit)
            .await?;

        // Recency fallback: when some content exists but the text search
        // found nothing, answer from the newest chunks rather than
        // silently returning empty.
        if candidates.is_empty() {
            candidates = self.store.recent_chunks(business_id, candidate_limit).await?;
            debug!(
                business_id = %business_id,
                fallback = candidates.len(),
                "No search candidates; using recency fallback"
            );
        }

        let mut scored: Vec<(f64, KnowledgeChunk)> = candidates
            .into_iter()
            .map(|c| (overlap_score(&c, &query_keywords), c))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored.into_iter().map(|(_, c)| c).collect())
    }

    /// Whether the business has any knowledge base at all. Distinguishes
    /// "not configured" from "configured but nothing matched".
    pub async fn has_content(&self, business_id: &str) -> Result<bool, KnowledgeError> {
        Ok(self.store.has_knowledge(business_id).await?)
    }

    /// Delete all sources and chunks for a business.
    pub async fn clear(&self, business_id: &str) -> Result<ClearReceipt, KnowledgeError> {
        let (source_count, chunk_count) = self.store.delete_knowledge(business_id).await?;
        Ok(ClearReceipt {
            source_count,
            chunk_count,
        })
    }
}
