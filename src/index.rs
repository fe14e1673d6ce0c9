//! Knowledge index over the SOAP response text
//!
//! The response is written to a scratch file, read back as a document, split
//! into overlapping chunks and embedded. The resulting [`VectorIndex`] answers
//! cosine-similarity queries and can be snapshotted to disk for reuse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::IndexConfig;
use crate::embeddings::Embedder;
use crate::{Result, TravelChatError};

/// Separators tried in order, from paragraph down to single characters
const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub id: usize,
    pub text: String,
    /// Path of the document the chunk came from
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: TextChunk,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    chunk: TextChunk,
    embedding: Vec<f32>,
}

/// In-memory vector index with cosine-similarity search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    embedding_model: String,
    created_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn new(embedding_model: impl Into<String>) -> Self {
        Self {
            embedding_model: embedding_model.into(),
            created_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, chunk: TextChunk, embedding: Vec<f32>) {
        self.entries.push(IndexEntry { chunk, embedding });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Return up to `k` chunks ordered by descending similarity to `query`
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(query, &entry.embedding),
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        scored
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), chunks = self.len(), "Index saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let index: Self = serde_json::from_str(&json)?;
        debug!(
            path = %path.display(),
            chunks = index.len(),
            created_at = %index.created_at,
            "Index loaded"
        );
        Ok(index)
    }
}

/// Cosine similarity; mismatched or zero vectors score 0.0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Recursive character splitter producing overlapping chunks.
///
/// Sizes are measured in characters.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(TravelChatError::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self { chunk_size, chunk_overlap })
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, SEPARATORS)
            .into_iter()
            .map(|chunk| chunk.trim().to_string())
            .filter(|chunk| !chunk.is_empty())
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let remaining = separators.get(position + 1..).unwrap_or(&[]);

        let splits: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        };

        let mut chunks = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        for split in splits {
            if char_len(&split) < self.chunk_size {
                pending.push(split);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge_splits(&pending, separator));
                pending.clear();
            }
            if remaining.is_empty() {
                chunks.push(split);
            } else {
                chunks.extend(self.split_recursive(&split, remaining));
            }
        }
        if !pending.is_empty() {
            chunks.extend(self.merge_splits(&pending, separator));
        }
        chunks
    }

    /// Greedily join small pieces up to `chunk_size`, carrying `chunk_overlap` forward
    fn merge_splits(&self, splits: &[String], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0;

        for split in splits {
            let len = char_len(split);
            let joiner = if current.is_empty() { 0 } else { separator_len };

            if total + len + joiner > self.chunk_size && !current.is_empty() {
                chunks.push(join(&current, separator));

                loop {
                    let joiner = if current.is_empty() { 0 } else { separator_len };
                    let too_big = total + len + joiner > self.chunk_size && total > 0;
                    if total <= self.chunk_overlap && !too_big {
                        break;
                    }
                    let Some(front) = current.pop_front() else { break };
                    let joiner = if current.is_empty() { 0 } else { separator_len };
                    total -= char_len(front) + joiner;
                }
            }

            let joiner = if current.is_empty() { 0 } else { separator_len };
            current.push_back(split);
            total += len + joiner;
        }

        if !current.is_empty() {
            chunks.push(join(&current, separator));
        }
        chunks
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn join(parts: &VecDeque<&str>, separator: &str) -> String {
    parts.iter().copied().collect::<Vec<_>>().join(separator)
}

/// Builds (or reuses) the vector index for a SOAP response
pub struct KnowledgeIndexer {
    embedder: Arc<dyn Embedder>,
    config: IndexConfig,
    splitter: TextSplitter,
}

impl KnowledgeIndexer {
    pub fn new(embedder: Arc<dyn Embedder>, config: IndexConfig) -> Result<Self> {
        let splitter = TextSplitter::new(config.chunk_size, config.chunk_overlap)?;
        Ok(Self { embedder, config, splitter })
    }

    #[instrument(level = "info", skip(self, soap_response), fields(persist = self.config.persist))]
    pub async fn build(&self, soap_response: &str) -> Result<VectorIndex> {
        let snapshot = self.config.snapshot_path();
        if self.config.persist && snapshot.exists() {
            match VectorIndex::load(&snapshot) {
                Ok(index) => {
                    info!(path = %snapshot.display(), "Reusing index...");
                    if index.embedding_model() != self.embedder.model_id() {
                        return Err(TravelChatError::IndexMismatch {
                            expected: self.embedder.model_id().to_string(),
                            found: index.embedding_model().to_string(),
                        });
                    }
                    return Ok(index);
                }
                Err(e) => {
                    warn!(path = %snapshot.display(), error = %e, "Unreadable index snapshot, rebuilding");
                }
            }
        }

        let scratch = &self.config.scratch_file;
        tokio::fs::write(scratch, soap_response).await?;
        debug!(path = %scratch.display(), bytes = soap_response.len(), "Wrote scratch file");

        let document = tokio::fs::read_to_string(scratch).await?;
        let source = scratch.display().to_string();
        let texts = self.splitter.split_text(&document);
        if texts.is_empty() {
            warn!("SOAP response produced no indexable text");
        }

        let embeddings = self.embedder.embed_documents(&texts).await?;
        if embeddings.len() != texts.len() {
            return Err(TravelChatError::Parse(format!(
                "Embedder returned {} vectors for {} chunks",
                embeddings.len(),
                texts.len()
            )));
        }

        let mut index = VectorIndex::new(self.embedder.model_id());
        for (id, (text, embedding)) in texts.into_iter().zip(embeddings).enumerate() {
            index.add(
                TextChunk {
                    id,
                    text,
                    source: source.clone(),
                },
                embedding,
            );
        }
        info!(chunks = index.len(), "Index built");

        if self.config.persist {
            index.save(&snapshot)?;
        }
        Ok(index)
    }
}
