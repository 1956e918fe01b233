//! Brute-force nearest-neighbour retrieval over one document's corpus.

use std::cmp::Ordering;

use serde::Serialize;

use super::chunker::Chunk;
use super::embedding::{EmbeddingProvider, InputType};
use super::index::Corpus;
use crate::core::errors::ApiError;

#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    /// Position of the chunk in its corpus.
    pub ordinal: usize,
    pub chunk: Chunk,
    pub score: f32,
}

/// Cosine similarity. Zero-length or mismatched vectors score 0.0 instead of NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// Ranks every chunk against `query_vector` and keeps the best `k`.
/// Equal scores keep corpus order.
pub fn rank(corpus: &Corpus, query_vector: &[f32], k: usize) -> Vec<ScoredChunk> {
    let mut scored: Vec<(usize, f32)> = corpus
        .index()
        .vectors()
        .iter()
        .enumerate()
        .map(|(ordinal, vector)| (ordinal, cosine_similarity(query_vector, vector)))
        .collect();

    // stable sort: ties stay in ordinal order
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.truncate(k.min(corpus.len()));

    scored
        .into_iter()
        .map(|(ordinal, score)| ScoredChunk {
            ordinal,
            chunk: corpus.chunks()[ordinal].clone(),
            score,
        })
        .collect()
}

pub struct Retriever<'a> {
    embedder: &'a dyn EmbeddingProvider,
    top_k: usize,
}

impl<'a> Retriever<'a> {
    pub fn new(embedder: &'a dyn EmbeddingProvider, top_k: usize) -> Self {
        Self { embedder, top_k }
    }

    /// Embeds `query` as a search query and ranks the corpus against it.
    pub async fn retrieve(&self, query: &str, corpus: &Corpus) -> Result<Vec<ScoredChunk>, ApiError> {
        if corpus.is_empty() || self.top_k == 0 {
            return Ok(Vec::new());
        }

        let mut vectors = self
            .embedder
            .embed(&[query.to_string()], InputType::SearchQuery)
            .await?;
        let query_vector = vectors
            .pop()
            .ok_or_else(|| ApiError::Upstream("embedding provider returned no query vector".to_string()))?;
        if let Some(dim) = corpus.index().dimension() {
            if dim != query_vector.len() {
                return Err(ApiError::Consistency(format!(
                    "Query embedding has dimension {} but the corpus was built with {}; rebuild the corpus with model {}",
                    query_vector.len(),
                    dim,
                    self.embedder.model()
                )));
            }
        }

        let results = rank(corpus, &query_vector, self.top_k);
        tracing::debug!(
            "Retrieved {} of {} chunks (best score {:?})",
            results.len(),
            corpus.len(),
            results.first().map(|r| r.score)
        );
        Ok(results)
    }
}
