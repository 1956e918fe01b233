//! Ordinal vector index and the per-document corpus it belongs to.
//!
//! Vector `i` always belongs to chunk `i`. The persisted form is a JSON object
//! keyed `"0".."n-1"`; anything else is rejected on load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::chunker::Chunk;
use super::embedding::{EmbeddingProvider, InputType};
use crate::core::errors::ApiError;

pub const CHUNKS_FILE: &str = "chunks.json";
pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VectorIndex {
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    pub fn from_vectors(vectors: Vec<Vec<f32>>) -> Result<Self, ApiError> {
        if let Some(first) = vectors.first() {
            let dim = first.len();
            if let Some(pos) = vectors.iter().position(|v| v.len() != dim) {
                return Err(ApiError::Consistency(format!(
                    "embedding {} has dimension {}, expected {}",
                    pos,
                    vectors[pos].len(),
                    dim
                )));
            }
        }
        Ok(Self { vectors })
    }

    /// Embeds every chunk as a corpus document, `batch_size` texts per call.
    /// Batches are concatenated in order.
    pub async fn build(
        provider: &dyn EmbeddingProvider,
        chunks: &[Chunk],
        batch_size: usize,
    ) -> Result<Self, ApiError> {
        let batch_size = batch_size.min(provider.max_batch()).max(1);
        let texts: Vec<String> = chunks.iter().map(Chunk::embedding_text).collect();

        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_no, batch) in texts.chunks(batch_size).enumerate() {
            let embedded = provider.embed(batch, InputType::SearchDocument).await?;
            if embedded.len() != batch.len() {
                return Err(ApiError::Upstream(format!(
                    "embedding batch {} returned {} vectors for {} texts",
                    batch_no,
                    embedded.len(),
                    batch.len()
                )));
            }
            tracing::debug!("Embedded batch {} ({} texts)", batch_no, batch.len());
            vectors.extend(embedded);
        }

        Self::from_vectors(vectors)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.vectors.first().map(Vec::len)
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), Value::from(v.clone())))
            .collect();
        Value::Object(map)
    }

    pub fn from_json(value: Value) -> Result<Self, ApiError> {
        let keyed: HashMap<String, Vec<f32>> = serde_json::from_value(value)
            .map_err(|err| ApiError::Consistency(format!("malformed vector index: {}", err)))?;

        let count = keyed.len();
        let mut slots: Vec<Option<Vec<f32>>> = vec![None; count];
        for (key, vector) in keyed {
            let idx: usize = key
                .parse()
                .ok()
                .filter(|idx| *idx < count)
                .ok_or_else(|| {
                    ApiError::Consistency(format!(
                        "vector index key '{}' is not an ordinal below {}",
                        key, count
                    ))
                })?;
            slots[idx] = Some(vector);
        }

        let vectors = slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| {
                    ApiError::Consistency(format!("vector index is missing key '{}'", i))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_vectors(vectors)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ApiError> {
        let body = serde_json::to_vec(&self.to_json()).map_err(ApiError::internal)?;
        tokio::fs::write(path, body).await.map_err(ApiError::internal)
    }

    pub async fn load(path: &Path) -> Result<Self, ApiError> {
        let raw = tokio::fs::read(path).await.map_err(|err| {
            ApiError::Consistency(format!("cannot read index {}: {}", path.display(), err))
        })?;
        let value: Value = serde_json::from_slice(&raw)
            .map_err(|err| ApiError::Consistency(format!("malformed vector index: {}", err)))?;
        Self::from_json(value)
    }
}

/// Where a document's corpus was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusFiles {
    pub chunks_path: String,
    pub index_path: String,
}

/// Chunks and their embeddings. Only constructible when the two line up.
#[derive(Debug, Clone)]
pub struct Corpus {
    chunks: Vec<Chunk>,
    index: VectorIndex,
}

impl Corpus {
    pub fn new(chunks: Vec<Chunk>, index: VectorIndex) -> Result<Self, ApiError> {
        if chunks.len() != index.len() {
            return Err(ApiError::Consistency(format!(
                "corpus has {} chunks but {} embeddings",
                chunks.len(),
                index.len()
            )));
        }
        Ok(Self { chunks, index })
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub async fn save(&self, dir: &Path) -> Result<CorpusFiles, ApiError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(ApiError::internal)?;

        let chunks_path: PathBuf = dir.join(CHUNKS_FILE);
        let index_path: PathBuf = dir.join(INDEX_FILE);

        let chunks_body = serde_json::to_vec_pretty(&self.chunks).map_err(ApiError::internal)?;
        tokio::fs::write(&chunks_path, chunks_body)
            .await
            .map_err(ApiError::internal)?;
        self.index.save(&index_path).await?;

        Ok(CorpusFiles {
            chunks_path: chunks_path.to_string_lossy().to_string(),
            index_path: index_path.to_string_lossy().to_string(),
        })
    }

    pub async fn load(files: &CorpusFiles) -> Result<Self, ApiError> {
        let chunks_path = Path::new(&files.chunks_path);
        let raw = tokio::fs::read(chunks_path).await.map_err(|err| {
            ApiError::Consistency(format!(
                "cannot read chunks {}: {}",
                chunks_path.display(),
                err
            ))
        })?;
        let chunks: Vec<Chunk> = serde_json::from_slice(&raw)
            .map_err(|err| ApiError::Consistency(format!("malformed chunk corpus: {}", err)))?;
        let index = VectorIndex::load(Path::new(&files.index_path)).await?;
        Self::new(chunks, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Embeds `c<n>` as `[n, 1.0]` and records batch sizes.
    struct OrdinalEmbedder {
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EmbeddingProvider for OrdinalEmbedder {
        fn model(&self) -> &str {
            "ordinal"
        }

        fn max_batch(&self) -> usize {
            96
        }

        async fn embed(
            &self,
            texts: &[String],
            input_type: InputType,
        ) -> Result<Vec<Vec<f32>>, ApiError> {
            assert_eq!(input_type, InputType::SearchDocument);
            self.batches.lock().unwrap().push(texts.len());
            Ok(texts
                .iter()
                .map(|t| {
                    let n: f32 = t.rsplit('c').next().unwrap().parse().unwrap();
                    vec![n, 1.0]
                })
                .collect())
        }
    }

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| Chunk {
                title: "Page 1".to_string(),
                snippet: format!("c{}", i),
                page_number: Some(1),
                page_image: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn build_batches_without_reordering() {
        let embedder = OrdinalEmbedder {
            batches: Mutex::new(Vec::new()),
        };
        let index = VectorIndex::build(&embedder, &chunks(10), 4).await.unwrap();

        assert_eq!(*embedder.batches.lock().unwrap(), vec![4, 4, 2]);
        assert_eq!(index.len(), 10);
        for (i, v) in index.vectors().iter().enumerate() {
            assert_eq!(v[0], i as f32);
        }
    }

    #[tokio::test]
    async fn build_caps_batch_at_provider_limit() {
        let embedder = OrdinalEmbedder {
            batches: Mutex::new(Vec::new()),
        };
        VectorIndex::build(&embedder, &chunks(200), 500).await.unwrap();
        assert_eq!(*embedder.batches.lock().unwrap(), vec![96, 96, 8]);
    }

    #[test]
    fn json_form_is_keyed_by_ordinal() {
        let index = VectorIndex::from_vectors(vec![vec![0.5, -1.0]; 12]).unwrap();
        let value = index.to_json();
        assert!(value.get("11").is_some());
        assert_eq!(VectorIndex::from_json(value).unwrap(), index);
    }

    #[test]
    fn gaps_and_stray_keys_are_consistency_errors() {
        let gap = json!({ "0": [1.0], "2": [1.0] });
        assert!(matches!(
            VectorIndex::from_json(gap),
            Err(ApiError::Consistency(_))
        ));
        let stray = json!({ "0": [1.0], "first": [1.0] });
        assert!(matches!(
            VectorIndex::from_json(stray),
            Err(ApiError::Consistency(_))
        ));
    }

    #[test]
    fn mixed_dimensions_are_rejected() {
        let err = VectorIndex::from_vectors(vec![vec![1.0, 2.0], vec![1.0]]).unwrap_err();
        assert!(matches!(err, ApiError::Consistency(_)));
    }

    #[test]
    fn corpus_refuses_length_mismatch() {
        let index = VectorIndex::from_vectors(vec![vec![1.0]; 2]).unwrap();
        let err = Corpus::new(chunks(3), index).unwrap_err();
        assert!(matches!(err, ApiError::Consistency(_)));
    }

    #[tokio::test]
    async fn corpus_save_then_load_preserves_vectors_bit_for_bit() {
        let dir = tempfile::tempdir().unwrap();
        let vectors: Vec<Vec<f32>> = (0..5)
            .map(|i| vec![i as f32 * 0.1, std::f32::consts::PI / (i as f32 + 1.0)])
            .collect();
        let corpus = Corpus::new(
            chunks(5),
            VectorIndex::from_vectors(vectors.clone()).unwrap(),
        )
        .unwrap();

        let files = corpus.save(dir.path()).await.unwrap();
        let loaded = Corpus::load(&files).await.unwrap();

        assert_eq!(loaded.chunks(), corpus.chunks());
        for (a, b) in loaded.index().vectors().iter().zip(vectors.iter()) {
            let a_bits: Vec<u32> = a.iter().map(|x| x.to_bits()).collect();
            let b_bits: Vec<u32> = b.iter().map(|x| x.to_bits()).collect();
            assert_eq!(a_bits, b_bits);
        }
    }

    #[tokio::test]
    async fn loading_diverging_files_surfaces_consistency_error() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = Corpus::new(
            chunks(3),
            VectorIndex::from_vectors(vec![vec![1.0]; 3]).unwrap(),
        )
        .unwrap();
        let files = corpus.save(dir.path()).await.unwrap();

        VectorIndex::from_vectors(vec![vec![1.0]; 2])
            .unwrap()
            .save(Path::new(&files.index_path))
            .await
            .unwrap();

        let err = Corpus::load(&files).await.unwrap_err();
        assert!(matches!(err, ApiError::Consistency(_)));
    }
}
