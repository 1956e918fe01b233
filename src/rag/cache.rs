use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::index::{Corpus, CorpusFiles};
use crate::core::errors::ApiError;
use crate::store::Document;

/// Per-document corpus handles. Loaded on first use, replaced on rebuild,
/// evicted when the document goes away.
#[derive(Default)]
pub struct CorpusCache {
    entries: RwLock<HashMap<String, Arc<Corpus>>>,
}

impl CorpusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_load(&self, document: &Document) -> Result<Arc<Corpus>, ApiError> {
        if let Some(corpus) = self.entries.read().await.get(&document.id) {
            return Ok(corpus.clone());
        }

        let (Some(chunks_path), Some(index_path)) =
            (document.chunks_path.clone(), document.index_path.clone())
        else {
            return Err(ApiError::Consistency(format!(
                "Document {} has no chunk corpus; rebuild it first",
                document.id
            )));
        };

        let corpus = Arc::new(
            Corpus::load(&CorpusFiles {
                chunks_path,
                index_path,
            })
            .await?,
        );
        tracing::info!(
            "Loaded corpus for document {} ({} chunks)",
            document.id,
            corpus.len()
        );

        let mut entries = self.entries.write().await;
        Ok(entries
            .entry(document.id.clone())
            .or_insert(corpus)
            .clone())
    }

    pub async fn insert(&self, document_id: &str, corpus: Corpus) -> Arc<Corpus> {
        let corpus = Arc::new(corpus);
        self.entries
            .write()
            .await
            .insert(document_id.to_string(), corpus.clone());
        corpus
    }

    pub async fn evict(&self, document_id: &str) -> bool {
        self.entries.write().await.remove(document_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
