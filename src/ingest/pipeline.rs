use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use super::ocr::{OcrPage, OcrProvider};
use crate::core::errors::ApiError;
use crate::rag::{Chunker, Corpus, CorpusCache, CorpusFiles, EmbeddingProvider, PageText, VectorIndex};
use crate::store::{ManualStore, Page, PageImage};

/// Result of an ingestion. Pages are persisted even when the corpus build
/// fails; `corpus_error` then says why and the corpus can be rebuilt later.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub document_id: String,
    pub page_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corpus: Option<CorpusFiles>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corpus_error: Option<String>,
}

#[derive(Clone)]
pub struct IngestService {
    store: Arc<dyn ManualStore>,
    ocr: Arc<dyn OcrProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    corpora: Arc<CorpusCache>,
    chunker: Arc<Chunker>,
    batch_size: usize,
    corpus_root: PathBuf,
}

impl IngestService {
    pub fn new(
        store: Arc<dyn ManualStore>,
        ocr: Arc<dyn OcrProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        corpora: Arc<CorpusCache>,
        chunker: Chunker,
        batch_size: usize,
        corpus_root: PathBuf,
    ) -> Self {
        Self {
            store,
            ocr,
            embedder,
            corpora,
            chunker: Arc::new(chunker),
            batch_size,
            corpus_root,
        }
    }

    /// OCRs the PDF, stores the document with its pages, then builds the corpus.
    pub async fn ingest(&self, pdf_url: &str) -> Result<IngestOutcome, ApiError> {
        let pdf_url = pdf_url.trim();
        if pdf_url.is_empty() {
            return Err(ApiError::BadRequest("pdf_url must not be empty".to_string()));
        }

        tracing::info!("Ingesting {} with {}", pdf_url, self.ocr.model());
        let ocr_pages = self.ocr.process(pdf_url).await?;
        if ocr_pages.is_empty() {
            return Err(ApiError::Upstream(format!("OCR returned no pages for {}", pdf_url)));
        }

        let document = self.store.create_document(pdf_url, self.ocr.model()).await?;
        let pages = to_pages(&document.id, ocr_pages);
        if let Err(err) = self.store.insert_pages(&pages).await {
            // roll back the document row
            if let Err(cleanup) = self.store.delete_document(&document.id).await {
                tracing::error!("Failed to remove document {} after page write error: {}", document.id, cleanup);
            }
            return Err(err);
        }
        tracing::info!("Stored {} pages for document {}", pages.len(), document.id);

        let (corpus, corpus_error) = match self.build_corpus(&document.id, &pages).await {
            Ok(files) => (Some(files), None),
            Err(err) => {
                tracing::error!("Corpus build failed for document {}: {}", document.id, err);
                (None, Some(err.to_string()))
            }
        };

        Ok(IngestOutcome {
            document_id: document.id,
            page_count: pages.len(),
            corpus,
            corpus_error,
        })
    }

    /// Re-chunks and re-embeds the stored pages without running OCR again.
    pub async fn rebuild_corpus(&self, document_id: &str) -> Result<CorpusFiles, ApiError> {
        if self.store.get_document(document_id).await?.is_none() {
            return Err(ApiError::NotFound(format!("Document {} not found", document_id)));
        }
        let pages = self.store.list_pages(document_id).await?;
        if pages.is_empty() {
            return Err(ApiError::Consistency(format!(
                "Document {} has no stored pages to build a corpus from",
                document_id
            )));
        }
        self.build_corpus(document_id, &pages).await
    }

    async fn build_corpus(&self, document_id: &str, pages: &[Page]) -> Result<CorpusFiles, ApiError> {
        let texts: Vec<PageText> = pages.iter().map(PageText::from).collect();
        let chunks = self.chunker.chunk_pages(&texts);
        if chunks.is_empty() {
            return Err(ApiError::Consistency(format!(
                "Document {} produced no chunks",
                document_id
            )));
        }

        let index = VectorIndex::build(self.embedder.as_ref(), &chunks, self.batch_size).await?;
        let corpus = Corpus::new(chunks, index)?;
        let files = corpus
            .save(&self.corpus_root.join(document_id))
            .await?;
        self.store
            .set_corpus_files(document_id, &files.chunks_path, &files.index_path)
            .await?;

        tracing::info!(
            "Built corpus for document {}: {} chunks, dimension {:?}",
            document_id,
            corpus.len(),
            corpus.index().dimension()
        );
        self.corpora.insert(document_id, corpus).await;
        Ok(files)
    }
}

fn to_pages(document_id: &str, ocr_pages: Vec<OcrPage>) -> Vec<Page> {
    ocr_pages
        .into_iter()
        .map(|page| {
            let images = page
                .images
                .into_iter()
                .filter_map(|image| match image.image_base64 {
                    Some(payload) => Some(PageImage {
                        id: image.id,
                        image_base64: payload,
                    }),
                    None => {
                        tracing::warn!("Image {} on page {} has no payload", image.id, page.index + 1);
                        None
                    }
                })
                .collect();
            Page::from_ocr_index(document_id, page.index, page.markdown, images)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ocr::OcrImage;
    use crate::rag::{ChunkerConfig, InputType};
    use crate::store::SqliteManualStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedOcr;

    #[async_trait]
    impl OcrProvider for FixedOcr {
        fn model(&self) -> &str {
            "mistral-ocr-latest"
        }

        async fn process(&self, _document_url: &str) -> Result<Vec<OcrPage>, ApiError> {
            Ok(vec![
                OcrPage {
                    index: 0,
                    markdown: "Read all safety instructions before use.".to_string(),
                    images: Vec::new(),
                },
                OcrPage {
                    index: 1,
                    markdown: "Press power. ![img-0.jpeg](img-0.jpeg)".to_string(),
                    images: vec![
                        OcrImage {
                            id: "img-0.jpeg".to_string(),
                            image_base64: Some("AAA".to_string()),
                        },
                        OcrImage {
                            id: "img-1.jpeg".to_string(),
                            image_base64: None,
                        },
                    ],
                },
            ])
        }
    }

    /// Fails until `healthy` is flipped.
    struct SwitchEmbedder {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl EmbeddingProvider for SwitchEmbedder {
        fn model(&self) -> &str {
            "switch"
        }

        fn max_batch(&self) -> usize {
            2
        }

        async fn embed(&self, texts: &[String], _input_type: InputType) -> Result<Vec<Vec<f32>>, ApiError> {
            if !self.healthy.load(Ordering::SeqCst) {
                return Err(ApiError::Upstream("embedding service unavailable".to_string()));
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    async fn service(healthy: bool) -> (IngestService, Arc<SqliteManualStore>, Arc<SwitchEmbedder>, Arc<CorpusCache>, tempfile::TempDir) {
        let db = std::env::temp_dir().join(format!("manualchat-ingest-test-{}.db", uuid::Uuid::new_v4()));
        let store = Arc::new(SqliteManualStore::with_path(db).await.unwrap());
        let embedder = Arc::new(SwitchEmbedder {
            healthy: AtomicBool::new(healthy),
        });
        let corpora = Arc::new(CorpusCache::new());
        let dir = tempfile::tempdir().unwrap();
        let svc = IngestService::new(
            store.clone(),
            Arc::new(FixedOcr),
            embedder.clone(),
            corpora.clone(),
            Chunker::new(ChunkerConfig::default()),
            96,
            dir.path().to_path_buf(),
        );
        (svc, store, embedder, corpora, dir)
    }

    #[tokio::test]
    async fn ingest_persists_pages_and_builds_corpus() {
        let (svc, store, _embedder, corpora, _dir) = service(true).await;

        let outcome = svc.ingest("https://example.com/manual.pdf").await.unwrap();
        assert_eq!(outcome.page_count, 2);
        assert!(outcome.corpus_error.is_none());

        let files = outcome.corpus.unwrap();
        let loaded = Corpus::load(&files).await.unwrap();
        assert_eq!(loaded.len(), loaded.index().len());

        let document = store.get_document(&outcome.document_id).await.unwrap().unwrap();
        assert!(document.has_corpus());
        assert_eq!(corpora.len().await, 1);

        let pages = store.list_pages(&outcome.document_id).await.unwrap();
        assert_eq!(pages[1].page_number, 2);
        // the image without a payload is dropped
        assert_eq!(pages[1].images.len(), 1);
    }

    #[tokio::test]
    async fn embedding_failure_is_partial_and_rebuild_recovers() {
        let (svc, store, embedder, corpora, _dir) = service(false).await;

        let outcome = svc.ingest("https://example.com/manual.pdf").await.unwrap();
        assert!(outcome.corpus.is_none());
        assert!(outcome.corpus_error.unwrap().contains("unavailable"));
        assert_eq!(store.list_pages(&outcome.document_id).await.unwrap().len(), 2);
        assert_eq!(corpora.len().await, 0);

        embedder.healthy.store(true, Ordering::SeqCst);
        svc.rebuild_corpus(&outcome.document_id).await.unwrap();
        let document = store.get_document(&outcome.document_id).await.unwrap().unwrap();
        assert!(document.has_corpus());
        assert_eq!(corpora.len().await, 1);
    }

    #[tokio::test]
    async fn rebuild_of_unknown_document_is_not_found() {
        let (svc, ..) = service(true).await;
        assert!(matches!(
            svc.rebuild_corpus("missing").await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(svc.ingest("  ").await, Err(ApiError::BadRequest(_))));
    }
}
