use std::sync::Arc;

use crate::chat::ChatService;
use crate::core::config::{AppPaths, ConfigService, PipelineSettings};
use crate::ingest::{IngestService, MistralOcr, OcrProvider};
use crate::llm::{resolve, AnswerStreamer};
use crate::rag::{Chunker, ChunkerConfig, CohereEmbedder, CorpusCache, EmbeddingProvider};
use crate::store::{ManualStore, SqliteManualStore};

pub mod error;

use error::InitializationError;

/// Shared application state handed to every route and socket.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub settings: PipelineSettings,
    pub store: Arc<dyn ManualStore>,
    pub corpora: Arc<CorpusCache>,
    pub chat: ChatService,
    pub ingest: IngestService,
}

/// External services the state is assembled from.
pub struct Collaborators {
    pub store: Arc<dyn ManualStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub ocr: Arc<dyn OcrProvider>,
    pub streamer: AnswerStreamer,
}

impl AppState {
    /// Loads configuration from the default paths, opens the database and
    /// wires the hosted OCR, embedding and completion clients.
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let merged = config
            .load_config()
            .map_err(|e| InitializationError::Config(e.into()))?;
        let settings = PipelineSettings::from_config(&merged);
        resolve(&settings.llm.default_model).map_err(|e| InitializationError::Model(e.into()))?;

        let store = SqliteManualStore::new(&paths)
            .await
            .map_err(|e| InitializationError::Store(e.into()))?;

        let collaborators = Collaborators {
            store: Arc::new(store),
            embedder: Arc::new(CohereEmbedder::new(&settings.embedding)),
            ocr: Arc::new(MistralOcr::new(&settings.ocr)),
            streamer: AnswerStreamer::from_settings(&settings.llm, &settings.providers),
        };

        for (provider, credentials) in [
            ("OpenAI", &settings.providers.openai),
            ("Anthropic", &settings.providers.anthropic),
            ("Google", &settings.providers.google),
        ] {
            if credentials.api_key.is_none() {
                tracing::warn!("No {} API key configured; its models will fail to answer", provider);
            }
        }

        Ok(Arc::new(Self::assemble(paths, config, settings, collaborators)))
    }

    pub fn assemble(
        paths: Arc<AppPaths>,
        config: ConfigService,
        settings: PipelineSettings,
        collaborators: Collaborators,
    ) -> Self {
        let Collaborators {
            store,
            embedder,
            ocr,
            streamer,
        } = collaborators;
        let corpora = Arc::new(CorpusCache::new());

        let chat = ChatService::new(
            store.clone(),
            embedder.clone(),
            corpora.clone(),
            streamer,
            &settings,
        );
        let ingest = IngestService::new(
            store.clone(),
            ocr,
            embedder,
            corpora.clone(),
            Chunker::new(ChunkerConfig::from(&settings.rag)),
            settings.embedding.batch_size,
            paths.corpus_dir.clone(),
        );

        Self {
            paths,
            config,
            settings,
            store,
            corpora,
            chat,
            ingest,
        }
    }
}
