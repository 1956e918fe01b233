//! Embedding provider abstraction and the hosted Cohere client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::config::settings::EmbeddingSettings;
use crate::core::errors::ApiError;

/// Distinguishes corpus-time from query-time embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    SearchDocument,
    SearchQuery,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::SearchDocument => "search_document",
            InputType::SearchQuery => "search_query",
        }
    }
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model(&self) -> &str;

    /// Largest number of texts accepted per call.
    fn max_batch(&self) -> usize;

    /// Returns one vector per input text, in input order.
    async fn embed(&self, texts: &[String], input_type: InputType)
        -> Result<Vec<Vec<f32>>, ApiError>;
}

#[derive(Clone)]
pub struct CohereEmbedder {
    base_url: String,
    api_key: Option<String>,
    model: String,
    batch_size: usize,
    client: Client,
}

impl CohereEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            batch_size: settings.batch_size.max(1),
            client: Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: EmbedByType,
}

#[derive(Deserialize)]
struct EmbedByType {
    #[serde(default)]
    float: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for CohereEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn max_batch(&self) -> usize {
        self.batch_size
    }

    async fn embed(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, ApiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ApiError::Upstream("Cohere API key is not configured".to_string()))?;

        let url = format!("{}/v2/embed", self.base_url);
        let body = json!({
            "model": self.model,
            "texts": texts,
            "input_type": input_type.as_str(),
            "embedding_types": ["float"],
        });

        let res = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "Cohere embed error ({}): {}",
                status, text
            )));
        }

        let payload: EmbedResponse = res.json().await.map_err(ApiError::upstream)?;
        let vectors = payload.embeddings.float;
        if vectors.len() != texts.len() {
            return Err(ApiError::Upstream(format!(
                "Cohere returned {} embeddings for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }
}
