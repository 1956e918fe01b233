//! Hosted OCR client. Turns a PDF URL into page-segmented markdown plus the
//! images each page embeds.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::config::settings::OcrSettings;
use crate::core::errors::ApiError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrImage {
    pub id: String,
    #[serde(default)]
    pub image_base64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPage {
    /// Zero-based.
    pub index: u32,
    #[serde(default)]
    pub markdown: String,
    #[serde(default)]
    pub images: Vec<OcrImage>,
}

#[async_trait]
pub trait OcrProvider: Send + Sync {
    fn model(&self) -> &str;

    /// Processes the whole document in one call.
    async fn process(&self, document_url: &str) -> Result<Vec<OcrPage>, ApiError>;
}

#[derive(Clone)]
pub struct MistralOcr {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl MistralOcr {
    pub fn new(settings: &OcrSettings) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            client: Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct OcrResponse {
    pages: Vec<OcrPage>,
}

#[async_trait]
impl OcrProvider for MistralOcr {
    fn model(&self) -> &str {
        &self.model
    }

    async fn process(&self, document_url: &str) -> Result<Vec<OcrPage>, ApiError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ApiError::Upstream("Mistral API key is not configured".to_string()))?;

        let url = format!("{}/v1/ocr", self.base_url);
        let body = json!({
            "model": self.model,
            "document": {
                "type": "document_url",
                "document_url": document_url,
            },
            "include_image_base64": true,
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
                "Mistral OCR error ({}): {}",
                status, text
            )));
        }

        let payload: OcrResponse = res.json().await.map_err(ApiError::upstream)?;
        tracing::info!("OCR returned {} pages for {}", payload.pages.len(), document_url);
        Ok(payload.pages)
    }
}
