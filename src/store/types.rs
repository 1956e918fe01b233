use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub source_url: String,
    pub ocr_model: String,
    /// Chunk corpus file, unset until a corpus build succeeds.
    pub chunks_path: Option<String>,
    pub index_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn has_corpus(&self) -> bool {
        self.chunks_path.is_some() && self.index_path.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageImage {
    /// Identifier as emitted by OCR, e.g. `img-2.jpeg`.
    pub id: String,
    pub image_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    pub id: String,
    pub document_id: String,
    /// 1-based.
    pub page_number: u32,
    pub markdown: String,
    pub images: Vec<PageImage>,
}

impl Page {
    /// Builds a page from a zero-based OCR page index.
    pub fn from_ocr_index(
        document_id: &str,
        index: u32,
        markdown: String,
        images: Vec<PageImage>,
    ) -> Self {
        Page {
            id: format!("{}_page_{}", document_id, index),
            document_id: document_id.to_string(),
            page_number: index + 1,
            markdown,
            images,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryItem {
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryItem {
    pub fn now(question: impl Into<String>, answer: impl Into<String>) -> Self {
        HistoryItem {
            question: question.into(),
            answer: answer.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chatbot {
    pub id: String,
    pub document_id: String,
    pub history: Vec<HistoryItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
