//! Persistence for documents, their OCR pages, and chatbot conversations.

pub mod sqlite;
pub mod types;

use async_trait::async_trait;

use crate::core::errors::ApiError;

pub use sqlite::SqliteManualStore;
pub use types::{Chatbot, Document, HistoryItem, Page, PageImage};

#[async_trait]
pub trait ManualStore: Send + Sync {
    async fn create_document(&self, source_url: &str, ocr_model: &str)
        -> Result<Document, ApiError>;

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>, ApiError>;

    async fn list_documents(&self) -> Result<Vec<Document>, ApiError>;

    /// Records where the chunk corpus and its vector index were written.
    async fn set_corpus_files(
        &self,
        document_id: &str,
        chunks_path: &str,
        index_path: &str,
    ) -> Result<(), ApiError>;

    /// Removes the document together with its pages and images.
    /// Chatbots bound to it are left in place.
    async fn delete_document(&self, document_id: &str) -> Result<bool, ApiError>;

    /// Inserts all pages in one transaction.
    async fn insert_pages(&self, pages: &[Page]) -> Result<(), ApiError>;

    /// Pages of a document ordered by page number, images included.
    async fn list_pages(&self, document_id: &str) -> Result<Vec<Page>, ApiError>;

    async fn get_page(&self, page_id: &str) -> Result<Option<Page>, ApiError>;

    async fn create_chatbot(&self, document_id: &str) -> Result<Chatbot, ApiError>;

    async fn get_chatbot(&self, chatbot_id: &str) -> Result<Option<Chatbot>, ApiError>;

    async fn list_chatbots_for_document(&self, document_id: &str)
        -> Result<Vec<Chatbot>, ApiError>;

    /// Appends one item. Concurrent appends to the same chatbot all survive.
    async fn append_history(&self, chatbot_id: &str, item: &HistoryItem) -> Result<(), ApiError>;

    async fn clear_history(&self, chatbot_id: &str) -> Result<usize, ApiError>;

    async fn delete_chatbot(&self, chatbot_id: &str) -> Result<bool, ApiError>;
}
