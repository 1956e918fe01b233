//! SQLite-backed store for manuals and conversations.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::types::{Chatbot, Document, HistoryItem, Page, PageImage};
use super::ManualStore;
use crate::core::config::AppPaths;
use crate::core::errors::ApiError;

#[derive(Clone)]
pub struct SqliteManualStore {
    pool: SqlitePool,
}

impl SqliteManualStore {
    pub async fn new(paths: &AppPaths) -> Result<Self, ApiError> {
        Self::with_path(paths.db_path.clone()).await
    }

    pub async fn with_path(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                source_url TEXT NOT NULL,
                ocr_model TEXT NOT NULL,
                chunks_path TEXT,
                index_path TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS pages (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                page_number INTEGER NOT NULL,
                markdown TEXT NOT NULL,
                UNIQUE (document_id, page_number)
            )",
            "CREATE TABLE IF NOT EXISTS page_images (
                page_id TEXT NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                image_id TEXT NOT NULL,
                image_base64 TEXT NOT NULL,
                PRIMARY KEY (page_id, position)
            )",
            "CREATE TABLE IF NOT EXISTS chatbots (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_chatbots_document ON chatbots(document_id)",
            "CREATE TABLE IF NOT EXISTS history_items (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                chatbot_id TEXT NOT NULL REFERENCES chatbots(id) ON DELETE CASCADE,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_history_chatbot ON history_items(chatbot_id, seq)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(ApiError::internal)?;
        }
        Ok(())
    }

    async fn load_history(&self, chatbot_id: &str) -> Result<Vec<HistoryItem>, ApiError> {
        let rows = sqlx::query(
            "SELECT question, answer, timestamp
             FROM history_items
             WHERE chatbot_id = ?1
             ORDER BY seq ASC",
        )
        .bind(chatbot_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.iter()
            .map(|row| {
                Ok(HistoryItem {
                    question: row.get("question"),
                    answer: row.get("answer"),
                    timestamp: parse_timestamp(row.get("timestamp"))?,
                })
            })
            .collect()
    }

    async fn load_images(&self, page_ids: &[String]) -> Result<HashMap<String, Vec<PageImage>>, ApiError> {
        let mut images: HashMap<String, Vec<PageImage>> = HashMap::new();
        for page_id in page_ids {
            let rows = sqlx::query(
                "SELECT image_id, image_base64
                 FROM page_images
                 WHERE page_id = ?1
                 ORDER BY position ASC",
            )
            .bind(page_id)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;

            if rows.is_empty() {
                continue;
            }
            images.insert(
                page_id.clone(),
                rows.iter()
                    .map(|row| PageImage {
                        id: row.get("image_id"),
                        image_base64: row.get("image_base64"),
                    })
                    .collect(),
            );
        }
        Ok(images)
    }

    fn row_to_document(row: &SqliteRow) -> Result<Document, ApiError> {
        Ok(Document {
            id: row.get("id"),
            source_url: row.get("source_url"),
            ocr_model: row.get("ocr_model"),
            chunks_path: row.get("chunks_path"),
            index_path: row.get("index_path"),
            created_at: parse_timestamp(row.get("created_at"))?,
            updated_at: parse_timestamp(row.get("updated_at"))?,
        })
    }

    fn row_to_page(row: &SqliteRow) -> Page {
        let page_number: i64 = row.get("page_number");
        Page {
            id: row.get("id"),
            document_id: row.get("document_id"),
            page_number: page_number.max(0) as u32,
            markdown: row.get("markdown"),
            images: Vec::new(),
        }
    }

    async fn row_to_chatbot(&self, row: &SqliteRow) -> Result<Chatbot, ApiError> {
        let id: String = row.get("id");
        let history = self.load_history(&id).await?;
        Ok(Chatbot {
            id,
            document_id: row.get("document_id"),
            history,
            created_at: parse_timestamp(row.get("created_at"))?,
            updated_at: parse_timestamp(row.get("updated_at"))?,
        })
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: String) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| ApiError::Internal(format!("invalid stored timestamp '{}': {}", raw, err)))
}

#[async_trait]
impl ManualStore for SqliteManualStore {
    async fn create_document(
        &self,
        source_url: &str,
        ocr_model: &str,
    ) -> Result<Document, ApiError> {
        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4().to_string(),
            source_url: source_url.to_string(),
            ocr_model: ocr_model.to_string(),
            chunks_path: None,
            index_path: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO documents (id, source_url, ocr_model, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
        )
        .bind(&document.id)
        .bind(&document.source_url)
        .bind(&document.ocr_model)
        .bind(format_timestamp(&now))
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(document)
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>, ApiError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?1")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn list_documents(&self) -> Result<Vec<Document>, ApiError> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        rows.iter().map(Self::row_to_document).collect()
    }

    async fn set_corpus_files(
        &self,
        document_id: &str,
        chunks_path: &str,
        index_path: &str,
    ) -> Result<(), ApiError> {
        let result = sqlx::query(
            "UPDATE documents
             SET chunks_path = ?2, index_path = ?3, updated_at = ?4
             WHERE id = ?1",
        )
        .bind(document_id)
        .bind(chunks_path)
        .bind(index_path)
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!(
                "Document {} not found",
                document_id
            )));
        }
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_pages(&self, pages: &[Page]) -> Result<(), ApiError> {
        if pages.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        for page in pages {
            sqlx::query(
                "INSERT INTO pages (id, document_id, page_number, markdown)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&page.id)
            .bind(&page.document_id)
            .bind(page.page_number as i64)
            .bind(&page.markdown)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

            for (position, image) in page.images.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO page_images (page_id, position, image_id, image_base64)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .bind(&page.id)
                .bind(position as i64)
                .bind(&image.id)
                .bind(&image.image_base64)
                .execute(&mut *tx)
                .await
                .map_err(ApiError::internal)?;
            }
        }

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn list_pages(&self, document_id: &str) -> Result<Vec<Page>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, document_id, page_number, markdown
             FROM pages
             WHERE document_id = ?1
             ORDER BY page_number ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut pages: Vec<Page> = rows.iter().map(Self::row_to_page).collect();
        let page_ids: Vec<String> = pages.iter().map(|p| p.id.clone()).collect();
        let mut images = self.load_images(&page_ids).await?;
        for page in &mut pages {
            if let Some(page_images) = images.remove(&page.id) {
                page.images = page_images;
            }
        }
        Ok(pages)
    }

    async fn get_page(&self, page_id: &str) -> Result<Option<Page>, ApiError> {
        let row = sqlx::query(
            "SELECT id, document_id, page_number, markdown
             FROM pages
             WHERE id = ?1",
        )
        .bind(page_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut page = Self::row_to_page(&row);
        let mut images = self.load_images(std::slice::from_ref(&page.id)).await?;
        page.images = images.remove(&page.id).unwrap_or_default();
        Ok(Some(page))
    }

    async fn create_chatbot(&self, document_id: &str) -> Result<Chatbot, ApiError> {
        if self.get_document(document_id).await?.is_none() {
            return Err(ApiError::NotFound(format!(
                "Document {} not found",
                document_id
            )));
        }

        let now = Utc::now();
        let chatbot = Chatbot {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO chatbots (id, document_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
        )
        .bind(&chatbot.id)
        .bind(&chatbot.document_id)
        .bind(format_timestamp(&now))
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(chatbot)
    }

    async fn get_chatbot(&self, chatbot_id: &str) -> Result<Option<Chatbot>, ApiError> {
        let row = sqlx::query("SELECT * FROM chatbots WHERE id = ?1")
            .bind(chatbot_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        match row {
            Some(row) => Ok(Some(self.row_to_chatbot(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list_chatbots_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<Chatbot>, ApiError> {
        let rows = sqlx::query(
            "SELECT * FROM chatbots WHERE document_id = ?1 ORDER BY created_at ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut chatbots = Vec::with_capacity(rows.len());
        for row in &rows {
            chatbots.push(self.row_to_chatbot(row).await?);
        }
        Ok(chatbots)
    }

    async fn append_history(&self, chatbot_id: &str, item: &HistoryItem) -> Result<(), ApiError> {
        // Single conditional insert; no read-modify-write of the history list.
        let result = sqlx::query(
            "INSERT INTO history_items (chatbot_id, question, answer, timestamp)
             SELECT ?1, ?2, ?3, ?4
             WHERE EXISTS (SELECT 1 FROM chatbots WHERE id = ?1)",
        )
        .bind(chatbot_id)
        .bind(&item.question)
        .bind(&item.answer)
        .bind(format_timestamp(&item.timestamp))
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!(
                "Chatbot {} not found",
                chatbot_id
            )));
        }

        sqlx::query("UPDATE chatbots SET updated_at = ?2 WHERE id = ?1")
            .bind(chatbot_id)
            .bind(format_timestamp(&Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(())
    }

    async fn clear_history(&self, chatbot_id: &str) -> Result<usize, ApiError> {
        let result = sqlx::query("DELETE FROM history_items WHERE chatbot_id = ?1")
            .bind(chatbot_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() as usize)
    }

    async fn delete_chatbot(&self, chatbot_id: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM chatbots WHERE id = ?1")
            .bind(chatbot_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() > 0)
    }
}
