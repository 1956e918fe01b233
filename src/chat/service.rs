//! One question/answer turn: retrieve, stream, resolve images, persist.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::clarify::{
    assessment_messages, clarification_text, combine_with_pending, parse_assessment,
    QueryAssessment, ASSESSMENT_PROMPT, CLARIFICATION_PREFIX,
};
use super::images::resolve_images;
use crate::core::config::PipelineSettings;
use crate::core::errors::ApiError;
use crate::llm::prompt::{clean_messages, history_messages};
use crate::llm::{resolve, AnswerStreamer, ChatMessage, ModelSpec, StreamEvent};
use crate::rag::{CorpusCache, EmbeddingProvider, Retriever, ScoredChunk};
use crate::store::{HistoryItem, ManualStore, Page};

/// What a question is asked against.
#[derive(Debug, Clone)]
pub enum AskTarget {
    /// A stored conversation; its history is loaded and the turn is persisted.
    Chatbot(String),
    /// A document directly, with caller-supplied history and nothing persisted.
    Document {
        document_id: String,
        history: Vec<ChatMessage>,
    },
}

/// Everything resolved before the first event is streamed.
struct PreparedTurn {
    chatbot_id: Option<String>,
    question: String,
    query: String,
    follow_up: bool,
    history: Vec<ChatMessage>,
    context: Vec<ScoredChunk>,
    pages: Vec<Page>,
}

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn ManualStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    corpora: Arc<CorpusCache>,
    streamer: AnswerStreamer,
    top_k: usize,
    default_model: String,
    clarify_first: bool,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ManualStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        corpora: Arc<CorpusCache>,
        streamer: AnswerStreamer,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            corpora,
            streamer,
            top_k: settings.rag.top_k,
            default_model: settings.llm.default_model.clone(),
            clarify_first: settings.llm.clarify_first,
        }
    }

    /// Starts a turn. Lookup and retrieval failures are returned directly;
    /// once streaming starts every outcome arrives as events ending in `Done`.
    pub async fn ask(
        &self,
        target: AskTarget,
        message: &str,
        model: Option<&str>,
    ) -> Result<mpsc::Receiver<StreamEvent>, ApiError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ApiError::BadRequest("message must not be empty".to_string()));
        }
        let model = resolve(model.unwrap_or(&self.default_model))?;
        let turn = self.prepare(target, message).await?;

        if self.clarify_first && !turn.follow_up {
            if let QueryAssessment::NeedsClarification { missing, questions } =
                self.assess(model, &turn).await
            {
                return Ok(self.send_clarification(turn, missing, questions));
            }
        }

        let upstream = self
            .streamer
            .stream_answer(model, &turn.query, turn.history.clone(), &turn.context);
        Ok(self.relay(turn, upstream))
    }

    async fn prepare(&self, target: AskTarget, message: &str) -> Result<PreparedTurn, ApiError> {
        let (chatbot_id, document_id, history, pending) = match target {
            AskTarget::Chatbot(chatbot_id) => {
                let chatbot = self
                    .store
                    .get_chatbot(&chatbot_id)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("Chatbot {} not found", chatbot_id)))?;
                let pending = chatbot
                    .history
                    .last()
                    .filter(|item| item.answer.starts_with(CLARIFICATION_PREFIX))
                    .map(|item| item.question.clone());
                let history = history_messages(&chatbot.history);
                (Some(chatbot.id), chatbot.document_id, history, pending)
            }
            AskTarget::Document {
                document_id,
                history,
            } => (None, document_id, clean_messages(&history), None),
        };

        let document = match self.store.get_document(&document_id).await? {
            Some(document) => document,
            None if chatbot_id.is_some() => {
                return Err(ApiError::Consistency(format!(
                    "Document {} referenced by this chatbot no longer exists",
                    document_id
                )))
            }
            None => return Err(ApiError::NotFound(format!("Document {} not found", document_id))),
        };

        let corpus = self.corpora.get_or_load(&document).await?;
        let follow_up = pending.is_some();
        let query = match pending {
            Some(pending) => combine_with_pending(&pending, message),
            None => message.to_string(),
        };
        let context = Retriever::new(self.embedder.as_ref(), self.top_k)
            .retrieve(&query, &corpus)
            .await?;
        let pages = self.store.list_pages(&document.id).await?;

        Ok(PreparedTurn {
            chatbot_id,
            question: message.to_string(),
            query,
            follow_up,
            history,
            context,
            pages,
        })
    }

    async fn assess(&self, model: &'static ModelSpec, turn: &PreparedTurn) -> QueryAssessment {
        let messages = assessment_messages(&turn.query, &turn.context);
        match self.streamer.complete(model, ASSESSMENT_PROMPT, messages).await {
            Ok(reply) => parse_assessment(&reply),
            Err(err) => {
                tracing::warn!("Query assessment failed, answering directly: {}", err);
                QueryAssessment::Answer
            }
        }
    }

    fn send_clarification(
        &self,
        turn: PreparedTurn,
        missing: String,
        questions: Vec<String>,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(4);
        let store = self.store.clone();

        tokio::spawn(async move {
            let answer = clarification_text(&missing, &questions);
            let event = StreamEvent::Clarification { missing, questions };
            if tx.send(event).await.is_err() {
                return;
            }
            if let Some(chatbot_id) = &turn.chatbot_id {
                let item = HistoryItem::now(turn.question, answer);
                if let Err(err) = store.append_history(chatbot_id, &item).await {
                    tracing::error!("Failed to save clarification for {}: {}", chatbot_id, err);
                    let _ = tx.send(StreamEvent::Error { error: err.to_string() }).await;
                }
            }
            let _ = tx.send(StreamEvent::done()).await;
        });

        rx
    }

    /// Forwards streamer events, accumulating the answer text. The final
    /// `Done` carries the resolved images once the turn is persisted.
    fn relay(
        &self,
        turn: PreparedTurn,
        mut upstream: mpsc::Receiver<StreamEvent>,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(64);
        let store = self.store.clone();

        tokio::spawn(async move {
            let mut answer = String::new();
            let mut failed = false;
            let mut saw_done = false;

            loop {
                let event = tokio::select! {
                    event = upstream.recv() => event,
                    _ = tx.closed() => {
                        tracing::debug!("Client went away; dropping partial answer");
                        return;
                    }
                };
                let Some(event) = event else {
                    break;
                };
                match &event {
                    StreamEvent::TextDelta { text } => answer.push_str(text),
                    StreamEvent::Error { .. } => failed = true,
                    StreamEvent::Done { .. } => {
                        saw_done = true;
                        break;
                    }
                    _ => {}
                }
                if tx.send(event).await.is_err() {
                    tracing::debug!("Client went away; dropping partial answer");
                    return;
                }
            }

            if !saw_done {
                tracing::error!("Answer stream closed without finishing; discarding partial answer");
                let error = StreamEvent::Error {
                    error: "Answer stream ended unexpectedly".to_string(),
                };
                if tx.send(error).await.is_err() {
                    return;
                }
                failed = true;
            }

            if failed || answer.trim().is_empty() {
                let _ = tx.send(StreamEvent::done()).await;
                return;
            }

            let images = resolve_images(&answer, &turn.pages);
            if let Some(chatbot_id) = &turn.chatbot_id {
                let item = HistoryItem::now(turn.question, answer);
                match store.append_history(chatbot_id, &item).await {
                    Ok(()) => tracing::info!(
                        "Saved answer for chatbot {} with {} image(s)",
                        chatbot_id,
                        images.len()
                    ),
                    Err(err) => {
                        tracing::error!("Failed to save answer for {}: {}", chatbot_id, err);
                        let _ = tx.send(StreamEvent::Error { error: err.to_string() }).await;
                    }
                }
            }
            let _ = tx.send(StreamEvent::Done { images }).await;
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::defaults::default_config;
    use crate::llm::streamer::tests::{overloaded, ScriptedProvider};
    use crate::llm::{CompletionProvider, CompletionRequest, EventStream, Provider, ProviderError, RetryPolicy};
    use crate::rag::{Chunk, Corpus, InputType, VectorIndex};
    use crate::store::{PageImage, SqliteManualStore};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Puts queries mentioning "power" next to the first chunk.
    struct KeywordEmbedder;

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        fn model(&self) -> &str {
            "keyword"
        }

        fn max_batch(&self) -> usize {
            96
        }

        async fn embed(&self, texts: &[String], _input_type: InputType) -> Result<Vec<Vec<f32>>, ApiError> {
            Ok(texts
                .iter()
                .map(|t| if t.contains("power") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
                .collect())
        }
    }

    /// Sends one delta, then holds the stream open until the reader goes away.
    struct StallingProvider {
        stopped: Arc<Notify>,
    }

    #[async_trait]
    impl CompletionProvider for StallingProvider {
        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        async fn stream(&self, _request: &CompletionRequest) -> Result<EventStream, ProviderError> {
            let (tx, rx) = mpsc::channel(4);
            let stopped = self.stopped.clone();
            tokio::spawn(async move {
                if tx.send(Ok(StreamEvent::text("Press and hold"))).await.is_err() {
                    return;
                }
                tx.closed().await;
                stopped.notify_one();
            });
            Ok(rx)
        }
    }

    struct Fixture {
        store: Arc<SqliteManualStore>,
        document_id: String,
        chatbot_id: String,
    }

    async fn fixture() -> (Fixture, Arc<CorpusCache>) {
        let path = std::env::temp_dir().join(format!("manualchat-chat-test-{}.db", uuid::Uuid::new_v4()));
        let store = Arc::new(SqliteManualStore::with_path(path).await.unwrap());
        let document = store
            .create_document("https://example.com/manual.pdf", "mistral-ocr-latest")
            .await
            .unwrap();
        store
            .insert_pages(&[Page::from_ocr_index(
                &document.id,
                0,
                "Press power. ![img-2.jpeg](img-2.jpeg)".to_string(),
                vec![PageImage {
                    id: "img-2".to_string(),
                    image_base64: "UE9XRVI=".to_string(),
                }],
            )])
            .await
            .unwrap();
        let chatbot = store.create_chatbot(&document.id).await.unwrap();

        let chunk = |title: &str, snippet: &str| Chunk {
            title: title.to_string(),
            snippet: snippet.to_string(),
            page_number: Some(1),
            page_image: None,
        };
        let corpus = Corpus::new(
            vec![chunk("Page 1", "Press power."), chunk("Page 1", "Safety notes")],
            VectorIndex::from_vectors(vec![vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap(),
        )
        .unwrap();
        let cache = Arc::new(CorpusCache::new());
        cache.insert(&document.id, corpus).await;

        (
            Fixture {
                store,
                document_id: document.id,
                chatbot_id: chatbot.id,
            },
            cache,
        )
    }

    fn service(fx: &Fixture, cache: Arc<CorpusCache>, provider: Arc<dyn CompletionProvider>, clarify: bool) -> ChatService {
        let mut settings = PipelineSettings::from_config(&default_config());
        settings.llm.default_model = "CLAUDE_3_5_SONNET".to_string();
        settings.llm.clarify_first = clarify;
        let streamer = AnswerStreamer::new(
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
            0.0,
        )
        .with_provider(provider);
        ChatService::new(fx.store.clone(), Arc::new(KeywordEmbedder), cache, streamer, &settings)
    }

    async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn answering(text: &str) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider::new(
            Provider::Anthropic,
            vec![Ok(vec![
                Ok(StreamEvent::text(text)),
                Ok(StreamEvent::Finish {
                    reason: "end_turn".to_string(),
                }),
            ])],
        ))
    }

    #[tokio::test]
    async fn completed_turn_appends_one_history_item_with_images() {
        let (fx, cache) = fixture().await;
        let svc = service(&fx, cache, answering("Press power. ![img-2.jpeg](img-2.jpeg)"), false);

        let events = collect(
            svc.ask(AskTarget::Chatbot(fx.chatbot_id.clone()), "How do I turn it on?", None)
                .await
                .unwrap(),
        )
        .await;

        match events.last() {
            Some(StreamEvent::Done { images }) => {
                assert_eq!(images.len(), 1);
                assert_eq!(images[0].image_base64, "UE9XRVI=");
            }
            other => panic!("expected done, got {:?}", other),
        }
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

        let chatbot = fx.store.get_chatbot(&fx.chatbot_id).await.unwrap().unwrap();
        assert_eq!(chatbot.history.len(), 1);
        assert_eq!(chatbot.history[0].question, "How do I turn it on?");
        assert!(chatbot.history[0].answer.starts_with("Press power."));
    }

    #[tokio::test]
    async fn failed_turn_leaves_history_unchanged() {
        let (fx, cache) = fixture().await;
        let provider = Arc::new(ScriptedProvider::new(Provider::Anthropic, vec![Err(overloaded())]));
        let svc = service(&fx, cache, provider.clone(), false);

        let events = collect(
            svc.ask(AskTarget::Chatbot(fx.chatbot_id.clone()), "power?", None)
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!(events.iter().any(|e| matches!(e, StreamEvent::Error { .. })));
        assert_eq!(events.last(), Some(&StreamEvent::done()));
        let chatbot = fx.store.get_chatbot(&fx.chatbot_id).await.unwrap().unwrap();
        assert!(chatbot.history.is_empty());
    }

    #[tokio::test]
    async fn user_turn_carries_retrieved_chunks_and_history() {
        let (fx, cache) = fixture().await;
        let provider = answering("ok");
        let svc = service(&fx, cache, provider.clone(), false);

        collect(
            svc.ask(
                AskTarget::Document {
                    document_id: fx.document_id.clone(),
                    history: vec![ChatMessage::user("hi"), ChatMessage::assistant("  ")],
                },
                "power button?",
                Some("CLAUDE_3_HAIKU"),
            )
            .await
            .unwrap(),
        )
        .await;

        let requests = provider.requests.lock().unwrap();
        let messages = &requests[0].messages;
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("Press power."));
        assert!(messages[1].content.contains("Question: power button?"));
        assert_eq!(requests[0].model_id, "claude-3-haiku-20240307");

        // stateless asks never persist
        let chatbot = fx.store.get_chatbot(&fx.chatbot_id).await.unwrap().unwrap();
        assert!(chatbot.history.is_empty());
    }

    #[tokio::test]
    async fn lookup_failures_surface_before_streaming() {
        let (fx, cache) = fixture().await;
        let svc = service(&fx, cache, answering("ok"), false);

        let missing = svc.ask(AskTarget::Chatbot("nope".to_string()), "q", None).await;
        assert!(matches!(missing, Err(ApiError::NotFound(_))));

        let unknown_model = svc
            .ask(AskTarget::Chatbot(fx.chatbot_id.clone()), "q", Some("GPT_9"))
            .await;
        assert!(matches!(unknown_model, Err(ApiError::BadRequest(_))));

        fx.store.delete_document(&fx.document_id).await.unwrap();
        let orphaned = svc.ask(AskTarget::Chatbot(fx.chatbot_id.clone()), "q", None).await;
        assert!(matches!(orphaned, Err(ApiError::Consistency(_))));
    }

    #[tokio::test]
    async fn clarification_turn_is_persisted_and_follow_up_combines_queries() {
        let (fx, cache) = fixture().await;
        let provider = Arc::new(ScriptedProvider::new(
            Provider::Anthropic,
            vec![
                Ok(vec![Ok(StreamEvent::text(
                    "SUFFICIENT: false\nMISSING_INFO: model number\nQUESTIONS:\nWhich model do you have?",
                ))]),
                Ok(vec![Ok(StreamEvent::text("For the CF-33, press power."))]),
            ],
        ));
        let svc = service(&fx, cache, provider.clone(), true);

        let first = collect(
            svc.ask(AskTarget::Chatbot(fx.chatbot_id.clone()), "How do I reset?", None)
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(
            first,
            vec![
                StreamEvent::Clarification {
                    missing: "model number".to_string(),
                    questions: vec!["Which model do you have?".to_string()],
                },
                StreamEvent::done(),
            ]
        );

        let second = collect(
            svc.ask(AskTarget::Chatbot(fx.chatbot_id.clone()), "CF-33", None)
                .await
                .unwrap(),
        )
        .await;
        assert!(second.contains(&StreamEvent::text("For the CF-33, press power.")));

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let live_turn = &requests[1].messages.last().unwrap().content;
        assert!(live_turn.contains("Original question: How do I reset?\nAdditional information: CF-33"));

        let chatbot = fx.store.get_chatbot(&fx.chatbot_id).await.unwrap().unwrap();
        assert_eq!(chatbot.history.len(), 2);
        assert!(chatbot.history[0].answer.starts_with(CLARIFICATION_PREFIX));
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (fx, cache) = fixture().await;
        let svc = service(&fx, cache, answering("ok"), false);
        let result = svc.ask(AskTarget::Chatbot(fx.chatbot_id.clone()), "   ", None).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn client_disconnect_stops_generation_and_persists_nothing() {
        let (fx, cache) = fixture().await;
        let stopped = Arc::new(Notify::new());
        let provider = Arc::new(StallingProvider {
            stopped: stopped.clone(),
        });
        let svc = service(&fx, cache, provider, false);

        let mut rx = svc
            .ask(AskTarget::Chatbot(fx.chatbot_id.clone()), "power?", None)
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(StreamEvent::text("Press and hold")));
        drop(rx);

        tokio::time::timeout(Duration::from_secs(5), stopped.notified())
            .await
            .expect("provider stream kept running after disconnect");
        let chatbot = fx.store.get_chatbot(&fx.chatbot_id).await.unwrap().unwrap();
        assert!(chatbot.history.is_empty());
    }

    #[tokio::test]
    async fn stream_closing_without_done_is_not_persisted() {
        let (fx, cache) = fixture().await;
        let svc = service(&fx, cache, answering("unused"), false);
        let turn = PreparedTurn {
            chatbot_id: Some(fx.chatbot_id.clone()),
            question: "power?".to_string(),
            query: "power?".to_string(),
            follow_up: false,
            history: Vec::new(),
            context: Vec::new(),
            pages: Vec::new(),
        };

        let (upstream_tx, upstream_rx) = mpsc::channel(4);
        upstream_tx.send(StreamEvent::text("Press power")).await.unwrap();
        drop(upstream_tx);
        let events = collect(svc.relay(turn, upstream_rx)).await;

        assert!(matches!(&events[events.len() - 2], StreamEvent::Error { .. }));
        assert_eq!(events.last(), Some(&StreamEvent::done()));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        let chatbot = fx.store.get_chatbot(&fx.chatbot_id).await.unwrap().unwrap();
        assert!(chatbot.history.is_empty());
    }
}
