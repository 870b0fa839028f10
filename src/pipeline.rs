//! # Retrieval-augmented query pipeline
//!
//! The orchestrator that turns a `(session id, query)` pair into a grounded
//! answer. One call drives: session memory lookup → query embedding → vector
//! search → prompt assembly → completion → deferred memory update.
//!
//! Ordering is part of the contract: the answer is returned to the caller
//! first, and the turn is folded into session memory afterwards on a detached
//! task, so a slow or failing memory update can never delay or fail the
//! user-visible answer. Concurrent turns within one session are serialized by
//! that session's memory; unrelated sessions proceed independently.
//!
//! Failure policy (see [`crate::error`]): an empty query is rejected before
//! any external call; embedding and search failures are fatal retrieval
//! errors; completion failures are fatal generation errors; memory failures
//! are recovered via the fallback-to-default-session policy and never surface
//! to the caller. Zero vector matches is not a failure: the completion is
//! attempted with an empty context block.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::api::{CompletionService, EmbeddingService, system_message, user_message};
use crate::config::DocentConfig;
use crate::error::{Error, RetrievalStage, ServiceError};
use crate::memory::{DEFAULT_SESSION, SessionMemoryStore};
use crate::template::ChatTemplate;
use crate::vector_store::VectorIndex;

/// One inbound question tied to a conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Opaque caller-supplied session id. Requests without one collapse onto
    /// the shared [`DEFAULT_SESSION`]; callers must supply a real id to get
    /// conversation isolation.
    pub session_id: Option<String>,
    /// The natural-language question.
    pub query: String,
}

impl QueryRequest {
    /// Build a request from an optional session id and a query string.
    pub fn new(session_id: Option<String>, query: impl Into<String>) -> Self {
        Self {
            session_id,
            query: query.into(),
        }
    }

    /// Effective session id: the supplied one, or the shared sentinel when
    /// absent or blank.
    pub fn session_or_default(&self) -> &str {
        match self.session_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id,
            _ => DEFAULT_SESSION,
        }
    }
}

/// The generated answer and the session it belongs to. Retrieved passages and
/// raw memory stay internal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    /// The generated answer text.
    pub answer: String,
    /// Effective session id the turn was recorded under.
    pub session_id: String,
}

/// Orchestrates embedding, retrieval, completion and memory for each query.
pub struct Pipeline {
    embeddings: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    completions: Arc<dyn CompletionService>,
    memory: Arc<SessionMemoryStore>,
    template: ChatTemplate,
    top_k: usize,
    max_answer_tokens: u32,
    request_timeout: Duration,
}

impl Pipeline {
    /// Wire a pipeline from its collaborators and the configured knobs
    /// (`top_k`, `max_answer_tokens`, `request_timeout_secs`).
    pub fn new(
        embeddings: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        completions: Arc<dyn CompletionService>,
        memory: Arc<SessionMemoryStore>,
        template: ChatTemplate,
        config: &DocentConfig,
    ) -> Self {
        Self {
            embeddings,
            index,
            completions,
            memory,
            template,
            top_k: config.top_k,
            max_answer_tokens: config.max_answer_tokens,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    /// Answer one query within its session.
    ///
    /// Returns the answer as soon as the completion service produces it; the
    /// session summary is updated afterwards on a detached task.
    pub async fn answer(&self, request: QueryRequest) -> Result<AnswerResult, Error> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(Error::InvalidQuery);
        }

        let session_id = request.session_or_default().to_string();
        info!("answering query for session {session_id}");

        // Memory failures never fail the request (fallback policy).
        let memory = self.memory.resolve(&session_id);
        let summary = self.memory.load_summary(&memory).await;

        let vector = self
            .bounded(self.embeddings.embed(query))
            .await
            .map_err(|err| {
                error!("embedding failed for session {session_id}: {err}");
                Error::retrieval(RetrievalStage::Embedding, err)
            })?;

        let passages = self
            .bounded(self.index.search(&vector, self.top_k))
            .await
            .map_err(|err| {
                error!("vector search failed for session {session_id}: {err}");
                Error::retrieval(RetrievalStage::Search, err)
            })?;

        if passages.is_empty() {
            warn!("no passages retrieved for session {session_id}, answering without context");
        } else {
            debug!(
                "retrieved {} passages for session {session_id}, best score {:.3}",
                passages.len(),
                passages[0].score
            );
        }

        // Ranked order preserved, closest match first. No deduplication
        // beyond what the index already returns.
        let context = passages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let messages = vec![
            system_message(self.template.system_prompt.clone()),
            user_message(self.template.render_user_message(&summary, &context, query)),
        ];

        let answer = self
            .bounded(self.completions.complete(messages, self.max_answer_tokens))
            .await
            .map_err(|err| {
                error!("completion failed for session {session_id}: {err}");
                Error::Generation(err)
            })?;

        let result = AnswerResult {
            answer: answer.clone(),
            session_id: session_id.clone(),
        };

        // The answer is already on its way back to the caller; fold the turn
        // into session memory off the response path. record_turn logs its own
        // failures and the per-session mutex serializes concurrent turns.
        let store = Arc::clone(&self.memory);
        let question = query.to_string();
        tokio::spawn(async move {
            store.record_turn(&memory, &question, &answer).await;
        });

        Ok(result)
    }

    /// Bound an external-service call by the configured timeout so a stalled
    /// collaborator surfaces as that stage's failure instead of hanging the
    /// request.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, ServiceError> {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(format!("timed out after {:?}", self.request_timeout).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::message_text;
    use crate::memory::ConversationMemory;
    use crate::vector_store::RetrievedPassage;
    use async_openai::types::chat::ChatCompletionRequestMessage;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubEmbeddings {
        calls: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
    }

    impl StubEmbeddings {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: false,
                delay: None,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: true,
                delay: None,
            })
        }
    }

    #[async_trait]
    impl EmbeddingService for StubEmbeddings {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                Err("embedding backend down".into())
            } else {
                Ok(vec![0.1, 0.2, 0.3])
            }
        }
    }

    struct StubIndex {
        calls: AtomicUsize,
        last_top_k: AtomicUsize,
        passages: Vec<RetrievedPassage>,
        fail: bool,
    }

    impl StubIndex {
        fn with_passages(passages: Vec<RetrievedPassage>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last_top_k: AtomicUsize::new(0),
                passages,
                fail: false,
            })
        }

        fn empty() -> Arc<Self> {
            Self::with_passages(Vec::new())
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last_top_k: AtomicUsize::new(0),
                passages: Vec::new(),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl VectorIndex for StubIndex {
        async fn search(
            &self,
            _vector: &[f32],
            top_k: usize,
        ) -> Result<Vec<RetrievedPassage>, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last_top_k.store(top_k, Ordering::SeqCst);
            if self.fail {
                Err("index offline".into())
            } else {
                Ok(self.passages.clone())
            }
        }
    }

    struct StubCompletions {
        calls: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
        last_prompt: Mutex<Option<String>>,
    }

    impl StubCompletions {
        fn echoing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: false,
                delay: None,
                last_prompt: Mutex::new(None),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: true,
                delay: None,
                last_prompt: Mutex::new(None),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: false,
                delay: Some(delay),
                last_prompt: Mutex::new(None),
            })
        }

        fn last_prompt(&self) -> String {
            self.last_prompt.lock().unwrap().clone().unwrap_or_default()
        }
    }

    #[async_trait]
    impl CompletionService for StubCompletions {
        async fn complete(
            &self,
            messages: Vec<ChatCompletionRequestMessage>,
            _max_tokens: u32,
        ) -> Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err("model unavailable".into());
            }
            let prompt = messages
                .last()
                .and_then(message_text)
                .unwrap_or_default()
                .to_string();
            *self.last_prompt.lock().unwrap() = Some(prompt.clone());
            Ok(format!("Based on the records: {prompt}"))
        }
    }

    fn cancellation_passage() -> RetrievedPassage {
        RetrievedPassage {
            text: "Policy: 30-day cancellation window.".to_string(),
            score: 0.92,
            source_id: "chunk-0".to_string(),
        }
    }

    fn build_pipeline(
        embeddings: Arc<StubEmbeddings>,
        index: Arc<StubIndex>,
        completions: Arc<StubCompletions>,
        config: &DocentConfig,
    ) -> (Pipeline, Arc<SessionMemoryStore>) {
        let memory = Arc::new(SessionMemoryStore::new(
            completions.clone() as Arc<dyn CompletionService>,
            config,
        ));
        let pipeline = Pipeline::new(
            embeddings,
            index,
            completions,
            Arc::clone(&memory),
            ChatTemplate::default(),
            config,
        );
        (pipeline, memory)
    }

    async fn wait_for_turns(memory: &ConversationMemory, turns: u64) {
        for _ in 0..400 {
            if memory.turns().await >= turns {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("memory update did not complete");
    }

    #[tokio::test]
    async fn test_empty_query_rejected_before_any_external_call() {
        let embeddings = StubEmbeddings::ok();
        let index = StubIndex::with_passages(vec![cancellation_passage()]);
        let completions = StubCompletions::echoing();
        let (pipeline, _memory) = build_pipeline(
            embeddings.clone(),
            index.clone(),
            completions.clone(),
            &DocentConfig::default(),
        );

        let result = pipeline
            .answer(QueryRequest::new(Some("s1".into()), "   "))
            .await;

        assert!(matches!(result, Err(Error::InvalidQuery)));
        assert_eq!(embeddings.calls.load(Ordering::SeqCst), 0);
        assert_eq!(index.calls.load(Ordering::SeqCst), 0);
        assert_eq!(completions.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_answer_is_grounded_in_retrieved_context() {
        let index = StubIndex::with_passages(vec![cancellation_passage()]);
        let completions = StubCompletions::echoing();
        let (pipeline, _memory) = build_pipeline(
            StubEmbeddings::ok(),
            index.clone(),
            completions.clone(),
            &DocentConfig::default(),
        );

        let result = pipeline
            .answer(QueryRequest::new(
                Some("s1".into()),
                "What is the cancellation policy?",
            ))
            .await
            .expect("answer");

        assert_eq!(result.session_id, "s1");
        assert!(result.answer.contains("30-day"));
        // Fixed top-K fan-out.
        assert_eq!(index.last_top_k.load(Ordering::SeqCst), 5);
        // The prompt carries the literal query after the context block.
        let prompt = completions.last_prompt();
        assert!(prompt.contains("Policy: 30-day cancellation window."));
        assert!(prompt.ends_with("What is the cancellation policy?"));
    }

    #[tokio::test]
    async fn test_second_turn_sees_summary_of_the_first() {
        let index = StubIndex::with_passages(vec![cancellation_passage()]);
        let completions = StubCompletions::echoing();
        let (pipeline, memory) = build_pipeline(
            StubEmbeddings::ok(),
            index,
            completions.clone(),
            &DocentConfig::default(),
        );

        pipeline
            .answer(QueryRequest::new(
                Some("s1".into()),
                "What is the cancellation policy?",
            ))
            .await
            .expect("first answer");

        let session = memory.get_or_create("s1").unwrap();
        wait_for_turns(&session, 1).await;

        pipeline
            .answer(QueryRequest::new(Some("s1".into()), "And for refunds?"))
            .await
            .expect("second answer");

        let prompt = completions.last_prompt();
        assert!(
            prompt.contains("What is the cancellation policy?"),
            "second prompt must carry the first turn's summary"
        );
    }

    #[tokio::test]
    async fn test_zero_matches_still_produces_an_answer() {
        let completions = StubCompletions::echoing();
        let (pipeline, _memory) = build_pipeline(
            StubEmbeddings::ok(),
            StubIndex::empty(),
            completions.clone(),
            &DocentConfig::default(),
        );

        let result = pipeline
            .answer(QueryRequest::new(Some("s1".into()), "Anything on file?"))
            .await
            .expect("graceful degradation");

        assert!(!result.answer.is_empty());
        assert_eq!(completions.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_a_retrieval_error() {
        let index = StubIndex::with_passages(vec![cancellation_passage()]);
        let completions = StubCompletions::echoing();
        let (pipeline, _memory) = build_pipeline(
            StubEmbeddings::failing(),
            index.clone(),
            completions.clone(),
            &DocentConfig::default(),
        );

        let result = pipeline
            .answer(QueryRequest::new(Some("s1".into()), "a question"))
            .await;

        assert!(matches!(
            result,
            Err(Error::Retrieval {
                stage: RetrievalStage::Embedding,
                ..
            })
        ));
        assert_eq!(index.calls.load(Ordering::SeqCst), 0);
        assert_eq!(completions.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_search_failure_is_a_retrieval_error() {
        let completions = StubCompletions::echoing();
        let (pipeline, _memory) = build_pipeline(
            StubEmbeddings::ok(),
            StubIndex::failing(),
            completions.clone(),
            &DocentConfig::default(),
        );

        let result = pipeline
            .answer(QueryRequest::new(Some("s1".into()), "a question"))
            .await;

        assert!(matches!(
            result,
            Err(Error::Retrieval {
                stage: RetrievalStage::Search,
                ..
            })
        ));
        assert_eq!(completions.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_completion_failure_skips_the_memory_update() {
        let index = StubIndex::with_passages(vec![cancellation_passage()]);
        let (pipeline, memory) = build_pipeline(
            StubEmbeddings::ok(),
            index,
            StubCompletions::failing(),
            &DocentConfig::default(),
        );

        let result = pipeline
            .answer(QueryRequest::new(Some("s1".into()), "a question"))
            .await;
        assert!(matches!(result, Err(Error::Generation(_))));

        // Give any (incorrect) deferred update a chance to run.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let session = memory.get_or_create("s1").unwrap();
        assert_eq!(session.turns().await, 0);
        assert_eq!(memory.load_summary(&session).await, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_completion_surfaces_as_generation_error() {
        let index = StubIndex::with_passages(vec![cancellation_passage()]);
        let (pipeline, _memory) = build_pipeline(
            StubEmbeddings::ok(),
            index,
            StubCompletions::slow(Duration::from_secs(120)),
            &DocentConfig::default(), // 30s request timeout
        );

        let result = pipeline
            .answer(QueryRequest::new(Some("s1".into()), "a question"))
            .await;

        match result {
            Err(Error::Generation(source)) => {
                assert!(source.to_string().contains("timed out"));
            }
            other => panic!("expected a generation timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_session_id_collapses_onto_the_default_session() {
        let index = StubIndex::with_passages(vec![cancellation_passage()]);
        let (pipeline, memory) = build_pipeline(
            StubEmbeddings::ok(),
            index,
            StubCompletions::echoing(),
            &DocentConfig::default(),
        );

        let result = pipeline
            .answer(QueryRequest::new(None, "a question"))
            .await
            .expect("answer");
        assert_eq!(result.session_id, DEFAULT_SESSION);

        let default = memory.get_or_create(DEFAULT_SESSION).unwrap();
        wait_for_turns(&default, 1).await;
    }

    #[tokio::test]
    async fn test_concurrent_sessions_stay_isolated() {
        let index = StubIndex::with_passages(vec![cancellation_passage()]);
        let (pipeline, memory) = build_pipeline(
            StubEmbeddings::ok(),
            index,
            StubCompletions::echoing(),
            &DocentConfig::default(),
        );
        let pipeline = Arc::new(pipeline);

        let first = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline
                    .answer(QueryRequest::new(Some("s1".into()), "question for s1"))
                    .await
            })
        };
        let second = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline
                    .answer(QueryRequest::new(Some("s2".into()), "question for s2"))
                    .await
            })
        };

        first.await.unwrap().expect("s1 answer");
        second.await.unwrap().expect("s2 answer");

        let s1 = memory.get_or_create("s1").unwrap();
        let s2 = memory.get_or_create("s2").unwrap();
        wait_for_turns(&s1, 1).await;
        wait_for_turns(&s2, 1).await;

        let s1_summary = memory.load_summary(&s1).await;
        let s2_summary = memory.load_summary(&s2).await;
        assert!(s1_summary.contains("question for s1"));
        assert!(!s1_summary.contains("question for s2"));
        assert!(s2_summary.contains("question for s2"));
        assert!(!s2_summary.contains("question for s1"));
    }
}
