//! # Session memory (rolling summaries)
//!
//! Process-wide table mapping a session id to that session's rolling
//! conversation summary. A summary is a bounded condensation of prior turns,
//! not a raw transcript: each completed turn is appended, and once the
//! serialized summary exceeds its token budget (counted with
//! `tiktoken_rs::cl100k_base`, as elsewhere in this crate) the whole thing is
//! re-summarized through the completion service.
//!
//! ## Guarantees
//! - At most one [`ConversationMemory`] per session id, even under concurrent
//!   first requests.
//! - Per-session turn folding is serialized by the memory's own async mutex;
//!   unrelated sessions never contend.
//! - The table is bounded: the least-recently-used session (never the
//!   `"default"` sentinel) is evicted once `max_sessions` is reached.
//! - Memory failures never fail a caller's turn. Lookup failures fall back to
//!   the shared default session (availability over isolation, a documented
//!   policy); summarization failures are logged and retried on the next turn.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tiktoken_rs::cl100k_base;
use tracing::{debug, error, info, warn};

use crate::api::{CompletionService, system_message, user_message};
use crate::config::DocentConfig;
use crate::error::{Error, ServiceError};

/// Sentinel session shared by every request that supplies no session id.
pub const DEFAULT_SESSION: &str = "default";

/// Instruction given to the summarizer model when the summary is over budget.
const SUMMARIZER_PROMPT: &str = "You condense chat transcripts. Rewrite the conversation notes \
you are given as one short summary that preserves every fact, question and answer topic \
mentioned, oldest first. Respond with the summary text only.";

struct SummaryState {
    summary: String,
    turns: u64,
}

/// One session's rolling summary. Never shared between two session ids.
pub struct ConversationMemory {
    session_id: String,
    state: tokio::sync::Mutex<SummaryState>,
}

impl ConversationMemory {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            state: tokio::sync::Mutex::new(SummaryState {
                summary: String::new(),
                turns: 0,
            }),
        }
    }

    /// The session id this memory belongs to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current rolling summary; empty string before the first recorded turn.
    pub async fn summary(&self) -> String {
        self.state.lock().await.summary.clone()
    }

    /// Number of completed turns folded into this memory.
    pub async fn turns(&self) -> u64 {
        self.state.lock().await.turns
    }
}

struct SessionEntry {
    memory: Arc<ConversationMemory>,
    last_used: Instant,
}

/// Process-wide session table plus the summarizer used to keep summaries
/// within budget.
pub struct SessionMemoryStore {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    summarizer: Arc<dyn CompletionService>,
    summary_max_tokens: usize,
    max_sessions: usize,
    request_timeout: Duration,
}

fn token_count(text: &str) -> usize {
    let bpe = cl100k_base().unwrap();
    bpe.encode_with_special_tokens(text).len()
}

impl SessionMemoryStore {
    /// Create a store backed by the given summarizer completion service.
    pub fn new(summarizer: Arc<dyn CompletionService>, config: &DocentConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            summarizer,
            summary_max_tokens: config.summary_max_tokens,
            max_sessions: config.max_sessions.max(1),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    /// Return the memory registered for `session_id`, creating it if absent.
    ///
    /// Creation is atomic: two concurrent first requests for the same id
    /// observe the same memory. Refreshes the id's recency; at capacity the
    /// least-recently-used session other than [`DEFAULT_SESSION`] is evicted.
    pub fn get_or_create(&self, session_id: &str) -> Result<Arc<ConversationMemory>, Error> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| Error::Memory("session table lock poisoned".to_string()))?;

        if let Some(entry) = sessions.get_mut(session_id) {
            entry.last_used = Instant::now();
            return Ok(Arc::clone(&entry.memory));
        }

        if sessions.len() >= self.max_sessions {
            let victim = sessions
                .iter()
                .filter(|(id, _)| id.as_str() != DEFAULT_SESSION)
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| id.clone());
            if let Some(victim) = victim {
                sessions.remove(&victim);
                info!("evicted least-recently-used session {victim}");
            }
        }

        let memory = Arc::new(ConversationMemory::new(session_id));
        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                memory: Arc::clone(&memory),
                last_used: Instant::now(),
            },
        );
        debug!("created memory for session {session_id}");

        Ok(memory)
    }

    /// Pipeline-facing lookup implementing the fallback policy.
    ///
    /// If the session's memory cannot be resolved, the request is served with
    /// the shared default session's memory instead of failing; if even that
    /// fails, a detached memory keeps the turn alive without isolation.
    pub fn resolve(&self, session_id: &str) -> Arc<ConversationMemory> {
        match self.get_or_create(session_id) {
            Ok(memory) => memory,
            Err(err) => {
                warn!("memory lookup for session {session_id} failed ({err}), falling back to the default session");
                match self.get_or_create(DEFAULT_SESSION) {
                    Ok(memory) => memory,
                    Err(err) => {
                        error!("default session memory unavailable ({err}), serving a detached memory");
                        Arc::new(ConversationMemory::new(session_id))
                    }
                }
            }
        }
    }

    /// Current summary for `memory`; empty string if nothing is recorded yet.
    pub async fn load_summary(&self, memory: &ConversationMemory) -> String {
        memory.summary().await
    }

    /// Fold a completed turn into the session's summary.
    ///
    /// Appends the question/answer pair, then re-summarizes through the
    /// summarizer model if the token budget is exceeded. Errors are logged
    /// and swallowed: a memory update failure must never invalidate an
    /// already-delivered answer. If the summarizer fails while over budget,
    /// the un-condensed text is kept and condensation retried next turn.
    pub async fn record_turn(&self, memory: &ConversationMemory, question: &str, answer: &str) {
        let mut state = memory.state.lock().await;

        let turn = format!("User: {question}\nAssistant: {answer}");
        let candidate = if state.summary.is_empty() {
            turn
        } else {
            format!("{}\n{}", state.summary, turn)
        };

        let folded = if token_count(&candidate) > self.summary_max_tokens {
            match self.condense(&candidate).await {
                Ok(summary) => summary,
                Err(err) => {
                    warn!(
                        "summarization failed for session {} ({err}), keeping uncondensed summary until next turn",
                        memory.session_id()
                    );
                    candidate
                }
            }
        } else {
            candidate
        };

        state.summary = folded;
        state.turns += 1;
        debug!(
            "recorded turn {} for session {}",
            state.turns,
            memory.session_id()
        );
    }

    async fn condense(&self, transcript: &str) -> Result<String, ServiceError> {
        let messages = vec![
            system_message(SUMMARIZER_PROMPT),
            user_message(transcript.to_string()),
        ];

        let completion = self
            .summarizer
            .complete(messages, self.summary_max_tokens as u32);

        match tokio::time::timeout(self.request_timeout, completion).await {
            Ok(result) => result,
            Err(_) => Err(format!("summarizer timed out after {:?}", self.request_timeout).into()),
        }
    }
}
