//! Error taxonomy for the query pipeline.
//!
//! The pipeline distinguishes four failure kinds:
//!
//! - [`Error::InvalidQuery`]: rejected before any external call is made.
//! - [`Error::Retrieval`]: embedding or vector-search failure. Fatal to the
//!   current request because no grounded answer is possible without retrieval.
//! - [`Error::Generation`]: completion failure. Fatal to the current request.
//! - [`Error::Memory`]: session lookup or summarization failure. Recovered
//!   locally (fallback to the default session, or skipped summarization) and
//!   never returned from [`Pipeline::answer`](crate::pipeline::Pipeline::answer).
//!
//! Service adapters surface their own failures as [`ServiceError`] trait
//! objects; the pipeline wraps them with the stage they occurred in so a
//! caller (and the logs) can tell an embedding timeout from a search failure.

use std::fmt;

use thiserror::Error;

/// Opaque failure produced by an external-service adapter.
pub type ServiceError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which retrieval step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStage {
    /// The query could not be embedded.
    Embedding,
    /// The vector index could not be searched.
    Search,
}

impl fmt::Display for RetrievalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalStage::Embedding => write!(f, "embedding"),
            RetrievalStage::Search => write!(f, "vector search"),
        }
    }
}

/// Top-level error returned by the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// The query was empty (or whitespace only) after trimming.
    #[error("query must not be empty")]
    InvalidQuery,

    /// Embedding or vector search failed; no answer was produced.
    #[error("retrieval failed during {stage}")]
    Retrieval {
        /// The retrieval step that failed.
        stage: RetrievalStage,
        /// Underlying adapter failure.
        #[source]
        source: ServiceError,
    },

    /// The completion service failed; no answer was produced.
    #[error("answer generation failed")]
    Generation(#[source] ServiceError),

    /// Session memory failure. Internal: the pipeline recovers from these
    /// via the fallback policy and never returns them to the caller.
    #[error("session memory error: {0}")]
    Memory(String),
}

impl Error {
    /// Wrap an adapter failure as a retrieval error for the given stage.
    pub fn retrieval(stage: RetrievalStage, source: ServiceError) -> Self {
        Error::Retrieval { stage, source }
    }
}
