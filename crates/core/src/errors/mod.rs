//! Error types for the Inquest pipeline
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for each pipeline failure mode
//! - Machine-readable error codes
//! - A clear split between step-level errors (absorbed and recorded)
//!   and pipeline-level errors (surfaced as a structured outcome)

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,

    // Pipeline stage errors (2xxx)
    ClassificationError,
    DecompositionError,
    RetrievalError,
    GenerationError,
    SynthesisError,

    // Budget errors (3xxx)
    BudgetExceeded,
    ContextOverflow,

    // Collaborator errors (4xxx)
    StoreError,
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,

            ErrorCode::ClassificationError => 2001,
            ErrorCode::DecompositionError => 2002,
            ErrorCode::RetrievalError => 2003,
            ErrorCode::GenerationError => 2004,
            ErrorCode::SynthesisError => 2005,

            ErrorCode::BudgetExceeded => 3001,
            ErrorCode::ContextOverflow => 3002,

            ErrorCode::StoreError => 4001,
            ErrorCode::UpstreamError => 4002,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Pipeline error types
///
/// Step-level failures (retrieval/generation inside a reasoning step) are
/// retried once and then absorbed into a FAILED step; only the variants
/// below that escape a stage reach the fallback controller, and none of
/// them escape `run_pipeline` itself.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// Never fatal: the executor defaults to the standard path.
    #[error("Classification failed: {message}")]
    Classification { message: String },

    #[error("Decomposition failed: {message}")]
    Decomposition { message: String },

    #[error("Retrieval failed: {message}")]
    Retrieval { message: String },

    #[error("Retrieval deadline of {deadline_ms}ms exceeded")]
    RetrievalTimeout { deadline_ms: u64 },

    #[error("Generation failed: {message}")]
    Generation { message: String },

    #[error("Generation deadline of {deadline_ms}ms exceeded")]
    GenerationTimeout { deadline_ms: u64 },

    #[error("More than half of reasoning steps failed: {failed} of {total}")]
    StepsFailed { failed: usize, total: usize },

    #[error("Latency budget exceeded: {elapsed_ms}ms elapsed of {budget_ms}ms")]
    BudgetExceeded { elapsed_ms: u64, budget_ms: u64 },

    /// Prevented by construction in the context window builder; if it
    /// occurs anyway the configuration is broken and the pipeline must
    /// not silently truncate further.
    #[error("Context overflow: built {length} chars against a limit of {limit}")]
    ContextOverflow { length: usize, limit: usize },

    #[error("Conversation store error: {message}")]
    Store { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::Validation { .. } => ErrorCode::ValidationError,
            PipelineError::Classification { .. } => ErrorCode::ClassificationError,
            PipelineError::Decomposition { .. } => ErrorCode::DecompositionError,
            PipelineError::Retrieval { .. } | PipelineError::RetrievalTimeout { .. } => {
                ErrorCode::RetrievalError
            }
            PipelineError::Generation { .. } | PipelineError::GenerationTimeout { .. } => {
                ErrorCode::GenerationError
            }
            PipelineError::StepsFailed { .. } => ErrorCode::SynthesisError,
            PipelineError::BudgetExceeded { .. } => ErrorCode::BudgetExceeded,
            PipelineError::ContextOverflow { .. } => ErrorCode::ContextOverflow,
            PipelineError::Store { .. } => ErrorCode::StoreError,
            PipelineError::HttpClient(_) => ErrorCode::UpstreamError,
            PipelineError::Internal { .. } => ErrorCode::InternalError,
            PipelineError::Configuration { .. } => ErrorCode::ConfigurationError,
            PipelineError::Serialization(_) => ErrorCode::SerializationError,
            PipelineError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Errors that a reasoning step absorbs into a FAILED record instead
    /// of propagating.
    pub fn is_step_level(&self) -> bool {
        matches!(
            self,
            PipelineError::Retrieval { .. }
                | PipelineError::RetrievalTimeout { .. }
                | PipelineError::Generation { .. }
                | PipelineError::GenerationTimeout { .. }
        )
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Internal {
            message: err.to_string(),
        }
    }
}
