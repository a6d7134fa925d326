//! Reasoning-and-Retrieval Pipeline
//!
//! The pipeline is the intelligence layer that decides whether a question
//! needs multi-step reasoning, decomposes it, interleaves retrieval with
//! incremental generation, tracks which sources support which claims, and
//! keeps accumulated conversation context bounded across turns. It
//! provides:
//! - Bounded context window construction
//! - Query intent classification
//! - Question decomposition
//! - Sequential reasoning step execution
//! - Source attribution and citation merging
//! - Answer synthesis
//! - Fallback-aware top-level orchestration

mod adapters;
mod attribution;
mod classifier;
mod context_window;
mod decomposer;
mod executor;
mod step_executor;
mod synthesizer;
mod types;

pub use adapters::{
    Generation, GenerationParams, Generator, HttpRetriever, OpenAiGenerator, RetrievalFilters,
    Retriever, ScriptedGenerator, ScriptedReply, StaticRetriever, StubGenerator,
};
pub use attribution::{MergedCitation, SourceAttributionTracker};
pub use classifier::{QueryClassifier, QueryIntentClassification, ReasonCode};
pub use context_window::ContextWindowBuilder;
pub use decomposer::{Decomposition, QuestionDecomposer};
pub use executor::{PipelineExecutor, PipelineRequest, Stage};
pub use synthesizer::{AnswerSynthesizer, INSUFFICIENT_INFORMATION};
pub use types::{
    Citation, EvidenceChunk, FailureReason, PipelineBudget, PipelineContext, PipelineOutcome,
    PipelineStatus, ReasoningStep, StepState,
};
