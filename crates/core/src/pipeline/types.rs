//! Pipeline data model
//!
//! `PipelineContext` is the single mutable accumulator for one
//! invocation. Only `PipelineExecutor` constructs or discards one; every
//! other component receives it by reference and may read prior entries
//! and append new ones, never rewrite them. The append-only step log is
//! what keeps repeated turns from inflating prompts recursively.

use super::attribution::{MergedCitation, SourceAttributionTracker};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A unit of retrieved text returned by the Retriever collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceChunk {
    pub document_id: Uuid,

    pub excerpt: String,

    /// Retrieval relevance in [0, 1]
    pub score: f32,
}

/// A (document, excerpt, score) tuple justifying part of an answer,
/// as produced by a single reasoning step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: Uuid,

    pub excerpt: String,

    /// Relevance score in [0, 1]
    pub score: f32,

    /// Index of the reasoning step that retrieved this evidence
    pub source_step_index: usize,
}

impl Citation {
    pub fn from_chunk(chunk: &EvidenceChunk, step_index: usize) -> Self {
        Self {
            document_id: chunk.document_id,
            excerpt: chunk.excerpt.clone(),
            score: chunk.score,
            source_step_index: step_index,
        }
    }
}

/// Per-sub-question execution states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Retrieving,
    Generating,
    Done,
    Failed,
}

/// One entry in the append-only reasoning log, never mutated after
/// creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub sub_question: String,

    /// Documents whose excerpts were retrieved for this step
    pub evidence_ids: Vec<Uuid>,

    pub intermediate_answer: String,

    /// Confidence in [0, 1]; 0.0 for failed steps
    pub confidence: f32,

    /// Terminal state: `Done` or `Failed`
    pub state: StepState,
}

impl ReasoningStep {
    /// Record for a step whose retrieval or generation failed after its
    /// retry. Synthesis treats it as "no information available".
    pub fn failed(sub_question: impl Into<String>, evidence_ids: Vec<Uuid>) -> Self {
        Self {
            sub_question: sub_question.into(),
            evidence_ids,
            intermediate_answer: String::new(),
            confidence: 0.0,
            state: StepState::Failed,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.state == StepState::Failed
    }
}

/// Why a fallback or terminal failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InvalidRequest,
    DecompositionInvalid,
    TooManyFailedSteps,
    BudgetExceeded,
    ContextOverflow,
    RetrievalFailed,
    GenerationFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InvalidRequest => "invalid_request",
            FailureReason::DecompositionInvalid => "decomposition_invalid",
            FailureReason::TooManyFailedSteps => "too_many_failed_steps",
            FailureReason::BudgetExceeded => "budget_exceeded",
            FailureReason::ContextOverflow => "context_overflow",
            FailureReason::RetrievalFailed => "retrieval_failed",
            FailureReason::GenerationFailed => "generation_failed",
        }
    }
}

/// Per-invocation resource budget
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PipelineBudget {
    /// Wall-clock budget for the whole invocation
    pub max_latency_ms: u64,

    /// Maximum reasoning steps
    pub max_steps: usize,
}

impl PipelineBudget {
    pub fn max_latency(&self) -> Duration {
        Duration::from_millis(self.max_latency_ms)
    }
}

impl Default for PipelineBudget {
    fn default() -> Self {
        Self {
            max_latency_ms: 20_000,
            max_steps: 5,
        }
    }
}

/// Top-level pipeline states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Init,
    Classify,
    Standard,
    Reasoning,
    Synthesize,
    Fallback,
    Done,
    Failed,
}

/// Terminal value returned to the caller. Always returned, even on full
/// failure; errors never escape `run_pipeline`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub final_answer: String,

    /// Deduplicated citations, ordered by descending score
    pub citations: Vec<MergedCitation>,

    /// Reasoning steps behind the returned answer (0 on the standard path)
    pub steps_used: usize,

    /// True when the answer was produced via fallback
    pub degraded: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,

    pub processing_time_ms: u64,

    /// Tokens reported by the generator across all calls
    pub tokens_used: usize,
}

impl PipelineOutcome {
    /// Whether a usable answer was produced (possibly degraded)
    pub fn is_answered(&self) -> bool {
        !self.final_answer.is_empty()
    }
}

/// Mutable accumulator for a single invocation
pub struct PipelineContext {
    pub question: String,

    /// Bounded conversation context string
    pub conversation_context: String,

    sub_questions: Vec<String>,

    steps: Vec<ReasoningStep>,

    pub attribution: SourceAttributionTracker,

    pub budget: PipelineBudget,

    started_at: Instant,

    pub tokens_used: usize,

    pub status: PipelineStatus,

    pub final_answer: Option<String>,
}

impl PipelineContext {
    pub fn new(
        question: impl Into<String>,
        conversation_context: impl Into<String>,
        budget: PipelineBudget,
    ) -> Self {
        Self {
            question: question.into(),
            conversation_context: conversation_context.into(),
            sub_questions: Vec::new(),
            steps: Vec::new(),
            attribution: SourceAttributionTracker::new(),
            budget,
            started_at: Instant::now(),
            tokens_used: 0,
            status: PipelineStatus::Init,
            final_answer: None,
        }
    }

    pub fn set_sub_questions(&mut self, sub_questions: Vec<String>) {
        self.sub_questions = sub_questions;
    }

    pub fn sub_questions(&self) -> &[String] {
        &self.sub_questions
    }

    /// Append to the step log. Earlier entries are never rewritten.
    pub fn push_step(&mut self, step: ReasoningStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[ReasoningStep] {
        &self.steps
    }

    pub fn failed_step_count(&self) -> usize {
        self.steps.iter().filter(|s| s.is_failed()).count()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Remaining latency budget, or None once exhausted
    pub fn remaining_budget(&self) -> Option<Duration> {
        let max = self.budget.max_latency();
        let elapsed = self.elapsed();
        if elapsed >= max {
            None
        } else {
            Some(max - elapsed)
        }
    }

    /// Prior non-failed answers for use as auxiliary step context. Built
    /// from the step log, not the conversation context, and bounded by
    /// `carry_chars` per answer so later prompts cannot inflate.
    pub fn accumulated_answers(&self, carry_chars: usize) -> String {
        let mut out = String::new();
        for (idx, step) in self.steps.iter().enumerate() {
            if step.is_failed() {
                continue;
            }
            let answer: String = step.intermediate_answer.chars().take(carry_chars).collect();
            if answer.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("({}) {}: {}", idx + 1, step.sub_question, answer));
        }
        out
    }

    /// Discard answer-bearing accumulators before a fallback attempt.
    /// The step log itself is history and stays.
    pub fn reset_for_fallback(&mut self) {
        self.attribution = SourceAttributionTracker::new();
        self.final_answer = None;
        self.status = PipelineStatus::Fallback;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulated_answers_skip_failed_and_bound_length() {
        let mut ctx = PipelineContext::new("q", "", PipelineBudget::default());
        ctx.push_step(ReasoningStep {
            sub_question: "first".into(),
            evidence_ids: vec![],
            intermediate_answer: "a".repeat(1000),
            confidence: 0.8,
            state: StepState::Done,
        });
        ctx.push_step(ReasoningStep::failed("second", vec![]));

        let acc = ctx.accumulated_answers(100);
        assert!(acc.contains("first"));
        assert!(!acc.contains("second"));
        // one bounded answer plus its label
        assert!(acc.len() < 200);
    }

    #[test]
    fn test_remaining_budget_exhaustion() {
        let ctx = PipelineContext::new(
            "q",
            "",
            PipelineBudget {
                max_latency_ms: 0,
                max_steps: 3,
            },
        );
        assert!(ctx.remaining_budget().is_none());
    }

    #[test]
    fn test_failed_step_count() {
        let mut ctx = PipelineContext::new("q", "", PipelineBudget::default());
        ctx.push_step(ReasoningStep::failed("a", vec![]));
        ctx.push_step(ReasoningStep::failed("b", vec![]));
        assert_eq!(ctx.failed_step_count(), 2);
    }
}
