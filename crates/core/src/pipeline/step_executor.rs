//! Reasoning Step Executor - Retrieve/generate one sub-question
//!
//! Drives a single sub-question through
//! `PENDING -> RETRIEVING -> GENERATING -> DONE | FAILED`. The auxiliary
//! context for retrieval and generation comes from the step log, never
//! from the raw conversation context, so the two cannot inflate each
//! other. Either external call gets one retry with a shortened prompt;
//! a step that still fails is recorded with zero confidence and an
//! empty answer rather than aborting the pipeline.

use crate::config::{ConfidenceConfig, PipelineConfig, RetrievalConfig};
use crate::metrics;
use crate::pipeline::adapters::{GenerationParams, Generator, Retriever};
use crate::pipeline::types::{Citation, EvidenceChunk, PipelineContext, ReasoningStep, StepState};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Executor for individual reasoning steps
pub struct ReasoningStepExecutor {
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    top_k: usize,
    confidence: ConfidenceConfig,
    carried_answer_chars: usize,
}

impl ReasoningStepExecutor {
    /// Create a new step executor
    pub fn new(
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        retrieval: &RetrievalConfig,
        confidence: ConfidenceConfig,
        pipeline: &PipelineConfig,
    ) -> Self {
        Self {
            retriever,
            generator,
            top_k: retrieval.top_k,
            confidence,
            carried_answer_chars: pipeline.carried_answer_chars,
        }
    }

    /// Execute one sub-question, appending the resulting step (and its
    /// citations, when successful) to the context. Returns the terminal
    /// state.
    pub async fn execute(
        &self,
        ctx: &mut PipelineContext,
        step_index: usize,
        sub_question: &str,
        params: &GenerationParams,
    ) -> StepState {
        let started = Instant::now();

        // RETRIEVING
        let chunks = match self.retrieve_with_retry(ctx, sub_question).await {
            Some(chunks) => chunks,
            None => {
                ctx.push_step(ReasoningStep::failed(sub_question, vec![]));
                metrics::record_step("failed", started.elapsed().as_secs_f64());
                return StepState::Failed;
            }
        };
        let evidence_ids: Vec<_> = chunks.iter().map(|c| c.document_id).collect();

        // GENERATING
        let generation = match self
            .generate_with_retry(ctx, sub_question, &chunks, params)
            .await
        {
            Some(generation) => generation,
            None => {
                ctx.push_step(ReasoningStep::failed(sub_question, evidence_ids));
                metrics::record_step("failed", started.elapsed().as_secs_f64());
                return StepState::Failed;
            }
        };
        ctx.tokens_used += generation.tokens_used;

        let (answer, reported) = split_confidence_trailer(&generation.text);
        let confidence = reported
            .unwrap_or_else(|| overlap_confidence(&answer, &chunks, &self.confidence))
            .clamp(0.0, 1.0);

        for chunk in &chunks {
            ctx.attribution.insert(Citation::from_chunk(chunk, step_index));
        }

        ctx.push_step(ReasoningStep {
            sub_question: sub_question.to_string(),
            evidence_ids,
            intermediate_answer: answer,
            confidence,
            state: StepState::Done,
        });

        metrics::record_step("done", started.elapsed().as_secs_f64());
        StepState::Done
    }

    /// Retrieve with the accumulated findings as auxiliary context,
    /// retrying once with the bare sub-question
    async fn retrieve_with_retry(
        &self,
        ctx: &PipelineContext,
        sub_question: &str,
    ) -> Option<Vec<EvidenceChunk>> {
        let aux = ctx.accumulated_answers(self.carried_answer_chars);
        let query = if aux.is_empty() {
            sub_question.to_string()
        } else {
            format!("{}\n\nKnown so far:\n{}", sub_question, aux)
        };

        let deadline = ctx.remaining_budget()?;
        match self
            .retriever
            .retrieve(&query, self.top_k, None, deadline)
            .await
        {
            Ok(chunks) => Some(chunks),
            Err(e) => {
                warn!(sub_question, error = %e, "Retrieval failed, retrying with shortened query");
                let deadline = ctx.remaining_budget()?;
                match self
                    .retriever
                    .retrieve(sub_question, self.top_k, None, deadline)
                    .await
                {
                    Ok(chunks) => Some(chunks),
                    Err(e) => {
                        warn!(sub_question, error = %e, "Retrieval failed after retry");
                        None
                    }
                }
            }
        }
    }

    /// Generate with full evidence, retrying once with the oldest
    /// retrieved chunk dropped
    async fn generate_with_retry(
        &self,
        ctx: &PipelineContext,
        sub_question: &str,
        chunks: &[EvidenceChunk],
        params: &GenerationParams,
    ) -> Option<crate::pipeline::adapters::Generation> {
        let prompt = self.build_prompt(ctx, sub_question, chunks);
        let deadline = ctx.remaining_budget()?;

        match self.generator.generate(&prompt, params, deadline).await {
            Ok(generation) => Some(generation),
            Err(e) => {
                warn!(sub_question, error = %e, "Generation failed, retrying with shortened prompt");
                let shortened = if chunks.is_empty() { chunks } else { &chunks[1..] };
                let prompt = self.build_prompt(ctx, sub_question, shortened);
                let deadline = ctx.remaining_budget()?;
                match self.generator.generate(&prompt, params, deadline).await {
                    Ok(generation) => Some(generation),
                    Err(e) => {
                        warn!(sub_question, error = %e, "Generation failed after retry");
                        None
                    }
                }
            }
        }
    }

    /// Build the per-step generation prompt from the sub-question,
    /// evidence excerpts, and prior step answers
    fn build_prompt(
        &self,
        ctx: &PipelineContext,
        sub_question: &str,
        chunks: &[EvidenceChunk],
    ) -> String {
        let mut prompt = format!(
            "You are answering one part of a larger question.\n\n\
            Sub-question: {}\n\n",
            sub_question
        );

        if chunks.is_empty() {
            prompt.push_str("Evidence: none retrieved.\n");
        } else {
            prompt.push_str("Evidence:\n");
            for (i, chunk) in chunks.iter().enumerate() {
                prompt.push_str(&format!(
                    "[{}] (score {:.2}) {}\n",
                    i + 1,
                    chunk.score,
                    chunk.excerpt
                ));
            }
        }

        let prior = ctx.accumulated_answers(self.carried_answer_chars);
        if !prior.is_empty() {
            prompt.push_str(&format!("\nFindings from earlier steps:\n{}\n", prior));
        }

        prompt.push_str(
            "\nAnswer the sub-question using only the evidence above. \
            If the evidence is insufficient, say so. Finish with a line \
            \"CONFIDENCE: <value between 0 and 1>\".\n\nAnswer:",
        );
        prompt
    }
}

/// Split a trailing "CONFIDENCE: x" line off the generated answer
fn split_confidence_trailer(text: &str) -> (String, Option<f32>) {
    let trimmed = text.trim();
    for marker in ["CONFIDENCE:", "Confidence:", "confidence:"] {
        if let Some(pos) = trimmed.rfind(marker) {
            let value = trimmed[pos + marker.len()..].trim();
            if let Ok(confidence) = value.parse::<f32>() {
                return (trimmed[..pos].trim().to_string(), Some(confidence));
            }
        }
    }
    (trimmed.to_string(), None)
}

/// Evidence-overlap fallback: blends the average retrieval score with
/// the fraction of distinct answer words present in the evidence
fn overlap_confidence(answer: &str, chunks: &[EvidenceChunk], config: &ConfidenceConfig) -> f32 {
    if answer.is_empty() || chunks.is_empty() {
        return 0.0;
    }

    let avg_score = (chunks.iter().map(|c| c.score).sum::<f32>() / chunks.len() as f32)
        .clamp(0.0, 1.0);

    let evidence_text: String = chunks
        .iter()
        .map(|c| c.excerpt.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    let answer_words: HashSet<String> = answer
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| w.len() > 3)
        .collect();

    let overlap = if answer_words.is_empty() {
        0.0
    } else {
        let hits = answer_words
            .iter()
            .filter(|w| evidence_text.contains(w.as_str()))
            .count();
        hits as f32 / answer_words.len() as f32
    };

    (config.evidence_weight * avg_score + config.overlap_weight * overlap).clamp(0.0, 1.0)
}
