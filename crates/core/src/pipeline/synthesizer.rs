//! Answer Synthesizer - Combines step answers into one final answer
//!
//! Builds a synthesis prompt from the non-failed steps in order and asks
//! the Generator for one coherent answer. Known generator failure mode:
//! stacked "Based on the analysis of..." prefixes; repeated leading
//! boilerplate is collapsed to a single occurrence before returning. If
//! every step failed there is nothing to synthesize, and a deterministic
//! insufficient-information answer is returned without a Generator call.

use crate::errors::Result;
use crate::pipeline::adapters::{GenerationParams, Generator};
use crate::pipeline::types::PipelineContext;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::debug;

/// Deterministic answer when no step produced information
pub const INSUFFICIENT_INFORMATION: &str =
    "Insufficient information: no supporting evidence could be retrieved for this question.";

/// Synthesizer calling the Generator collaborator
pub struct AnswerSynthesizer {
    generator: Arc<dyn Generator>,
}

impl AnswerSynthesizer {
    /// Create a new synthesizer
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Produce the final answer from the context's step log
    pub async fn synthesize(
        &self,
        ctx: &mut PipelineContext,
        params: &GenerationParams,
        deadline: Duration,
    ) -> Result<String> {
        let usable: Vec<_> = ctx.steps().iter().filter(|s| !s.is_failed()).collect();

        if usable.is_empty() {
            debug!("All reasoning steps failed, returning deterministic outcome");
            return Ok(INSUFFICIENT_INFORMATION.to_string());
        }

        let mut prompt = format!(
            "Combine the findings below into one coherent answer to the \
            question. Note where a part of the question could not be \
            answered. Do not restate the sub-questions.\n\n\
            Question: {}\n\nFindings:\n",
            ctx.question
        );
        for (i, step) in usable.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. {}\n   {}\n",
                i + 1,
                step.sub_question,
                step.intermediate_answer
            ));
        }
        for step in ctx.steps().iter().filter(|s| s.is_failed()) {
            prompt.push_str(&format!(
                "(no information available for: {})\n",
                step.sub_question
            ));
        }
        prompt.push_str("\nAnswer:");

        let generation = self.generator.generate(&prompt, params, deadline).await?;
        ctx.tokens_used += generation.tokens_used;

        Ok(strip_repeated_boilerplate(generation.text.trim()))
    }
}

/// Boilerplate lead-in pattern, compiled once
fn boilerplate_prefix() -> &'static regex_lite::Regex {
    static PREFIX: OnceLock<regex_lite::Regex> = OnceLock::new();
    PREFIX.get_or_init(|| {
        regex_lite::Regex::new(r"^[Bb]ased on (the )?[A-Za-z \-]{0,60}[.,:]\s*")
            .expect("valid regex")
    })
}

/// Collapse stacked boilerplate prefixes ("Based on the analysis of...",
/// "Based on the provided context, ...") to a single occurrence
pub(crate) fn strip_repeated_boilerplate(text: &str) -> String {
    let prefix = boilerplate_prefix();

    let first = match prefix.find(text) {
        Some(m) if m.start() == 0 => m.end(),
        _ => return text.to_string(),
    };

    let mut rest = &text[first..];
    loop {
        match prefix.find(rest) {
            Some(m) if m.start() == 0 => rest = &rest[m.end()..],
            _ => break,
        }
    }

    format!("{}{}", &text[..first], rest)
}
