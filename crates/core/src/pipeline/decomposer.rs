//! Question Decomposer - Splits complex questions into sub-questions
//!
//! One Generator call with a decomposition prompt, validated against
//! non-empty / pairwise-distinct / max-count constraints. Invalid output
//! gets one retry; after that the original question is returned as the
//! single sub-question and the result is flagged so the executor can
//! take the fallback edge.

use crate::config::DecomposerConfig;
use crate::errors::Result;
use crate::pipeline::adapters::{GenerationParams, Generator};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::warn;

/// Decomposition result
#[derive(Debug, Clone)]
pub struct Decomposition {
    /// Ordered sub-questions; 1..=max_depth items, pairwise distinct
    pub sub_questions: Vec<String>,

    /// True when validation failed on every attempt and the list is the
    /// original question
    pub fell_back: bool,
}

/// Decomposer calling the Generator collaborator
pub struct QuestionDecomposer {
    generator: Arc<dyn Generator>,
    config: DecomposerConfig,
}

impl QuestionDecomposer {
    /// Create a new decomposer
    pub fn new(generator: Arc<dyn Generator>, config: DecomposerConfig) -> Self {
        Self { generator, config }
    }

    /// Decompose a question into ordered sub-questions
    ///
    /// Never fails hard: generator errors and malformed output degrade
    /// to a single-item list equal to the original question.
    pub async fn decompose(
        &self,
        question: &str,
        context: &str,
        params: &GenerationParams,
        deadline: Duration,
    ) -> Result<Decomposition> {
        let prompt = self.build_prompt(question, context);

        for attempt in 1..=self.config.max_attempts {
            match self.generator.generate(&prompt, params, deadline).await {
                Ok(generation) => {
                    let candidates = parse_sub_questions(&generation.text);
                    if let Some(valid) = self.validate(candidates) {
                        return Ok(Decomposition {
                            sub_questions: valid,
                            fell_back: false,
                        });
                    }
                    warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        "Decomposition output failed validation"
                    );
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = %e,
                        "Decomposition generator call failed"
                    );
                }
            }
        }

        Ok(Decomposition {
            sub_questions: vec![question.to_string()],
            fell_back: true,
        })
    }

    fn build_prompt(&self, question: &str, context: &str) -> String {
        let mut prompt = format!(
            "Break the question below into at most {} ordered sub-questions, \
            each answerable on its own. Write one sub-question per line and \
            nothing else.\n\n",
            self.config.max_depth
        );

        if !context.is_empty() {
            prompt.push_str(&format!("Conversation so far:\n{}\n\n", context));
        }

        prompt.push_str(&format!("Question: {}\n\nSub-questions:\n", question));
        prompt
    }

    /// Enforce the 1..=max_depth / non-empty / distinct constraints
    fn validate(&self, candidates: Vec<String>) -> Option<Vec<String>> {
        if candidates.is_empty() || candidates.len() > self.config.max_depth {
            return None;
        }

        let mut seen: HashSet<String> = HashSet::new();
        for candidate in &candidates {
            if candidate.is_empty() {
                return None;
            }
            if !seen.insert(candidate.to_lowercase()) {
                return None;
            }
        }

        Some(candidates)
    }
}

/// List numbering and bullet prefixes, compiled once
fn list_marker() -> &'static regex_lite::Regex {
    static MARKER: OnceLock<regex_lite::Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        regex_lite::Regex::new(r"^\s*(?:\d+[.)]\s*|[-*]\s+)").expect("valid regex")
    })
}

/// Parse generator output into candidate sub-questions, stripping list
/// numbering and bullets
fn parse_sub_questions(text: &str) -> Vec<String> {
    let marker = list_marker();

    text.lines()
        .map(|line| marker.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::pipeline::adapters::{ScriptedGenerator, ScriptedReply};

    fn params() -> GenerationParams {
        GenerationParams {
            max_tokens: 200,
            temperature: 0.0,
            stop_sequences: vec![],
        }
    }

    fn decomposer(replies: Vec<ScriptedReply>) -> QuestionDecomposer {
        QuestionDecomposer::new(
            Arc::new(ScriptedGenerator::new(replies)),
            AppConfig::default().decomposer,
        )
    }

    #[tokio::test]
    async fn test_valid_decomposition() {
        let d = decomposer(vec![ScriptedReply::text(
            "1. What is X?\n2. What is Y?\n3. How do X and Y differ?",
        )]);
        let result = d
            .decompose("Compare X and Y", "", &params(), Duration::from_secs(1))
            .await
            .unwrap();

        assert!(!result.fell_back);
        assert_eq!(result.sub_questions.len(), 3);
        assert_eq!(result.sub_questions[0], "What is X?");
        assert_eq!(result.sub_questions[2], "How do X and Y differ?");
    }

    #[tokio::test]
    async fn test_retry_after_invalid_output() {
        // First reply duplicates a sub-question (case-insensitive);
        // second is valid.
        let d = decomposer(vec![
            ScriptedReply::text("What is X?\nWHAT IS X?"),
            ScriptedReply::text("What is X?\nWhat is Y?"),
        ]);
        let result = d
            .decompose("Compare X and Y", "", &params(), Duration::from_secs(1))
            .await
            .unwrap();

        assert!(!result.fell_back);
        assert_eq!(result.sub_questions.len(), 2);
    }

    #[tokio::test]
    async fn test_two_invalid_attempts_fall_back() {
        let d = decomposer(vec![
            ScriptedReply::text(""),
            ScriptedReply::text("a\nb\nc\nd\ne\nf"),
        ]);
        let result = d
            .decompose(
                "Compare X and Y, then explain Z",
                "",
                &params(),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert!(result.fell_back);
        assert_eq!(
            result.sub_questions,
            vec!["Compare X and Y, then explain Z".to_string()]
        );
    }

    #[tokio::test]
    async fn test_generator_failures_fall_back() {
        let d = decomposer(vec![
            ScriptedReply::fail("timeout"),
            ScriptedReply::fail("timeout"),
        ]);
        let result = d
            .decompose("Compare X and Y", "", &params(), Duration::from_secs(1))
            .await
            .unwrap();

        assert!(result.fell_back);
        assert_eq!(result.sub_questions.len(), 1);
    }

    #[tokio::test]
    async fn test_output_never_exceeds_max_depth() {
        let config = AppConfig::default().decomposer;
        let d = decomposer(vec![
            ScriptedReply::text("a?\nb?\nc?\nd?\ne?"),
            ScriptedReply::text("a?\nb?\nc?\nd?\ne?"),
        ]);
        let result = d
            .decompose("Long question", "", &params(), Duration::from_secs(1))
            .await
            .unwrap();

        // 5 candidates exceed max_depth of 3, so both attempts are
        // invalid and the fallback single-item list is returned.
        assert!(result.sub_questions.len() <= config.max_depth.max(1));
        assert!(result.fell_back);
    }

    #[test]
    fn test_parse_strips_numbering_and_bullets() {
        let parsed = parse_sub_questions("1. First?\n2) Second?\n- Third?\n* Fourth?\n\n");
        assert_eq!(parsed, vec!["First?", "Second?", "Third?", "Fourth?"]);
    }
}
