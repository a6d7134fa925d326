//! Query Classifier - Standard path vs. multi-step reasoning
//!
//! Pure, deterministic heuristics over the question text. Runs on every
//! request, so no network calls and no allocation-heavy work. An
//! explicit caller-supplied flag always wins over the heuristics.

use crate::config::ClassifierConfig;
use serde::{Deserialize, Serialize};

/// Connectives that signal a multi-part question
const MULTI_PART_CONNECTIVES: &[&str] = &[
    "compare",
    " vs ",
    " versus ",
    "difference between",
    "and then",
    "then explain",
    "as well as",
    "in addition to",
    "pros and cons",
    "relationship between",
];

/// Why the classifier chose its path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Caller-supplied flag; overrides every heuristic
    ExplicitFlag,
    /// Question contains a multi-part connective
    MultiPartConnective,
    /// Question has multiple clauses
    MultiClause,
    /// Question length above threshold
    LengthThreshold,
    /// No reasoning signal found
    DefaultStandard,
}

/// Classification result; not persisted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryIntentClassification {
    pub is_reasoning_required: bool,

    /// Confidence in [0, 1]
    pub confidence: f32,

    pub reason_code: ReasonCode,
}

/// Heuristic intent classifier
pub struct QueryClassifier {
    config: ClassifierConfig,
}

impl QueryClassifier {
    /// Create a new classifier
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Classify a question, optionally considering bounded context
    pub fn classify(
        &self,
        question: &str,
        _context: Option<&str>,
        explicit_flag: Option<bool>,
    ) -> QueryIntentClassification {
        if let Some(required) = explicit_flag {
            return QueryIntentClassification {
                is_reasoning_required: required,
                confidence: 1.0,
                reason_code: ReasonCode::ExplicitFlag,
            };
        }

        let lower = question.to_lowercase();

        if MULTI_PART_CONNECTIVES.iter().any(|c| lower.contains(c)) {
            return QueryIntentClassification {
                is_reasoning_required: true,
                confidence: 0.85,
                reason_code: ReasonCode::MultiPartConnective,
            };
        }

        if clause_count(&lower) >= self.config.min_clauses {
            return QueryIntentClassification {
                is_reasoning_required: true,
                confidence: 0.75,
                reason_code: ReasonCode::MultiClause,
            };
        }

        if question.chars().count() > self.config.length_threshold {
            return QueryIntentClassification {
                is_reasoning_required: true,
                confidence: 0.65,
                reason_code: ReasonCode::LengthThreshold,
            };
        }

        QueryIntentClassification {
            is_reasoning_required: false,
            confidence: 0.6,
            reason_code: ReasonCode::DefaultStandard,
        }
    }
}

/// Count clause-like segments: separate questions and
/// semicolon-delimited parts
fn clause_count(text: &str) -> usize {
    text.split(['?', ';'])
        .filter(|part| part.split_whitespace().count() >= 3)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn classifier() -> QueryClassifier {
        QueryClassifier::new(AppConfig::default().classifier)
    }

    #[test]
    fn test_simple_question_is_standard() {
        let c = classifier();
        let result = c.classify("What is attention?", None, None);
        assert!(!result.is_reasoning_required);
        assert_eq!(result.reason_code, ReasonCode::DefaultStandard);
    }

    #[test]
    fn test_comparison_needs_reasoning() {
        let c = classifier();
        let result = c.classify("Compare BERT and GPT for classification", None, None);
        assert!(result.is_reasoning_required);
        assert_eq!(result.reason_code, ReasonCode::MultiPartConnective);
    }

    #[test]
    fn test_multi_clause_needs_reasoning() {
        let c = classifier();
        let result = c.classify(
            "How do transformers scale? What limits their context length?",
            None,
            None,
        );
        assert!(result.is_reasoning_required);
        assert_eq!(result.reason_code, ReasonCode::MultiClause);
    }

    #[test]
    fn test_long_question_needs_reasoning() {
        let c = classifier();
        let long = format!("Explain {}", "the training dynamics of very large models ".repeat(6));
        let result = c.classify(&long, None, None);
        assert!(result.is_reasoning_required);
        assert_eq!(result.reason_code, ReasonCode::LengthThreshold);
    }

    #[test]
    fn test_explicit_flag_overrides_heuristics() {
        let c = classifier();

        let forced_off = c.classify("Compare BERT and GPT in detail", None, Some(false));
        assert!(!forced_off.is_reasoning_required);
        assert_eq!(forced_off.reason_code, ReasonCode::ExplicitFlag);
        assert_eq!(forced_off.confidence, 1.0);

        let forced_on = c.classify("What is X?", None, Some(true));
        assert!(forced_on.is_reasoning_required);
        assert_eq!(forced_on.reason_code, ReasonCode::ExplicitFlag);
    }

    #[test]
    fn test_deterministic() {
        let c = classifier();
        let a = c.classify("Compare X and Y, then explain Z", None, None);
        let b = c.classify("Compare X and Y, then explain Z", None, None);
        assert_eq!(a, b);
    }
}
