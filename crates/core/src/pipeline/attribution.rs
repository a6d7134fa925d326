//! Source Attribution Tracker - Citation deduplication and merging
//!
//! Citations produced across reasoning steps are merged per document:
//! the highest-scoring excerpt wins, while every contributing step index
//! is preserved so the final answer can reference "supported by step 2
//! and step 4". Insertion is idempotent.

use crate::pipeline::types::Citation;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// A deduplicated citation covering one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedCitation {
    pub document_id: Uuid,

    /// Excerpt from the highest-scoring contribution
    pub excerpt: String,

    /// Highest score seen for this document
    pub score: f32,

    /// Every step that cited this document, ascending
    pub source_steps: BTreeSet<usize>,
}

impl MergedCitation {
    /// Earliest step that cited this document
    pub fn first_step(&self) -> usize {
        self.source_steps.iter().next().copied().unwrap_or(0)
    }
}

/// Tracker keyed by document id
#[derive(Debug, Default)]
pub struct SourceAttributionTracker {
    by_document: HashMap<Uuid, MergedCitation>,
}

impl SourceAttributionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one citation into the tracker
    pub fn insert(&mut self, citation: Citation) {
        match self.by_document.get_mut(&citation.document_id) {
            Some(existing) => {
                if citation.score > existing.score {
                    existing.score = citation.score;
                    existing.excerpt = citation.excerpt;
                }
                existing.source_steps.insert(citation.source_step_index);
            }
            None => {
                let mut source_steps = BTreeSet::new();
                source_steps.insert(citation.source_step_index);
                self.by_document.insert(
                    citation.document_id,
                    MergedCitation {
                        document_id: citation.document_id,
                        excerpt: citation.excerpt,
                        score: citation.score,
                        source_steps,
                    },
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_document.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_document.is_empty()
    }

    /// Merged citations ordered by descending score, ties broken by the
    /// first-seen step index. Stable and reproducible.
    pub fn merged(&self) -> Vec<MergedCitation> {
        let mut citations: Vec<MergedCitation> = self.by_document.values().cloned().collect();
        citations.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.first_step().cmp(&b.first_step()))
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        citations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(document_id: Uuid, score: f32, step: usize) -> Citation {
        Citation {
            document_id,
            excerpt: format!("excerpt scored {}", score),
            score,
            source_step_index: step,
        }
    }

    #[test]
    fn test_merge_keeps_higher_score_and_all_steps() {
        let mut tracker = SourceAttributionTracker::new();
        let doc = Uuid::new_v4();

        tracker.insert(citation(doc, 0.6, 1));
        tracker.insert(citation(doc, 0.9, 3));
        tracker.insert(citation(doc, 0.4, 0));

        let merged = tracker.merged();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].score, 0.9);
        assert_eq!(merged[0].excerpt, "excerpt scored 0.9");
        assert_eq!(
            merged[0].source_steps.iter().copied().collect::<Vec<_>>(),
            vec![0, 1, 3]
        );
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut tracker = SourceAttributionTracker::new();
        let doc = Uuid::new_v4();

        tracker.insert(citation(doc, 0.7, 2));
        let once = tracker.merged();

        tracker.insert(citation(doc, 0.7, 2));
        let twice = tracker.merged();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_ordering_by_score_then_first_step() {
        let mut tracker = SourceAttributionTracker::new();
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        let doc_c = Uuid::new_v4();

        tracker.insert(citation(doc_a, 0.8, 2));
        tracker.insert(citation(doc_b, 0.8, 0));
        tracker.insert(citation(doc_c, 0.95, 1));

        let merged = tracker.merged();
        assert_eq!(merged[0].document_id, doc_c);
        // Tie on score: earlier first-seen step wins
        assert_eq!(merged[1].document_id, doc_b);
        assert_eq!(merged[2].document_id, doc_a);
    }

    #[test]
    fn test_distinct_documents_not_merged() {
        let mut tracker = SourceAttributionTracker::new();
        tracker.insert(citation(Uuid::new_v4(), 0.5, 0));
        tracker.insert(citation(Uuid::new_v4(), 0.5, 0));
        assert_eq!(tracker.len(), 2);
    }
}
