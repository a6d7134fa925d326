//! Context Window Builder - Bounded conversation summaries
//!
//! Builds the textual context reused as reasoning input across turns.
//! Every message is hard-truncated, assistant messages are reduced to
//! their leading lines with any embedded "context:" blocks discarded,
//! and accumulation stops at a total budget. Output length is
//! O(included_messages x max_message_chars) no matter how many turns
//! preceded it or how much quoted context a stored answer contains.

use crate::config::ContextWindowConfig;
use crate::errors::{PipelineError, Result};
use crate::session::{Message, MessageRole};

/// Builder for bounded conversation context strings
pub struct ContextWindowBuilder {
    config: ContextWindowConfig,
}

impl ContextWindowBuilder {
    /// Create a new builder
    pub fn new(config: ContextWindowConfig) -> Self {
        Self { config }
    }

    /// Build a bounded context string from a session's ordered messages
    ///
    /// Walks messages most-recent-first, so the newest turns survive when
    /// the budget runs out, and emits the survivors in chronological
    /// order.
    pub fn build(&self, messages: &[Message]) -> Result<String> {
        if self.config.max_message_chars == 0 {
            return Err(PipelineError::Configuration {
                message: "max_message_chars must be positive".to_string(),
            });
        }

        let mut included: Vec<String> = Vec::new();
        let mut total = 0usize;

        for message in messages.iter().rev() {
            let content = match message.role {
                MessageRole::User => message.content.trim().to_string(),
                MessageRole::Assistant => self.assistant_head(&message.content),
            };
            let content = truncate_chars(&content, self.config.max_message_chars);
            if content.is_empty() {
                continue;
            }

            let label = match message.role {
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
            };
            let line = format!("{}: {}", label, content);

            if total + line.len() + 1 > self.config.max_total_chars {
                break;
            }
            total += line.len() + 1;
            included.push(line);
        }

        included.reverse();
        let out = included.join("\n");

        // Guaranteed by the per-line check above. If this trips, the
        // configuration is broken and must not be truncated silently.
        if out.len() > self.config.max_total_chars {
            return Err(PipelineError::ContextOverflow {
                length: out.len(),
                limit: self.config.max_total_chars,
            });
        }

        Ok(out)
    }

    /// First logical lines of an assistant message, with embedded
    /// "context:"-style metadata blocks discarded so earlier context is
    /// never re-included through a later answer.
    fn assistant_head(&self, content: &str) -> String {
        let mut kept: Vec<&str> = Vec::new();
        let mut in_context_block = false;

        for line in content.lines() {
            let trimmed = line.trim();
            if in_context_block {
                if trimmed.is_empty() {
                    in_context_block = false;
                }
                continue;
            }
            if is_context_marker(trimmed) {
                in_context_block = true;
                continue;
            }
            if trimmed.is_empty() {
                continue;
            }
            kept.push(trimmed);
            if kept.len() >= self.config.assistant_head_lines {
                break;
            }
        }

        kept.join(" ")
    }
}

/// A line that begins an embedded context/metadata block
fn is_context_marker(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.starts_with("context:")
        || lower.starts_with("[context]")
        || lower.starts_with("previous context:")
}

/// Char-boundary-safe truncation
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn builder() -> ContextWindowBuilder {
        ContextWindowBuilder::new(AppConfig::default().context_window)
    }

    #[test]
    fn test_per_message_truncation() {
        let b = builder();
        let messages = vec![Message::user("x".repeat(5000))];
        let out = b.build(&messages).unwrap();
        // "user: " + 200 chars
        assert!(out.len() <= 206);
    }

    #[test]
    fn test_output_bounded_for_many_long_messages() {
        let b = builder();
        let config = AppConfig::default().context_window;
        let messages: Vec<Message> = (0..200)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user("u".repeat(3000))
                } else {
                    Message::assistant("a".repeat(3000))
                }
            })
            .collect();
        let out = b.build(&messages).unwrap();
        assert!(out.len() <= config.max_total_chars);
    }

    #[test]
    fn test_recent_messages_survive() {
        let b = builder();
        let mut messages: Vec<Message> = (0..50)
            .map(|i| Message::user(format!("old question number {} {}", i, "p".repeat(190))))
            .collect();
        messages.push(Message::user("the newest question"));

        let out = b.build(&messages).unwrap();
        assert!(out.contains("the newest question"));
        assert!(out.ends_with("the newest question"));
    }

    #[test]
    fn test_embedded_context_block_discarded() {
        let b = builder();
        let assistant = "The answer is 42.\ncontext:\nuser: what was asked before\nassistant: an earlier answer\n\nMore detail here.";
        let messages = vec![Message::assistant(assistant)];
        let out = b.build(&messages).unwrap();
        assert!(out.contains("The answer is 42."));
        assert!(out.contains("More detail here."));
        assert!(!out.contains("what was asked before"));
        assert!(!out.contains("an earlier answer"));
    }

    #[test]
    fn test_no_growth_across_rebuild_cycles() {
        // Simulates the recursive-inclusion defect: each turn stores an
        // assistant message quoting the previous context. The built
        // context must stay bounded across many cycles.
        let b = builder();
        let config = AppConfig::default().context_window;
        let mut messages: Vec<Message> = vec![Message::user("seed question")];

        for turn in 0..20 {
            let context = b.build(&messages).unwrap();
            assert!(context.len() <= config.max_total_chars);
            let reply = format!("Answer {}.\ncontext:\n{}\n\nDone.", turn, context);
            messages.push(Message::assistant(reply));
            messages.push(Message::user(format!("follow-up {}", turn)));
        }
    }

    #[test]
    fn test_empty_history() {
        let b = builder();
        assert_eq!(b.build(&[]).unwrap(), "");
    }

    #[test]
    fn test_multibyte_truncation_is_char_safe() {
        let b = builder();
        let messages = vec![Message::user("é".repeat(400))];
        // Must not panic on a byte boundary inside a code point
        let out = b.build(&messages).unwrap();
        assert!(out.chars().count() <= 206);
    }
}
