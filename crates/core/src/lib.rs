//! Inquest Core Library
//!
//! Shared code for the Inquest engine including:
//! - The reasoning-and-retrieval pipeline (classification, decomposition,
//!   step execution, attribution, synthesis, fallback control)
//! - Conversation store abstraction
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod config;
pub mod errors;
pub mod metrics;
pub mod pipeline;
pub mod session;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{PipelineError, Result};
pub use pipeline::{PipelineExecutor, PipelineOutcome, PipelineRequest};
pub use session::{ConversationStore, InMemoryStore, Message, MessageRole};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default per-message truncation length for bounded context (characters)
pub const DEFAULT_MESSAGE_TRUNCATION: usize = 200;

/// Default generation model
pub const DEFAULT_GENERATION_MODEL: &str = "gpt-4o-mini";
