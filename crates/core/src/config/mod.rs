//! Configuration management for the Inquest engine
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values
//!
//! Every numeric threshold the pipeline consults lives here and is
//! read-only after initialization; components receive the relevant
//! section at construction instead of reaching for ambient state.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Bounded conversation context settings
    pub context_window: ContextWindowConfig,

    /// Query classification heuristics
    pub classifier: ClassifierConfig,

    /// Question decomposition settings
    pub decomposer: DecomposerConfig,

    /// Step confidence scoring weights
    pub confidence: ConfidenceConfig,

    /// Retriever collaborator configuration
    pub retrieval: RetrievalConfig,

    /// Generator collaborator configuration
    pub generation: GenerationConfig,

    /// Pipeline-level budgets and defaults
    pub pipeline: PipelineConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContextWindowConfig {
    /// Total context budget in characters
    #[serde(default = "default_max_total_chars")]
    pub max_total_chars: usize,

    /// Hard per-message truncation length in characters
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    /// Leading logical lines kept from assistant messages
    #[serde(default = "default_assistant_head_lines")]
    pub assistant_head_lines: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifierConfig {
    /// Question length (characters) above which reasoning is assumed
    #[serde(default = "default_length_threshold")]
    pub length_threshold: usize,

    /// Clause count at which a question is treated as multi-clause
    #[serde(default = "default_min_clauses")]
    pub min_clauses: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecomposerConfig {
    /// Maximum sub-questions per decomposition (D)
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Generator attempts before degrading to the original question
    #[serde(default = "default_decompose_attempts")]
    pub max_attempts: usize,
}

/// Weights for the evidence-overlap confidence fallback, used when the
/// generator does not self-report a confidence. The exact formula is
/// deliberately configurable.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfidenceConfig {
    /// Weight of the average retrieval score
    #[serde(default = "default_evidence_weight")]
    pub evidence_weight: f32,

    /// Weight of the answer/evidence word-overlap ratio
    #[serde(default = "default_overlap_weight")]
    pub overlap_weight: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Retrieval service endpoint (None enables the static stub)
    pub endpoint: Option<String>,

    /// Evidence chunks requested per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Generation API endpoint
    #[serde(default = "default_generation_endpoint")]
    pub endpoint: String,

    /// API key (None enables the deterministic stub)
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Maximum output tokens per call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Default latency budget when the caller does not supply one (ms)
    #[serde(default = "default_max_latency_ms")]
    pub default_max_latency_ms: u64,

    /// Default maximum reasoning steps per invocation
    #[serde(default = "default_max_steps")]
    pub default_max_steps: usize,

    /// Characters of each prior answer carried into later step prompts
    #[serde(default = "default_carry_chars")]
    pub carried_answer_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_max_total_chars() -> usize { 1600 }
fn default_max_message_chars() -> usize { crate::DEFAULT_MESSAGE_TRUNCATION }
fn default_assistant_head_lines() -> usize { 2 }
fn default_length_threshold() -> usize { 160 }
fn default_min_clauses() -> usize { 2 }
fn default_max_depth() -> usize { 3 }
fn default_decompose_attempts() -> usize { 2 }
fn default_evidence_weight() -> f32 { 0.5 }
fn default_overlap_weight() -> f32 { 0.5 }
fn default_top_k() -> usize { 5 }
fn default_generation_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_generation_model() -> String { crate::DEFAULT_GENERATION_MODEL.to_string() }
fn default_max_tokens() -> usize { 1000 }
fn default_temperature() -> f32 { 0.2 }
fn default_max_latency_ms() -> u64 { 20_000 }
fn default_max_steps() -> usize { 5 }
fn default_carry_chars() -> usize { 400 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "inquest".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__PIPELINE__DEFAULT_MAX_STEPS=3
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate().map_err(ConfigError::Message)?;
        Ok(loaded)
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate().map_err(ConfigError::Message)?;
        Ok(loaded)
    }

    /// Reject configurations the pipeline cannot honor
    fn validate(&self) -> Result<(), String> {
        if self.context_window.max_message_chars == 0 {
            return Err("context_window.max_message_chars must be positive".to_string());
        }
        if self.context_window.max_total_chars < self.context_window.max_message_chars {
            return Err(
                "context_window.max_total_chars must be at least max_message_chars".to_string(),
            );
        }
        if self.decomposer.max_depth == 0 || self.decomposer.max_attempts == 0 {
            return Err("decomposer.max_depth and max_attempts must be positive".to_string());
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            context_window: ContextWindowConfig {
                max_total_chars: default_max_total_chars(),
                max_message_chars: default_max_message_chars(),
                assistant_head_lines: default_assistant_head_lines(),
            },
            classifier: ClassifierConfig {
                length_threshold: default_length_threshold(),
                min_clauses: default_min_clauses(),
            },
            decomposer: DecomposerConfig {
                max_depth: default_max_depth(),
                max_attempts: default_decompose_attempts(),
            },
            confidence: ConfidenceConfig {
                evidence_weight: default_evidence_weight(),
                overlap_weight: default_overlap_weight(),
            },
            retrieval: RetrievalConfig {
                endpoint: None,
                top_k: default_top_k(),
            },
            generation: GenerationConfig {
                endpoint: default_generation_endpoint(),
                api_key: None,
                model: default_generation_model(),
                max_tokens: default_max_tokens(),
                temperature: default_temperature(),
            },
            pipeline: PipelineConfig {
                default_max_latency_ms: default_max_latency_ms(),
                default_max_steps: default_max_steps(),
                carried_answer_chars: default_carry_chars(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
        }
    }
}
