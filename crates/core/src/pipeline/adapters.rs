//! Retriever / Generator adapters
//!
//! Thin typed seams around the external retrieval and generation
//! collaborators. Every call takes an explicit deadline derived from the
//! per-pipeline latency budget; on expiry the in-flight request is
//! cancelled (dropping the future aborts the HTTP call), and the caller
//! sees a timeout error it can retry or absorb.

use crate::config::{GenerationConfig, RetrievalConfig};
use crate::errors::{PipelineError, Result};
use crate::metrics;
use crate::pipeline::types::EvidenceChunk;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Optional retrieval scoping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalFilters {
    /// Restrict to a named collection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    /// Restrict to specific documents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<Uuid>>,
}

/// External retrieval collaborator. Implementations must be idempotent
/// for retries and safely cancellable.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&RetrievalFilters>,
        deadline: Duration,
    ) -> Result<Vec<EvidenceChunk>>;
}

/// Generation request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: usize,

    pub temperature: f32,

    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

impl From<&GenerationConfig> for GenerationParams {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stop_sequences: Vec::new(),
        }
    }
}

/// Completed generation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,

    pub tokens_used: usize,
}

/// Run a collaborator call under its deadline. On expiry the future is
/// dropped, which aborts the in-flight request, and the given timeout
/// error is returned instead.
pub(crate) async fn with_deadline<T, F>(
    deadline: Duration,
    fut: F,
    timeout_err: fn(u64) -> PipelineError,
) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(timeout_err(deadline.as_millis() as u64)),
    }
}

/// External generation collaborator. Only the completed-text contract is
/// required; streaming backends must join before returning.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        deadline: Duration,
    ) -> Result<Generation>;
}

// ---------------------------------------------------------------------
// HTTP retriever
// ---------------------------------------------------------------------

/// HTTP client for a retrieval service endpoint
pub struct HttpRetriever {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    query: &'a str,
    top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<&'a RetrievalFilters>,
}

#[derive(Deserialize)]
struct RetrieveResponse {
    chunks: Vec<EvidenceChunk>,
}

impl HttpRetriever {
    /// Create a new retriever client
    pub fn new(config: &RetrievalConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| PipelineError::Configuration {
                message: "retrieval.endpoint is not set".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, endpoint })
    }

    async fn request(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&RetrievalFilters>,
    ) -> Result<Vec<EvidenceChunk>> {
        let request = RetrieveRequest {
            query,
            top_k,
            filters,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Retrieval {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Retrieval {
                message: format!("Retrieval service error {}: {}", status, body),
            });
        }

        let parsed: RetrieveResponse =
            response.json().await.map_err(|e| PipelineError::Retrieval {
                message: format!("Failed to parse retrieval response: {}", e),
            })?;

        Ok(parsed.chunks)
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&RetrievalFilters>,
        deadline: Duration,
    ) -> Result<Vec<EvidenceChunk>> {
        let start = Instant::now();
        let result = with_deadline(deadline, self.request(query, top_k, filters), |deadline_ms| {
            PipelineError::RetrievalTimeout { deadline_ms }
        })
        .await;

        metrics::record_retrieval(start.elapsed().as_secs_f64(), result.is_ok());
        result
    }
}

// ---------------------------------------------------------------------
// OpenAI-compatible generator
// ---------------------------------------------------------------------

/// Chat-completions client for OpenAI-compatible generation APIs
pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: usize,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: ChatUsage,
}

impl OpenAiGenerator {
    /// Create a new generator client
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| PipelineError::Configuration {
                message: "generation.api_key is not set".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
        })
    }

    async fn request(&self, prompt: &str, params: &GenerationParams) -> Result<Generation> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "You are a careful research assistant.".to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            stop: params.stop_sequences.clone(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Generation {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Generation {
                message: format!("Generation API error {}: {}", status, body),
            });
        }

        let parsed: ChatResponse =
            response.json().await.map_err(|e| PipelineError::Generation {
                message: format!("Failed to parse generation response: {}", e),
            })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PipelineError::Generation {
                message: "Empty response from generator".to_string(),
            })?;

        let tokens_used = if parsed.usage.total_tokens > 0 {
            parsed.usage.total_tokens
        } else {
            // Rough estimate: 1 token ~= 4 characters
            text.len() / 4
        };

        Ok(Generation { text, tokens_used })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        deadline: Duration,
    ) -> Result<Generation> {
        let start = Instant::now();
        let result = with_deadline(deadline, self.request(prompt, params), |deadline_ms| {
            PipelineError::GenerationTimeout { deadline_ms }
        })
        .await;

        let tokens = result.as_ref().map(|g| g.tokens_used).unwrap_or(0);
        metrics::record_generation(start.elapsed().as_secs_f64(), result.is_ok(), tokens);
        result
    }
}

// ---------------------------------------------------------------------
// Deterministic stubs (development and tests)
// ---------------------------------------------------------------------

/// Retriever returning a fixed corpus, for development and tests
pub struct StaticRetriever {
    chunks: Vec<EvidenceChunk>,
}

impl StaticRetriever {
    pub fn new(chunks: Vec<EvidenceChunk>) -> Self {
        Self { chunks }
    }

    pub fn empty() -> Self {
        Self { chunks: Vec::new() }
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(
        &self,
        _query: &str,
        top_k: usize,
        _filters: Option<&RetrievalFilters>,
        _deadline: Duration,
    ) -> Result<Vec<EvidenceChunk>> {
        Ok(self.chunks.iter().take(top_k).cloned().collect())
    }
}

/// Deterministic generator used when no API key is configured
pub struct StubGenerator;

#[async_trait]
impl Generator for StubGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParams,
        _deadline: Duration,
    ) -> Result<Generation> {
        // Echo the question line back so the output is traceable
        let question = prompt
            .lines()
            .find_map(|l| l.strip_prefix("Question: "))
            .unwrap_or("the question");
        let text = format!(
            "No generation backend is configured. A real backend would answer: {}",
            question
        );
        let tokens_used = text.len() / 4;
        Ok(Generation { text, tokens_used })
    }
}

/// One scripted generator reply
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail(String),
}

impl ScriptedReply {
    pub fn text(s: impl Into<String>) -> Self {
        ScriptedReply::Text(s.into())
    }

    pub fn fail(s: impl Into<String>) -> Self {
        ScriptedReply::Fail(s.into())
    }
}

/// Generator that replays a fixed reply sequence, for deterministic
/// pipeline tests. The last reply repeats once the script runs out.
pub struct ScriptedGenerator {
    replies: Vec<ScriptedReply>,
    cursor: Mutex<usize>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies,
            cursor: Mutex::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Number of calls consumed so far
    pub fn calls(&self) -> usize {
        *self.cursor.lock().expect("cursor lock poisoned")
    }

    /// Prompts seen so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock poisoned").clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParams,
        _deadline: Duration,
    ) -> Result<Generation> {
        self.prompts
            .lock()
            .expect("prompts lock poisoned")
            .push(prompt.to_string());
        let index = {
            let mut cursor = self.cursor.lock().expect("cursor lock poisoned");
            let index = *cursor;
            *cursor += 1;
            index
        };

        let reply = self
            .replies
            .get(index)
            .or_else(|| self.replies.last())
            .cloned()
            .ok_or_else(|| PipelineError::Generation {
                message: "Scripted generator has no replies".to_string(),
            })?;

        match reply {
            ScriptedReply::Text(text) => {
                let tokens_used = text.len() / 4;
                Ok(Generation { text, tokens_used })
            }
            ScriptedReply::Fail(message) => Err(PipelineError::Generation { message }),
        }
    }
}
