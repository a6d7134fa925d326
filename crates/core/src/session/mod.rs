//! Conversation sessions and the store collaborator boundary
//!
//! The pipeline only ever reads messages via [`ConversationStore::list_messages`];
//! persisting the final answer back as a new message is the caller's job.
//! Past messages are immutable once appended.

use crate::errors::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Role of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A single conversation turn, immutable once appended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,

    pub content: String,

    pub created_at: DateTime<Utc>,

    /// Free-form metadata (model used, latency, etc.)
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            created_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            created_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// A conversation session owning an ordered sequence of messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,

    pub created_at: DateTime<Utc>,

    pub last_active_at: DateTime<Utc>,
}

/// External conversation store collaborator
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append a message to a session, creating the session on first use
    async fn append_message(&self, session_id: Uuid, message: Message) -> Result<()>;

    /// List a session's messages in append order
    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<Message>>;
}

/// In-memory conversation store for development and tests
#[derive(Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<Uuid, SessionRecord>>,
}

struct SessionRecord {
    session: Session,
    messages: Vec<Message>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session metadata, if the session exists
    pub async fn session(&self, session_id: Uuid) -> Option<Session> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .map(|r| r.session.clone())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn append_message(&self, session_id: Uuid, message: Message) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let record = sessions.entry(session_id).or_insert_with(|| SessionRecord {
            session: Session {
                id: session_id,
                created_at: now,
                last_active_at: now,
            },
            messages: Vec::new(),
        });
        record.session.last_active_at = now;
        record.messages.push(message);
        Ok(())
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
        let sessions = self.sessions.read().await;
        match sessions.get(&session_id) {
            Some(record) => Ok(record.messages.clone()),
            None => Ok(Vec::new()),
        }
    }
}

/// A store wrapper that fails every call, for exercising degraded paths
pub struct UnavailableStore {
    pub message: String,
}

#[async_trait]
impl ConversationStore for UnavailableStore {
    async fn append_message(&self, _session_id: Uuid, _message: Message) -> Result<()> {
        Err(PipelineError::Store {
            message: self.message.clone(),
        })
    }

    async fn list_messages(&self, _session_id: Uuid) -> Result<Vec<Message>> {
        Err(PipelineError::Store {
            message: self.message.clone(),
        })
    }
}
