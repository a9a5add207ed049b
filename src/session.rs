//! In-memory conversation history, one log per user session.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::rag::RetrievedChunk;

pub const GREETING: &str =
    "Hi! I'm PokéGPT. Select your language from the sidebar and ask me anything!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    /// Base file name of the source document.
    pub source_id: String,
    pub excerpt: String,
}

impl Citation {
    pub fn from_chunk(hit: &RetrievedChunk) -> Self {
        let source_id = Path::new(hit.source_id())
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| hit.source_id().to_string());
        Self {
            source_id,
            excerpt: hit.chunk.text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub citations: Vec<Citation>,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            citations: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            citations,
            created_at: Utc::now(),
        }
    }

    pub fn greeting() -> Self {
        Self::assistant(GREETING, Vec::new())
    }
}

/// Append-only turn log. `clear` is the only operation that drops turns.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    id: String,
    turns: Vec<ConversationTurn>,
}

impl ConversationSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            turns: vec![ConversationTurn::greeting()],
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Resets to the single greeting turn.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.turns.push(ConversationTurn::greeting());
    }
}

pub type SharedSession = Arc<Mutex<ConversationSession>>;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub turn_count: usize,
}

/// Process-wide map of live sessions. Each session has its own lock, so
/// turns in different sessions never wait on each other.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SharedSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> SharedSession {
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Mutex::new(ConversationSession::new(id.clone())));
        self.sessions.write().await.insert(id, session.clone());
        session
    }

    pub async fn get(&self, id: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Returns the session for `id`, creating a fresh one when it is unknown
    /// or absent.
    pub async fn get_or_create(&self, id: Option<&str>) -> SharedSession {
        if let Some(id) = id {
            if let Some(session) = self.get(id).await {
                return session;
            }
        }
        self.create().await
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// Drops `id` if its history is still only the greeting and no turn holds
    /// it. Returns whether the session was removed.
    pub async fn remove_if_untouched(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let untouched = match sessions.get(id).map(|session| session.try_lock()) {
            Some(Ok(session)) => session.history().len() == 1,
            _ => false,
        };
        if untouched {
            sessions.remove(id);
        }
        untouched
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions: Vec<SharedSession> = self.sessions.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(sessions.len());
        for session in sessions {
            let session = session.lock().await;
            summaries.push(SessionSummary {
                id: session.id().to_string(),
                turn_count: session.history().len(),
            });
        }
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }
}
