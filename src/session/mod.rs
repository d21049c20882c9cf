//! Session registry
//!
//! A session is the in-memory, rehydratable cache of one conversation's
//! transcript plus the lock that serializes turns against it. Sessions are
//! created lazily, live for the process lifetime, and are removed only by an
//! explicit clear. Durability lives in the caller's conversation store; a
//! session can always be rebuilt from (persisted summary, recent messages).

use crate::transcript::Transcript;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One conversation's resident state.
///
/// The mutex is the per-session serialization point: a turn holds it from
/// lock acquisition until compaction finishes, so transcript mutations from
/// different turns never interleave. `None` means "not hydrated yet" — the
/// next turn rebuilds the transcript from persisted state.
pub struct Session {
    state: Mutex<Option<Transcript>>,
}

impl Session {
    fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    /// Lock this session for one turn.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Option<Transcript>> {
        self.state.lock().await
    }
}

/// Thread-safe registry of sessions keyed by conversation id.
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Get the session for a conversation, creating it lazily.
    pub fn get_or_create(&self, conversation_id: &str) -> Arc<Session> {
        self.sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(conversation_id, "Creating session");
                Arc::new(Session::new())
            })
            .clone()
    }

    /// Drop the resident transcript but keep the registry entry (and with it
    /// the lock object), so a turn already waiting on the lock still
    /// serializes against this conversation. The next turn rehydrates.
    pub async fn invalidate(&self, conversation_id: &str) {
        if let Some(session) = self.sessions.get(conversation_id).map(|r| r.clone()) {
            let mut state = session.lock().await;
            *state = None;
            tracing::debug!(conversation_id, "Session invalidated");
        }
    }

    /// Remove the session entirely: transcript and lock resource together.
    pub fn remove(&self, conversation_id: &str) -> bool {
        let removed = self.sessions.remove(conversation_id).is_some();
        if removed {
            tracing::debug!(conversation_id, "Session removed");
        }
        removed
    }

    /// Remove every session.
    pub fn clear(&self) {
        self.sessions.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Whether a conversation currently has a resident (hydrated) transcript.
    pub async fn is_resident(&self, conversation_id: &str) -> bool {
        match self.sessions.get(conversation_id).map(|r| r.clone()) {
            Some(session) => session.lock().await.is_some(),
            None => false,
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
