//! Session store: process-scoped conversation histories.
//!
//! Each session sits behind its own mutex, so requests on different ids
//! only share the brief map lock. Writes go through [`SessionStore::commit_exchange`],
//! which appends a Human/Assistant pair only if the caller's snapshot length
//! still matches. Nothing here survives a restart.

use std::collections::HashMap;
use std::sync::Arc;

use convrag_core::error::CommitConflict;
use convrag_core::message::{SessionId, Turn};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

#[derive(Debug)]
struct Session {
    turns: Vec<Turn>,
    /// Set once the session has been removed from the map.
    cleared: bool,
}

impl Session {
    fn new() -> Self {
        Self {
            turns: Vec::new(),
            cleared: false,
        }
    }
}

/// Thread-safe mapping from session id to ordered history.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a session for a new request.
    ///
    /// An absent (or empty) id yields a freshly generated one. A supplied id
    /// that is not yet known is adopted as-is with an empty history. Either
    /// way the session is visible to concurrent callers immediately.
    pub async fn resolve(&self, session_id: Option<&str>) -> (SessionId, Vec<Turn>) {
        let id = match session_id.filter(|s| !s.is_empty()) {
            Some(s) => SessionId::from(s),
            None => SessionId::new(),
        };

        let session = self.get_or_create(&id).await;
        let turns = session.lock().await.turns.clone();
        (id, turns)
    }

    async fn get_or_create(&self, id: &SessionId) -> Arc<Mutex<Session>> {
        if let Some(existing) = self.sessions.read().await.get(id) {
            return Arc::clone(existing);
        }

        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(id.clone()).or_insert_with(|| {
            debug!(session_id = %id, "Created session");
            Arc::new(Mutex::new(Session::new()))
        }))
    }

    /// Append `Human(question)` then `Assistant(answer)` if the session still
    /// holds exactly `expected_prior_len` turns. Returns the new history.
    pub async fn commit_exchange(
        &self,
        session_id: &SessionId,
        question: &str,
        answer: &str,
        expected_prior_len: usize,
    ) -> Result<Vec<Turn>, CommitConflict> {
        let conflict = |actual| CommitConflict {
            session_id: session_id.to_string(),
            expected: expected_prior_len,
            actual,
        };

        let session = self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| conflict(None))?;

        let mut session = session.lock().await;
        if session.cleared {
            return Err(conflict(None));
        }
        if session.turns.len() != expected_prior_len {
            return Err(conflict(Some(session.turns.len())));
        }

        session.turns.push(Turn::human(question));
        session.turns.push(Turn::assistant(answer));

        debug!(session_id = %session_id, turns = session.turns.len(), "Committed exchange");
        Ok(session.turns.clone())
    }

    /// Current history, or `None` if the id is unknown. Never creates a session.
    pub async fn get(&self, session_id: &str) -> Option<Vec<Turn>> {
        let session = self
            .sessions
            .read()
            .await
            .get(&SessionId::from(session_id))
            .cloned()?;
        let turns = session.lock().await.turns.clone();
        Some(turns)
    }

    /// Remove a session. Returns true if it existed.
    pub async fn clear(&self, session_id: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .await
            .remove(&SessionId::from(session_id));

        match removed {
            Some(session) => {
                session.lock().await.cleared = true;
                debug!(session_id, "Cleared session");
                true
            }
            None => false,
        }
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
