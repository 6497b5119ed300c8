//! Registry of sessions that currently have a run in flight.
//!
//! Shared by every connection so that a session never has two concurrent
//! runs, even when two clients are attached to it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Default)]
pub struct ActiveRuns {
    sessions: Arc<Mutex<HashSet<String>>>,
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `session_id`. Returns `None` if a run already holds it.
    pub fn try_acquire(&self, session_id: &str) -> Option<RunGuard> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(session_id.to_string()).then(|| RunGuard {
            sessions: self.sessions.clone(),
            session_id: session_id.to_string(),
        })
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the session when dropped.
#[derive(Debug)]
pub struct RunGuard {
    sessions: Arc<Mutex<HashSet<String>>>,
    session_id: String,
}

impl RunGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.session_id);
    }
}
