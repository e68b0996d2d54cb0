//! Backend sessions: a set of user facts attached to a conversation.
//!
//! Each session starts with the server's configured `key=value` facts plus
//! any extra facts the client sends. When an assistant call names a known
//! session, its facts are added to the system prompt.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One started session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub created: DateTime<Utc>,
    /// Refreshed on every assistant call that names this session.
    pub last: DateTime<Utc>,
    pub facts: Vec<String>,
}

/// In-memory registry of started sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    base_facts: Vec<String>,
    sessions: Mutex<HashMap<String, SessionInfo>>,
}

impl SessionRegistry {
    /// Registry seeding every session with `base_facts`.
    pub fn new(base_facts: Vec<String>) -> Self {
        Self {
            base_facts,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a session. Empty extra facts are dropped. Returns the session id
    /// and the number of facts it holds.
    pub fn start(&self, extra: Vec<String>) -> (String, usize) {
        let mut facts = self.base_facts.clone();
        facts.extend(
            extra
                .into_iter()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty()),
        );
        let count = facts.len();

        let id = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id.clone(),
                SessionInfo {
                    created: now,
                    last: now,
                    facts,
                },
            );
        (id, count)
    }

    /// Facts of a known session, refreshing its last-used time.
    pub fn touch(&self, id: &str) -> Option<Vec<String>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.get_mut(id)?;
        session.last = Utc::now();
        Some(session.facts.clone())
    }

    pub fn get(&self, id: &str) -> Option<SessionInfo> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
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
