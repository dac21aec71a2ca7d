//! Session Management
//!
//! Threads one conversation across several agent runs. Sessions live in
//! memory only and are gone when the process exits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::message::Conversation;

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A conversation plus bookkeeping
#[derive(Clone, Debug, Serialize)]
pub struct Session {
    /// Unique identifier
    pub id: SessionId,

    /// Conversation history (empty until the first run seeds it)
    pub conversation: Conversation,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last activity timestamp
    pub updated_at: DateTime<Utc>,

    /// Completed agent runs
    pub runs: u64,
}

impl Session {
    /// Create with specific ID
    pub fn with_id(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            conversation: Conversation::new(),
            created_at: now,
            updated_at: now,
            runs: 0,
        }
    }

    /// Record a finished run
    pub fn touch(&mut self) {
        self.runs += 1;
        self.updated_at = Utc::now();
    }
}

/// Default idle time after which a session may be dropped
pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(60 * 60);

/// Default cap on live sessions
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

/// In-memory session table
///
/// Each session sits behind its own async mutex. Holding the guard returned
/// by [`acquire`](Self::acquire) gives exclusive use of that conversation;
/// other sessions are unaffected.
///
/// The table is bounded. Whenever a new session is created, sessions idle
/// for longer than `idle_ttl` are dropped, and if the table is still full the
/// least recently updated ones go too. A session that is locked by a run in
/// progress is never dropped.
pub struct SessionManager {
    sessions: Mutex<HashMap<SessionId, Arc<Mutex<Session>>>>,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::with_limits(DEFAULT_SESSION_IDLE, DEFAULT_MAX_SESSIONS)
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with a custom idle timeout and capacity (at least one session)
    pub fn with_limits(idle_ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    /// Get the session for `id`, creating it on first use
    pub async fn get_or_create(&self, id: &SessionId) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(id) {
            return Arc::clone(existing);
        }

        self.evict(&mut sessions);

        tracing::debug!(session = %id, "Creating session");
        let session = Arc::new(Mutex::new(Session::with_id(id.clone())));
        sessions.insert(id.clone(), Arc::clone(&session));
        session
    }

    /// Drop idle sessions, then the oldest ones until a new session fits
    fn evict(&self, sessions: &mut HashMap<SessionId, Arc<Mutex<Session>>>) {
        let idle_ttl = chrono::Duration::from_std(self.idle_ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(idle_ttl);

        // Sessions locked by a run in progress are skipped
        let mut idle: Vec<(DateTime<Utc>, SessionId)> = sessions
            .iter()
            .filter_map(|(id, session)| {
                session.try_lock().ok().map(|s| (s.updated_at, id.clone()))
            })
            .collect();
        idle.sort_by_key(|(updated_at, _)| *updated_at);

        let mut dropped = 0;
        for (updated_at, id) in idle {
            let expired = cutoff.is_some_and(|cutoff| updated_at < cutoff);
            if !expired && sessions.len() < self.max_sessions {
                break;
            }
            sessions.remove(&id);
            dropped += 1;
        }

        if dropped > 0 {
            tracing::debug!(dropped, remaining = sessions.len(), "Evicted sessions");
        }
    }

    /// Lock a session for the duration of one run
    pub async fn acquire(&self, id: &SessionId) -> OwnedMutexGuard<Session> {
        self.get_or_create(id).await.lock_owned().await
    }

    pub async fn get(&self, id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &SessionId) -> bool {
        self.sessions.lock().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<SessionId> {
        self.sessions.lock().await.keys().cloned().collect()
    }
}
