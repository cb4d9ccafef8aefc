use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::{Context, error::Result, error::SessionError};

/// State kept for one client across requests
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub context: Context,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context: Context::new(),
            updated_at: Utc::now(),
        }
    }

    /// Mark the session as freshly written; backends call this on save.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_expired(&self, ttl: Option<TimeDelta>, now: DateTime<Utc>) -> bool {
        ttl.is_some_and(|ttl| now - self.updated_at > ttl)
    }
}

/// Trait for storing and retrieving sessions
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: Session) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Session>>;
    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete every session past the backend's TTL, returning how many went.
    async fn purge_expired(&self) -> Result<u64>;
}

pub(crate) fn ttl_from_std(ttl: Option<Duration>) -> Result<Option<TimeDelta>> {
    ttl.map(|ttl| TimeDelta::from_std(ttl).map_err(|e| SessionError::InvalidTtl(e.to_string())))
        .transpose()
}

/// In-memory implementation of SessionStorage
///
/// Sessions are copied in and out so a caller holding a `Session` never
/// observes writes it has not saved.
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, Session>>,
    ttl: Option<TimeDelta>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ttl: None,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Result<Self> {
        Ok(Self {
            sessions: Arc::new(DashMap::new()),
            ttl: ttl_from_std(Some(ttl))?,
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn sweep(&self) -> u64 {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(Some(ttl), now));
        before.saturating_sub(self.sessions.len()) as u64
    }
}

impl Default for InMemorySessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, mut session: Session) -> Result<()> {
        session.touch();
        session.context = session.context.detached();
        self.sessions.insert(session.id.clone(), session);

        let purged = self.sweep();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired sessions");
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        match self.sessions.get(id) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(self.ttl, Utc::now()) => {
                let mut session = entry.clone();
                session.context = session.context.detached();
                return Ok(Some(session));
            }
            // the shard guard must be released before removing
            Some(_) => {}
        }

        tracing::debug!(session_id = %id, "Dropping expired session");
        self.sessions.remove(id);
        Ok(None)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        Ok(self.sweep())
    }
}
