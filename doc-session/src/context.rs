use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SessionError};

/// Typed key/value bag attached to a session.
///
/// Values are stored as JSON so any backend can persist them without knowing
/// the concrete types the service puts in.
#[derive(Clone, Debug)]
pub struct Context {
    data: Arc<DashMap<String, Value>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    /// Rebuild a context from a persisted snapshot.
    pub fn from_snapshot(snapshot: HashMap<String, Value>) -> Self {
        Self {
            data: Arc::new(snapshot.into_iter().collect()),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl serde::Serialize) -> Result<()> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|source| SessionError::Serialize {
            key: key.clone(),
            source,
        })?;
        self.data.insert(key, value);
        Ok(())
    }

    /// Returns `None` when the key is absent or holds a value of another shape.
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Point-in-time copy of every entry, used by persistent backends.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Deep copy; the returned context no longer shares entries with `self`.
    pub fn detached(&self) -> Self {
        Self::from_snapshot(self.snapshot())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
