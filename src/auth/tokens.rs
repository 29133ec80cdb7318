//! Credential record and session storage

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// OAuth2 credentials kept in the session for one application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Unix timestamp (seconds) after which the access token is unusable
    #[serde(default)]
    pub expires_at: i64,
    /// Space-delimited scopes granted by the provider
    #[serde(default)]
    pub granted_scope: String,
}

impl Credentials {
    /// True iff every field is populated and `now` is before expiry.
    pub fn is_valid_at(&self, now: i64) -> bool {
        !self.access_token.is_empty()
            && !self.refresh_token.is_empty()
            && self.expires_at != 0
            && !self.granted_scope.is_empty()
            && now < self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(chrono::Utc::now().timestamp())
    }

    /// Whether every non-empty token of `requested` appears in the granted scope.
    pub fn grants(&self, requested: &str) -> bool {
        if self.granted_scope.is_empty() || requested.trim().is_empty() {
            return false;
        }
        let granted: Vec<&str> = self.granted_scope.split(' ').collect();
        requested
            .split(' ')
            .filter(|s| !s.is_empty())
            .all(|s| granted.contains(&s))
    }
}

/// Session storage backend holding credentials by key.
///
/// Reads are expected to be cheap; the token manager re-reads before every use.
pub trait SessionStore {
    fn get(&self, key: &str) -> Option<Credentials>;
    fn set(&mut self, key: &str, credentials: Credentials) -> Result<()>;
    fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// In-process session store.
#[derive(Debug, Default, Clone)]
pub struct MemorySessionStore {
    entries: HashMap<String, Credentials>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<Credentials> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, credentials: Credentials) -> Result<()> {
        self.entries.insert(key.to_string(), credentials);
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}
