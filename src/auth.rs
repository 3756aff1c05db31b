//! Credential collaborator
//!
//! The connection manager reads the bearer token afresh before every connect
//! and reconnect attempt, so clearing it stops reconnects at the next attempt.

use std::sync::{Arc, RwLock};

/// Supplies the current bearer token
pub trait CredentialSource: Send + Sync + 'static {
    /// Current token; `None` (or an empty string) means signed out
    fn token(&self) -> Option<String>;
}

/// Shared, mutable token slot filled on login and cleared on logout
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    token: Arc<RwLock<Option<String>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a token
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.set(token);
        store
    }

    pub fn set(&self, token: impl Into<String>) {
        let mut slot = self.token.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(token.into());
    }

    pub fn clear(&self) {
        let mut slot = self.token.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    pub fn is_authed(&self) -> bool {
        self.token().is_some()
    }
}

impl CredentialSource for TokenStore {
    fn token(&self) -> Option<String> {
        let slot = self.token.read().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().filter(|t| !t.is_empty()).cloned()
    }
}
