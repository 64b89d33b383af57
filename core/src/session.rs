//! Where the auth token lives.
//!
//! The pipeline reads the token for every call and evicts it when the
//! backend says the session is over. It never owns the token's lifecycle, so
//! it talks to a `TokenStore`: either the persistent store (key `token`) or
//! the in-memory `Session` cell that also carries the user profile.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use crate::error::ApiError;
use crate::storage::{PersistentStore, StorageBackend};
use crate::types::UserInfo;

pub const TOKEN_KEY: &str = "token";

pub trait TokenStore: Send + Sync {
    fn token(&self) -> Option<String>;

    fn set_token(&self, token: &str) -> Result<(), ApiError>;

    /// Clear the token unconditionally. Returns whether one was present.
    fn evict(&self) -> bool;

    /// Clear the token only if it is still `expected`. Returns whether this
    /// call removed it.
    fn evict_if(&self, expected: &str) -> bool;
}

impl<B: StorageBackend> TokenStore for PersistentStore<B> {
    fn token(&self) -> Option<String> {
        match self.get(TOKEN_KEY) {
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    fn set_token(&self, token: &str) -> Result<(), ApiError> {
        // same guard as `evict_if`, so a fresh token never lands between its
        // check and its remove
        let _guard = self.lock_guard();
        self.set(TOKEN_KEY, token)
    }

    fn evict(&self) -> bool {
        let _guard = self.lock_guard();
        let present = TokenStore::token(self).is_some();
        if let Err(e) = self.remove(TOKEN_KEY) {
            tracing::warn!(error = %e, "failed to evict token");
            return false;
        }
        present
    }

    fn evict_if(&self, expected: &str) -> bool {
        let _guard = self.lock_guard();
        if TokenStore::token(self).as_deref() != Some(expected) {
            return false;
        }
        match self.remove(TOKEN_KEY) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to evict token");
                false
            }
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct SessionState {
    token: Option<String>,
    user_info: Option<UserInfo>,
}

/// In-memory auth cell: the token plus the signed-in user's profile.
#[derive(Debug, Default)]
pub struct Session {
    state: RwLock<SessionState>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_info(&self) -> Option<UserInfo> {
        self.read().user_info.clone()
    }

    pub fn set_user_info(&self, user: Option<UserInfo>) {
        self.write().user_info = user;
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TokenStore for Session {
    fn token(&self) -> Option<String> {
        self.read().token.clone()
    }

    fn set_token(&self, token: &str) -> Result<(), ApiError> {
        self.write().token = Some(token.to_string());
        Ok(())
    }

    fn evict(&self) -> bool {
        self.write().token.take().is_some()
    }

    fn evict_if(&self, expected: &str) -> bool {
        let mut state = self.write();
        if state.token.as_deref() == Some(expected) {
            state.token = None;
            true
        } else {
            false
        }
    }
}
