use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};

/// Absolute session lifetime, independent of activity.
pub const DEFAULT_SESSION_TTL_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub issued_at_ms: i64,
    pub expires_at_ms: i64,
}

/// Registry of signed-in browser sessions keyed by opaque token.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    state: RwLock<SessionState>,
}

#[derive(Default)]
struct SessionState {
    by_token: HashMap<String, Session>,
    /// username -> tokens, for tearing down every session of a deleted account
    by_user: HashMap<String, HashSet<String>>,
}

impl SessionState {
    fn remove(&mut self, token: &str) -> Option<Session> {
        let session = self.by_token.remove(token)?;
        if let Some(tokens) = self.by_user.get_mut(&session.username) {
            tokens.remove(token);
            if tokens.is_empty() {
                self.by_user.remove(&session.username);
            }
        }
        Some(session)
    }
}

fn gen_token() -> String {
    // 256-bit random token, base64url without padding
    let mut buf = [0u8; 32];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

impl SessionStore {
    pub fn new(ttl_ms: i64) -> Self {
        Self::with_clock(ttl_ms, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl_ms: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                clock,
                ttl_ms,
                state: RwLock::new(SessionState::default()),
            }),
        }
    }

    /// Bind a fresh token to `username`.
    pub async fn create(&self, username: &str) -> Session {
        let now = self.inner.clock.now_ms();
        let session = Session {
            token: gen_token(),
            username: username.to_string(),
            issued_at_ms: now,
            expires_at_ms: now + self.inner.ttl_ms,
        };

        let mut state = self.inner.state.write().await;
        state.by_token.insert(session.token.clone(), session.clone());
        state
            .by_user
            .entry(session.username.clone())
            .or_default()
            .insert(session.token.clone());

        debug!("session issued for {}", username);
        session
    }

    /// Username bound to `token`, or `None` if unknown or past its absolute age.
    /// Expired sessions are dropped on the way out.
    pub async fn current_user(&self, token: &str) -> Option<String> {
        let now = self.inner.clock.now_ms();
        {
            let state = self.inner.state.read().await;
            match state.by_token.get(token) {
                None => return None,
                Some(session) if session.expires_at_ms > now => {
                    return Some(session.username.clone());
                }
                Some(_) => {}
            }
        }

        let mut state = self.inner.state.write().await;
        // Re-check under the write lock; the token may have been replaced meanwhile.
        if state
            .by_token
            .get(token)
            .is_some_and(|s| s.expires_at_ms <= now)
        {
            state.remove(token);
            debug!("session expired");
        }
        None
    }

    /// Returns `true` if the token was live.
    pub async fn destroy(&self, token: &str) -> bool {
        self.inner.state.write().await.remove(token).is_some()
    }

    /// Destroys every session of `username`. Returns how many were removed.
    pub async fn destroy_user(&self, username: &str) -> usize {
        let mut state = self.inner.state.write().await;
        let tokens = state.by_user.remove(username).unwrap_or_default();
        let count = tokens
            .iter()
            .filter(|t| state.by_token.remove(t.as_str()).is_some())
            .count();
        info!("revoked {} session(s) for {}", count, username);
        count
    }

    /// Drops every expired session. Returns how many were removed.
    pub async fn prune_expired(&self) -> usize {
        let now = self.inner.clock.now_ms();
        let mut state = self.inner.state.write().await;
        let expired: Vec<String> = state
            .by_token
            .values()
            .filter(|s| s.expires_at_ms <= now)
            .map(|s| s.token.clone())
            .collect();
        for token in &expired {
            state.remove(token);
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.state.read().await.by_token.len()
    }
}
