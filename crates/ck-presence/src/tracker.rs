use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::clock::{Clock, SystemClock};

/// A user stays online this long after their last ping or login.
pub const DEFAULT_PRESENCE_TIMEOUT_MS: i64 = 45_000;

/// Tracks when each user was last seen.
///
/// Expiry is lazy: a stale entry stays in the map and simply stops showing up
/// in [`PresenceTracker::list_online`]. Only [`PresenceTracker::leave`]
/// removes entries.
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    clock: Arc<dyn Clock>,
    timeout_ms: i64,
    state: RwLock<PresenceState>,
}

#[derive(Default)]
struct PresenceState {
    /// username -> last seen (epoch ms)
    last_seen: HashMap<String, i64>,
    /// Usernames that touched presence since startup and have not left.
    known_online: HashSet<String>,
}

impl PresenceTracker {
    pub fn new(timeout_ms: i64) -> Self {
        Self::with_clock(timeout_ms, Arc::new(SystemClock))
    }

    pub fn with_clock(timeout_ms: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                clock,
                timeout_ms,
                state: RwLock::new(PresenceState::default()),
            }),
        }
    }

    /// Mark a user as seen now.
    pub async fn touch(&self, username: &str) {
        let now = self.inner.clock.now_ms();
        let mut state = self.inner.state.write().await;
        state.last_seen.insert(username.to_string(), now);
        if !state.known_online.contains(username) {
            state.known_online.insert(username.to_string());
        }
        debug!("presence touch {} at {}", username, now);
    }

    /// Drop a user immediately, without waiting for the timeout.
    pub async fn leave(&self, username: &str) {
        let mut state = self.inner.state.write().await;
        state.last_seen.remove(username);
        state.known_online.remove(username);
        debug!("presence leave {}", username);
    }

    /// Users seen within the timeout window, inclusive of its edge.
    pub async fn list_online(&self) -> BTreeSet<String> {
        let now = self.inner.clock.now_ms();
        let timeout = self.inner.timeout_ms;
        self.inner
            .state
            .read()
            .await
            .last_seen
            .iter()
            .filter(|&(_, &seen)| now - seen <= timeout)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Whether the user is in the known-online set, regardless of expiry.
    pub async fn is_known(&self, username: &str) -> bool {
        self.inner.state.read().await.known_online.contains(username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tracker() -> (PresenceTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let tracker = PresenceTracker::with_clock(DEFAULT_PRESENCE_TIMEOUT_MS, clock.clone());
        (tracker, clock)
    }

    #[tokio::test]
    async fn online_through_the_whole_window() {
        let (tracker, clock) = tracker();
        tracker.touch("alice").await;

        assert!(tracker.list_online().await.contains("alice"));
        clock.advance_ms(30_000);
        assert!(tracker.list_online().await.contains("alice"));
        clock.advance_ms(15_000); // exactly T + 45000
        assert!(tracker.list_online().await.contains("alice"));
        clock.advance_ms(1);
        assert!(!tracker.list_online().await.contains("alice"));
    }

    #[tokio::test]
    async fn stale_entries_are_not_evicted_by_reads() {
        let (tracker, clock) = tracker();
        tracker.touch("alice").await;
        clock.advance_ms(60_000);
        assert!(tracker.list_online().await.is_empty());

        // Still known; a new touch brings the user straight back.
        assert!(tracker.is_known("alice").await);
        tracker.touch("alice").await;
        assert!(tracker.list_online().await.contains("alice"));
    }

    #[tokio::test]
    async fn leave_is_immediate() {
        let (tracker, _clock) = tracker();
        tracker.touch("alice").await;
        tracker.touch("bob").await;

        tracker.leave("alice").await;

        let online = tracker.list_online().await;
        assert!(!online.contains("alice"));
        assert!(online.contains("bob"));
        assert!(!tracker.is_known("alice").await);
    }

    #[tokio::test]
    async fn leave_unknown_user_is_harmless() {
        let (tracker, _clock) = tracker();
        tracker.leave("ghost").await;
        assert!(tracker.list_online().await.is_empty());
    }

    #[tokio::test]
    async fn touch_refreshes_window() {
        let (tracker, clock) = tracker();
        tracker.touch("alice").await;
        clock.advance_ms(40_000);
        tracker.touch("alice").await;
        clock.advance_ms(40_000);
        assert!(tracker.list_online().await.contains("alice"));
    }
}
