//! Revision tokens
//!
//! Every commit writes a fresh token. The tracker remembers recently issued
//! ones so the change notification for a tab's own write is recognised.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TOKEN_PREFIX: &str = "rev-";

/// How many issued tokens are remembered at most
const MAX_PENDING: usize = 32;

/// Identifies one commit in the `storageRevision` key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionToken(String);

impl RevisionToken {
    pub fn generate() -> Self {
        Self(format!("{}{}", TOKEN_PREFIX, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RevisionToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RevisionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tokens written by this tab that have not been echoed back yet
///
/// A token matches at most once and only within `expiry` of being issued.
#[derive(Debug)]
pub struct RevisionTracker {
    pending: VecDeque<(RevisionToken, Instant)>,
    expiry: Duration,
}

impl RevisionTracker {
    pub fn new(expiry: Duration) -> Self {
        Self {
            pending: VecDeque::new(),
            expiry,
        }
    }

    /// Generate and remember a token for a commit about to be written
    pub fn issue(&mut self) -> RevisionToken {
        self.prune(Instant::now());
        let token = RevisionToken::generate();
        if self.pending.len() >= MAX_PENDING {
            self.pending.pop_front();
        }
        self.pending.push_back((token.clone(), Instant::now()));
        token
    }

    /// Forget a token whose commit was never written
    pub fn discard(&mut self, token: &RevisionToken) {
        self.pending.retain(|(t, _)| t != token);
    }

    /// True if `token` was issued here and has not expired; consumes it
    pub fn is_own_echo(&mut self, token: &str) -> bool {
        let now = Instant::now();
        self.prune(now);
        match self.pending.iter().position(|(t, _)| t.as_str() == token) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn prune(&mut self, now: Instant) {
        let expiry = self.expiry;
        self.pending
            .retain(|(_, issued)| now.saturating_duration_since(*issued) <= expiry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_format() {
        let token = RevisionToken::generate();
        assert!(token.as_str().starts_with(TOKEN_PREFIX));
        assert_eq!(token.as_str().len(), TOKEN_PREFIX.len() + 36);
        assert_ne!(token, RevisionToken::generate());
    }

    #[test]
    fn test_echo_is_consumed_once() {
        let mut tracker = RevisionTracker::new(Duration::from_secs(5));
        let token = tracker.issue();

        assert!(tracker.is_own_echo(token.as_str()));
        assert!(!tracker.is_own_echo(token.as_str()));
        assert!(!tracker.is_own_echo("rev-someone-else"));
    }

    #[test]
    fn test_expired_tokens_are_not_echoes() {
        let mut tracker = RevisionTracker::new(Duration::from_millis(10));
        let token = tracker.issue();
        std::thread::sleep(Duration::from_millis(30));
        assert!(!tracker.is_own_echo(token.as_str()));
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_discard_and_bound() {
        let mut tracker = RevisionTracker::new(Duration::from_secs(5));
        let first = tracker.issue();
        tracker.discard(&first);
        assert!(!tracker.is_own_echo(first.as_str()));

        for _ in 0..(MAX_PENDING + 5) {
            tracker.issue();
        }
        assert_eq!(tracker.pending(), MAX_PENDING);
    }

    #[test]
    fn test_token_serializes_as_string() {
        let token = RevisionToken::from("rev-abc");
        assert_eq!(serde_json::to_value(&token).unwrap(), "rev-abc");
    }
}
