//! Session store.

use crate::domain::session::Session;
use chrono::Utc;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Sessions keyed by token.
#[derive(Default)]
pub struct SessionRepository {
    sessions: DashMap<String, Session>,
}

impl SessionRepository {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session.
    pub fn insert(&self, session: Session) {
        self.sessions.insert(session.token.clone(), session);
    }

    /// Fetch a copy of a session.
    pub fn get(&self, token: &str) -> Option<Session> {
        self.sessions.get(token).map(|s| s.clone())
    }

    /// Remove a session. Returns true when one was present.
    pub fn remove(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Set the bound cardhost on a session.
    pub fn set_cardhost(&self, token: &str, cardhost_id: &str) -> bool {
        match self.sessions.get_mut(token) {
            Some(mut session) => {
                session.cardhost_id = Some(cardhost_id.to_string());
                true
            }
            None => false,
        }
    }

    /// Update a session's last-activity instant.
    pub fn touch(&self, token: &str) -> bool {
        match self.sessions.get_mut(token) {
            Some(mut session) => {
                session.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Find the session bound to a cardhost, if any.
    pub fn find_by_cardhost(&self, cardhost_id: &str) -> Option<Session> {
        self.sessions
            .iter()
            .find(|entry| entry.value().cardhost_id.as_deref() == Some(cardhost_id))
            .map(|entry| entry.value().clone())
    }

    /// Find the session binding a `(controller, cardhost)` tuple.
    pub fn find_by_tuple(&self, controller_id: &str, cardhost_id: &str) -> Option<Session> {
        self.sessions
            .iter()
            .find(|entry| {
                entry.value().controller_id == controller_id
                    && entry.value().cardhost_id.as_deref() == Some(cardhost_id)
            })
            .map(|entry| entry.value().clone())
    }

    /// Remove sessions past their hard expiry. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.expires_at > now);
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            debug!(removed = removed, "Cleaned up expired sessions");
        }
        removed
    }

    /// Remove sessions idle longer than `max_idle`. Returns the number
    /// removed.
    pub fn cleanup_idle(&self, max_idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.last_activity.elapsed() <= max_idle);
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            debug!(removed = removed, "Reaped idle sessions");
        }
        removed
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(token: &str, controller: &str) -> Session {
        Session::new(token.into(), controller.into(), Duration::from_secs(3600))
    }

    #[test]
    fn test_insert_get_remove() {
        let repo = SessionRepository::new();
        repo.insert(session("sess_1", "peer_c"));

        assert_eq!(repo.get("sess_1").unwrap().controller_id, "peer_c");
        assert!(repo.remove("sess_1"));
        assert!(!repo.remove("sess_1"));
    }

    #[test]
    fn test_find_by_cardhost_and_tuple() {
        let repo = SessionRepository::new();
        repo.insert(session("sess_1", "peer_c"));
        repo.set_cardhost("sess_1", "peer_h");

        assert_eq!(repo.find_by_cardhost("peer_h").unwrap().token, "sess_1");
        assert!(repo.find_by_cardhost("peer_other").is_none());
        assert_eq!(
            repo.find_by_tuple("peer_c", "peer_h").unwrap().token,
            "sess_1"
        );
        assert!(repo.find_by_tuple("peer_x", "peer_h").is_none());
    }

    #[test]
    fn test_cleanup_idle() {
        let repo = SessionRepository::new();
        repo.insert(session("sess_1", "peer_c"));

        assert_eq!(repo.cleanup_idle(Duration::from_secs(60)), 0);
        assert_eq!(repo.cleanup_idle(Duration::ZERO), 1);
        assert_eq!(repo.count(), 0);
    }

    #[test]
    fn test_cleanup_expired() {
        let repo = SessionRepository::new();
        repo.insert(Session::new(
            "sess_1".into(),
            "peer_c".into(),
            Duration::ZERO,
        ));
        repo.insert(session("sess_2", "peer_c"));

        assert_eq!(repo.cleanup_expired(), 1);
        assert!(repo.get("sess_1").is_none());
        assert!(repo.get("sess_2").is_some());
    }
}
