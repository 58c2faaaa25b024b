//! # Upload Session Registry
//!
//! Process-wide table of in-flight upload sessions keyed by upload ID. Sessions
//! enter on a successful initiation and leave once they complete, abort or
//! fail. The table is bounded, so a burst of uploads cannot pile up orphaned
//! store-side state, and it lets a watchdog find sessions that stopped making
//! progress.
//!
//! The registry lock covers map access only. It is never held while a session
//! lock is taken or while a store call is pending.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::models::SessionSnapshot;
use crate::session::UploadSession;

#[derive(Debug)]
pub struct SessionRegistry {
    max_sessions: usize,
    sessions: Mutex<HashMap<String, Arc<UploadSession>>>,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<UploadSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_capacity(&self) -> bool {
        self.lock().len() < self.max_sessions
    }

    /// Adds `session`; returns `false` when the registry is full.
    pub fn try_insert(&self, session: Arc<UploadSession>) -> bool {
        let mut sessions = self.lock();
        if sessions.len() >= self.max_sessions {
            return false;
        }
        sessions.insert(session.upload_id().to_string(), session);
        true
    }

    pub fn remove(&self, upload_id: &str) -> Option<Arc<UploadSession>> {
        self.lock().remove(upload_id)
    }

    pub fn get(&self, upload_id: &str) -> Option<Arc<UploadSession>> {
        self.lock().get(upload_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn all(&self) -> Vec<Arc<UploadSession>> {
        self.lock().values().cloned().collect()
    }

    /// Snapshots of every registered session, oldest first.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<SessionSnapshot> =
            self.all().iter().map(|s| s.snapshot()).collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        snapshots
    }

    /// Unfinished sessions whose last update is older than `max_age` at `now`.
    pub fn stale(&self, max_age: Duration, now: DateTime<Utc>) -> Vec<Arc<UploadSession>> {
        let cutoff = now - max_age;
        self.all()
            .into_iter()
            .filter(|session| {
                let snapshot = session.snapshot();
                !snapshot.state.is_terminal() && snapshot.updated_at < cutoff
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionState;

    fn session(id: &str) -> Arc<UploadSession> {
        Arc::new(UploadSession::new(id.into(), format!("{id}.bin")))
    }

    #[test]
    fn insert_respects_bound() {
        let registry = SessionRegistry::new(2);
        assert!(registry.try_insert(session("a")));
        assert!(registry.try_insert(session("b")));
        assert!(!registry.has_capacity());
        assert!(!registry.try_insert(session("c")));
        assert_eq!(registry.len(), 2);
        assert!(registry.get("c").is_none());
    }

    #[test]
    fn remove_frees_capacity() {
        let registry = SessionRegistry::new(1);
        assert!(registry.try_insert(session("a")));
        assert!(registry.remove("a").is_some());
        assert!(registry.is_empty());
        assert!(registry.try_insert(session("b")));
    }

    #[test]
    fn stale_finds_only_old_unfinished_sessions() {
        let registry = SessionRegistry::new(8);
        let old = session("old");
        old.backdate(Duration::hours(2));
        let fresh = session("fresh");
        let failed = session("failed");
        failed.lock().transition(SessionState::Failed);
        failed.backdate(Duration::hours(2));
        for s in [&old, &fresh, &failed] {
            assert!(registry.try_insert(Arc::clone(s)));
        }

        let stale = registry.stale(Duration::hours(1), Utc::now());
        let ids: Vec<&str> = stale.iter().map(|s| s.upload_id()).collect();
        assert_eq!(ids, vec!["old"]);
    }

    #[test]
    fn snapshots_are_oldest_first() {
        let registry = SessionRegistry::new(8);
        let first = session("first");
        assert!(registry.try_insert(Arc::clone(&first)));
        assert!(registry.try_insert(session("second")));
        let snapshots = registry.snapshots();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots[0].created_at <= snapshots[1].created_at);
    }
}
