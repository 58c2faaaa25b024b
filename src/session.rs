//! Per-upload session state.
//!
//! An [`UploadSession`] is shared (`Arc`) between the registry, the caller and
//! any part uploads in flight. All mutation goes through the coordinator while
//! holding the session's own lock; sessions never share a lock.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::models::{PartResult, SessionSnapshot, SessionState};

#[derive(Debug)]
pub(crate) struct SessionInner {
    pub state: SessionState,
    pub parts: BTreeMap<u16, PartResult>,
    /// Part uploads dispatched but not yet returned.
    pub in_flight: usize,
    /// A completion call is with the store; the session must not change
    /// until it returns.
    pub completing: bool,
    /// Diagnostics only.
    pub total_bytes_seen: u64,
    pub updated_at: DateTime<Utc>,
}

impl SessionInner {
    /// Part numbers absent from `1..=highest recorded`.
    pub fn missing_parts(&self) -> Vec<u16> {
        let highest = self.parts.keys().next_back().copied().unwrap_or(0);
        (1..=highest).filter(|n| !self.parts.contains_key(n)).collect()
    }

    pub fn transition(&mut self, state: SessionState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug)]
pub struct UploadSession {
    upload_id: String,
    object_key: String,
    created_at: DateTime<Utc>,
    inner: Mutex<SessionInner>,
}

impl UploadSession {
    pub(crate) fn new(upload_id: String, object_key: String) -> Self {
        let now = Utc::now();
        Self {
            upload_id,
            object_key,
            created_at: now,
            inner: Mutex::new(SessionInner {
                state: SessionState::Initiated,
                parts: BTreeMap::new(),
                in_flight: 0,
                completing: false,
                total_bytes_seen: 0,
                updated_at: now,
            }),
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Recorded parts in ascending part order.
    pub fn parts(&self) -> Vec<PartResult> {
        self.lock().parts.values().cloned().collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.lock();
        SessionSnapshot {
            upload_id: self.upload_id.clone(),
            object_key: self.object_key.clone(),
            state: inner.state,
            part_numbers: inner.parts.keys().copied().collect(),
            total_bytes_seen: inner.total_bytes_seen,
            created_at: self.created_at,
            updated_at: inner.updated_at,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, by: chrono::Duration) {
        self.lock().updated_at -= by;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(n: u16) -> PartResult {
        PartResult {
            part_number: n,
            etag: format!("e{n}"),
            size: 10,
        }
    }

    #[test]
    fn new_session_is_initiated_and_empty() {
        let session = UploadSession::new("u-1".into(), "report.csv".into());
        assert_eq!(session.state(), SessionState::Initiated);
        assert!(session.parts().is_empty());
        assert_eq!(session.snapshot().total_bytes_seen, 0);
    }

    #[test]
    fn missing_parts_reports_gaps() {
        let session = UploadSession::new("u-1".into(), "k".into());
        {
            let mut inner = session.lock();
            for n in [1, 2, 4, 7] {
                inner.parts.insert(n, result(n));
            }
        }
        assert_eq!(session.lock().missing_parts(), vec![3, 5, 6]);
    }

    #[test]
    fn contiguous_parts_have_no_gaps() {
        let session = UploadSession::new("u-1".into(), "k".into());
        {
            let mut inner = session.lock();
            for n in [3, 1, 2] {
                inner.parts.insert(n, result(n));
            }
        }
        assert!(session.lock().missing_parts().is_empty());
        let numbers: Vec<u16> = session.parts().iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }
}
