use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of one multipart upload session.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Initiated,
    PartsInFlight,
    Completed,
    Aborted,
    Failed,
}

impl SessionState {
    /// No operation can move the session out of this state.
    pub fn is_final(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }

    /// The session no longer belongs in the registry.
    pub fn is_terminal(self) -> bool {
        self.is_final() || self == SessionState::Failed
    }
}

/// One pending file part, held until it is handed to the store.
#[derive(Clone, Debug)]
pub struct PartRequest {
    pub part_number: u16,
    pub payload: Vec<u8>,
    pub declared_size: u64,
}

impl PartRequest {
    pub fn new(part_number: u16, payload: Vec<u8>) -> Self {
        let declared_size = payload.len() as u64;
        Self {
            part_number,
            payload,
            declared_size,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartResult {
    pub part_number: u16,
    pub etag: String,
    pub size: u64,
}

/// Entry of the completion manifest sent to the store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u16,
    pub etag: String,
}

/// What the store reports about an object it just assembled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub etag: String,
    pub size: u64,
}

/// Identity of a finalized object as returned to callers.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDescriptor {
    pub object_key: String,
    pub etag: String,
    pub size: u64,
    pub part_count: usize,
}

/// Read-only view of a session for status queries and the stale sweep.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub upload_id: String,
    pub object_key: String,
    pub state: SessionState,
    pub part_numbers: Vec<u16>,
    pub total_bytes_seen: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_is_terminal_but_not_final() {
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Failed.is_final());
        assert!(SessionState::Completed.is_final());
        assert!(SessionState::Aborted.is_final());
        assert!(!SessionState::PartsInFlight.is_terminal());
    }

    #[test]
    fn part_request_declares_payload_length() {
        let part = PartRequest::new(1, vec![0; 1000]);
        assert_eq!(part.declared_size, 1000);
    }

    #[test]
    fn descriptor_serializes_camel_case() {
        let descriptor = ObjectDescriptor {
            object_key: "report.csv".into(),
            etag: "abc-3".into(),
            size: 2500,
            part_count: 3,
        };
        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["objectKey"], "report.csv");
        assert_eq!(value["partCount"], 3);
    }
}
