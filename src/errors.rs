//! # Error Types
//!
//! Three layers of failure:
//!
//! - [`StoreError`]: a call to the object store collaborator failed.
//! - [`UploadError`]: a coordinator operation failed. Every variant names the
//!   object key and, once one exists, the upload ID, so an operator can inspect
//!   or abort the upload with the store's own tooling.
//! - [`AppError`]: a façade request failed; maps onto an HTTP status.

use std::time::Duration;

use http::StatusCode;
use serde_json::json;
use thiserror::Error;
use worker::{Error as WorkerError, Response};

use crate::constants::HEADER_UPLOAD_ID;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store rejected request: {0}")]
    Rejected(String),
    #[error("store call timed out after {0:?}")]
    TimedOut(Duration),
}

impl From<WorkerError> for StoreError {
    fn from(error: WorkerError) -> Self {
        StoreError::Unavailable(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("could not initiate upload for `{object_key}`: {source}")]
    StoreUnavailable {
        object_key: String,
        #[source]
        source: StoreError,
    },
    #[error("upload {upload_id} for `{object_key}` has no parts to assemble")]
    EmptyUpload { object_key: String, upload_id: String },
    #[error("upload {upload_id} for `{object_key}` is missing parts {missing:?}")]
    IncompletePartSet {
        object_key: String,
        upload_id: String,
        missing: Vec<u16>,
    },
    #[error("store rejected completion of upload {upload_id} for `{object_key}`: {source}")]
    StoreRejectedCompletion {
        object_key: String,
        upload_id: String,
        #[source]
        source: StoreError,
    },
    #[error("part {part_number} of upload {upload_id} for `{object_key}` failed: {source}")]
    PartUploadFailed {
        object_key: String,
        upload_id: String,
        part_number: u16,
        #[source]
        source: StoreError,
    },
    #[error("part {part_number} of upload {upload_id} for `{object_key}` is invalid: {reason}")]
    InvalidPart {
        object_key: String,
        upload_id: String,
        part_number: u16,
        reason: String,
    },
    #[error("upload {upload_id} for `{object_key}` still has {count} part uploads in flight")]
    PartsOutstanding {
        object_key: String,
        upload_id: String,
        count: usize,
    },
    #[error("upload {upload_id} for `{object_key}` is being completed")]
    CompletionInProgress { object_key: String, upload_id: String },
    #[error("upload {upload_id} for `{object_key}` is already completed")]
    AlreadyCompleted { object_key: String, upload_id: String },
    #[error("upload {upload_id} for `{object_key}` is already aborted")]
    AlreadyAborted { object_key: String, upload_id: String },
    #[error("upload {upload_id} for `{object_key}` failed and must be aborted")]
    SessionFailed { object_key: String, upload_id: String },
    #[error("cannot open upload for `{object_key}`: {limit} sessions already in flight")]
    TooManySessions { object_key: String, limit: usize },
    #[error("batch for upload {upload_id} of `{object_key}` was cancelled")]
    Cancelled { object_key: String, upload_id: String },
}

impl UploadError {
    /// Upload ID the failure belongs to, when a session had been opened.
    pub fn upload_id(&self) -> Option<&str> {
        match self {
            UploadError::StoreUnavailable { .. } | UploadError::TooManySessions { .. } => None,
            UploadError::EmptyUpload { upload_id, .. }
            | UploadError::IncompletePartSet { upload_id, .. }
            | UploadError::StoreRejectedCompletion { upload_id, .. }
            | UploadError::PartUploadFailed { upload_id, .. }
            | UploadError::InvalidPart { upload_id, .. }
            | UploadError::PartsOutstanding { upload_id, .. }
            | UploadError::CompletionInProgress { upload_id, .. }
            | UploadError::AlreadyCompleted { upload_id, .. }
            | UploadError::AlreadyAborted { upload_id, .. }
            | UploadError::SessionFailed { upload_id, .. }
            | UploadError::Cancelled { upload_id, .. } => Some(upload_id),
        }
    }

    /// Whether the caller can make progress by retrying or resubmitting
    /// without aborting the session first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::StoreUnavailable { .. }
                | UploadError::IncompletePartSet { .. }
                | UploadError::PartUploadFailed { .. }
                | UploadError::PartsOutstanding { .. }
                | UploadError::TooManySessions { .. }
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            UploadError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            UploadError::EmptyUpload { .. }
            | UploadError::IncompletePartSet { .. }
            | UploadError::InvalidPart { .. } => StatusCode::BAD_REQUEST,
            UploadError::StoreRejectedCompletion { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            UploadError::PartUploadFailed { .. } => StatusCode::BAD_GATEWAY,
            UploadError::PartsOutstanding { .. }
            | UploadError::CompletionInProgress { .. }
            | UploadError::AlreadyCompleted { .. }
            | UploadError::AlreadyAborted { .. }
            | UploadError::SessionFailed { .. } => StatusCode::CONFLICT,
            UploadError::TooManySessions { .. } => StatusCode::TOO_MANY_REQUESTS,
            UploadError::Cancelled { .. } => StatusCode::REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Object too large: {size} bytes exceeds limit of {max} bytes")]
    ObjectTooLarge { size: u64, max: u64 },
    #[error(transparent)]
    Upload(#[from] UploadError),
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ObjectTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Upload(e) => e.status_code(),
        }
    }

    /// Upload session the failure belongs to, if one had been opened.
    pub fn upload_id(&self) -> Option<&str> {
        match self {
            AppError::Upload(e) => e.upload_id(),
            _ => None,
        }
    }

    fn body(&self) -> serde_json::Value {
        json!({
            "error": self.to_string(),
            "status": self.status_code().as_u16(),
            "uploadId": self.upload_id(),
        })
    }

    /// Renders the error as a JSON response with the mapped status code. The
    /// upload ID, when known, is also echoed in the `X-Upload-Id` header.
    pub fn to_response(&self) -> worker::Result<Response> {
        let mut response =
            Response::from_json(&self.body())?.with_status(self.status_code().as_u16());
        if let Some(upload_id) = self.upload_id() {
            response.headers_mut().set(HEADER_UPLOAD_ID, upload_id)?;
        }
        Ok(response)
    }
}

impl From<AppError> for WorkerError {
    fn from(error: AppError) -> Self {
        match error {
            AppError::Worker(e) => e,
            other => WorkerError::RustError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part_failure() -> UploadError {
        UploadError::PartUploadFailed {
            object_key: "report.csv".into(),
            upload_id: "u-1".into(),
            part_number: 3,
            source: StoreError::Unavailable("connection reset".into()),
        }
    }

    #[test]
    fn part_failure_message_names_key_upload_and_part() {
        let message = part_failure().to_string();
        assert!(message.contains("report.csv"));
        assert!(message.contains("u-1"));
        assert!(message.contains("part 3"));
    }

    #[test]
    fn retryable_classification() {
        assert!(part_failure().is_retryable());
        assert!(!UploadError::AlreadyCompleted {
            object_key: "k".into(),
            upload_id: "u".into(),
        }
        .is_retryable());
        assert!(!UploadError::StoreRejectedCompletion {
            object_key: "k".into(),
            upload_id: "u".into(),
            source: StoreError::Rejected("etag mismatch".into()),
        }
        .is_retryable());
    }

    #[test]
    fn upload_id_absent_before_session_exists() {
        let err = UploadError::StoreUnavailable {
            object_key: "k".into(),
            source: StoreError::TimedOut(Duration::from_secs(1)),
        };
        assert_eq!(err.upload_id(), None);
        assert_eq!(part_failure().upload_id(), Some("u-1"));
    }

    #[test]
    fn app_error_status_mapping() {
        assert_eq!(
            AppError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(part_failure()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::ObjectTooLarge { size: 2, max: 1 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn app_error_body_carries_upload_id() {
        let body = AppError::from(part_failure()).body();
        assert_eq!(body["uploadId"], "u-1");
        assert_eq!(body["status"], 502);
    }

    #[test]
    fn only_upload_errors_name_an_upload() {
        assert_eq!(AppError::from(part_failure()).upload_id(), Some("u-1"));
        assert_eq!(AppError::BadRequest("x".into()).upload_id(), None);
        let body = AppError::ObjectTooLarge { size: 2, max: 1 }.body();
        assert!(body["uploadId"].is_null());
    }

    #[test]
    fn completion_in_progress_is_a_conflict() {
        let err = UploadError::CompletionInProgress {
            object_key: "k".into(),
            upload_id: "u".into(),
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.upload_id(), Some("u"));
        assert!(!err.is_retryable());
    }
}
