//! # Middleware Components
//!
//! Cross-cutting request/response processing for the Worker façade.
//!
//! - **CORS Middleware**: preflight handling and response headers
//! - **Validation Middleware**: checks an upload request before any store call

use crate::constants::{MAX_OBJECT_KEY_LEN, MAX_PART_NUMBER};
use crate::errors::{AppError, AppResult};
use crate::utils::cors_headers;
use worker::*;

/// Middleware for handling Cross-Origin Resource Sharing (CORS) requests.
pub struct CorsMiddleware;

impl CorsMiddleware {
    /// Adds the CORS headers to a response, keeping the headers it already has.
    pub fn apply_headers(mut response: Response) -> Response {
        let headers = response.headers_mut();
        for (name, value) in cors_headers().entries() {
            let _ = headers.set(&name, &value);
        }
        response
    }

    /// Handles CORS preflight requests (OPTIONS method).
    pub fn handle_preflight() -> Result<Response> {
        Ok(Response::empty()?.with_headers(cors_headers()))
    }
}

/// Middleware for validating upload requests.
///
/// Every check runs before a session is opened, so a rejected request never
/// leaves anything behind in the store.
pub struct ValidationMiddleware;

impl ValidationMiddleware {
    /// Validates the key the assembled object will be stored under.
    ///
    /// # Errors
    ///
    /// - `BadRequest`: empty, too long, absolute, or containing a `..` segment
    pub fn validate_object_key(key: &str) -> AppResult<()> {
        let reason = if key.trim().is_empty() {
            "must not be empty"
        } else if key.len() > MAX_OBJECT_KEY_LEN {
            "is too long"
        } else if key.starts_with('/') {
            "must be relative"
        } else if key.split('/').any(|segment| segment == "..") {
            "must not contain `..` segments"
        } else if key.chars().any(char::is_control) {
            "must not contain control characters"
        } else {
            return Ok(());
        };
        Err(AppError::BadRequest(format!("object key {reason}")))
    }

    /// Validates the number of parts a request assembles.
    pub fn validate_part_count(count: usize) -> AppResult<()> {
        if count == 0 {
            return Err(AppError::BadRequest("no non-empty file parts supplied".into()));
        }
        if count > usize::from(MAX_PART_NUMBER) {
            return Err(AppError::BadRequest(format!(
                "{count} parts exceeds the limit of {MAX_PART_NUMBER}"
            )));
        }
        Ok(())
    }

    /// Validates that the assembled object stays within the configured limit.
    pub fn validate_object_size(size: u64, max_size: u64) -> AppResult<()> {
        if size > max_size {
            return Err(AppError::ObjectTooLarge {
                size,
                max: max_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_nested_keys() {
        assert!(ValidationMiddleware::validate_object_key("reports/2024/report.csv").is_ok());
    }

    #[test]
    fn rejects_unsafe_keys() {
        for key in ["", "   ", "/etc/passwd", "a/../b", "..", "bad\nkey"] {
            let err = ValidationMiddleware::validate_object_key(key).unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "{key:?}");
        }
        let long = "k".repeat(MAX_OBJECT_KEY_LEN + 1);
        assert!(ValidationMiddleware::validate_object_key(&long).is_err());
    }

    #[test]
    fn dotted_file_names_are_not_traversal() {
        assert!(ValidationMiddleware::validate_object_key("archive..tar").is_ok());
    }

    #[test]
    fn part_count_bounds() {
        assert!(ValidationMiddleware::validate_part_count(0).is_err());
        assert!(ValidationMiddleware::validate_part_count(1).is_ok());
        assert!(ValidationMiddleware::validate_part_count(usize::from(MAX_PART_NUMBER)).is_ok());
        assert!(ValidationMiddleware::validate_part_count(usize::from(MAX_PART_NUMBER) + 1).is_err());
    }

    #[test]
    fn validate_object_size_rejects_over_limit() {
        assert!(ValidationMiddleware::validate_object_size(10, 10).is_ok());
        let err = ValidationMiddleware::validate_object_size(20, 10).unwrap_err();
        assert!(matches!(err, AppError::ObjectTooLarge { size: 20, max: 10 }));
    }
}
