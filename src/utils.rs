//! # Utility Functions
//!
//! - **Deadlines**: the [`Timer`] seam and [`with_timeout`], used to bound every
//!   store call
//! - **Identifiers**: request IDs for log correlation
//! - **CORS Headers**: consistent cross-origin support for the façade

use std::future::Future;
use std::pin::pin;
use std::time::Duration;

use chrono::Utc;
use futures::future::{self, Either, LocalBoxFuture};
use futures::FutureExt;
use uuid::Uuid;
use worker::{Delay, Headers};

use crate::constants::{
    CORS_ALLOW_HEADERS, CORS_ALLOW_METHODS, CORS_ALLOW_ORIGIN, CORS_EXPOSE_HEADERS,
};

/// Source of sleep futures for deadlines.
pub trait Timer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

/// Sleeps on the Workers event loop (`setTimeout`).
#[derive(Clone, Copy, Debug, Default)]
pub struct WorkerTimer;

impl Timer for WorkerTimer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        Delay::from(duration).boxed_local()
    }
}

/// A timer that never fires; deadlines are left to the platform.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTimeout;

impl Timer for NoTimeout {
    fn sleep(&self, _duration: Duration) -> LocalBoxFuture<'static, ()> {
        future::pending().boxed_local()
    }
}

/// Runs `fut` to completion unless `limit` elapses first, in which case `fut`
/// is dropped and `Err(limit)` is returned.
pub async fn with_timeout<F>(timer: &dyn Timer, limit: Duration, fut: F) -> Result<F::Output, Duration>
where
    F: Future,
{
    let fut = pin!(fut);
    match future::select(fut, timer.sleep(limit)).await {
        Either::Left((output, _)) => Ok(output),
        Either::Right(((), _)) => Err(limit),
    }
}

/// Generates a time-prefixed unique identifier used to correlate log lines of
/// one request.
///
/// Format: `{timestamp_millis}-{uuid}`
pub fn generate_request_id() -> String {
    let uuid_part = Uuid::new_v4().to_string();
    let timestamp = Utc::now().timestamp_millis();
    format!("{}-{}", timestamp, uuid_part)
}

/// Creates HTTP headers for Cross-Origin Resource Sharing (CORS) support.
pub fn cors_headers() -> Headers {
    let headers = Headers::new();
    // Note: These values are known to be valid
    let _ = headers.set("Access-Control-Allow-Origin", CORS_ALLOW_ORIGIN);
    let _ = headers.set("Access-Control-Allow-Methods", CORS_ALLOW_METHODS);
    let _ = headers.set("Access-Control-Allow-Headers", CORS_ALLOW_HEADERS);
    let _ = headers.set("Access-Control-Expose-Headers", CORS_EXPOSE_HEADERS);
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    struct Immediate;

    impl Timer for Immediate {
        fn sleep(&self, _duration: Duration) -> LocalBoxFuture<'static, ()> {
            future::ready(()).boxed_local()
        }
    }

    #[test]
    fn ready_future_beats_timer() {
        let result = block_on(with_timeout(&Immediate, Duration::from_secs(1), async { 7 }));
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn hung_future_times_out() {
        let limit = Duration::from_millis(250);
        let result = block_on(with_timeout(&Immediate, limit, future::pending::<u8>()));
        assert_eq!(result, Err(limit));
    }

    #[test]
    fn no_timeout_lets_future_finish() {
        let result = block_on(with_timeout(&NoTimeout, Duration::ZERO, async { "done" }));
        assert_eq!(result, Ok("done"));
    }

    #[test]
    fn request_ids_are_unique_and_time_prefixed() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert_ne!(a, b);
        let prefix = a.split('-').next().unwrap();
        assert!(prefix.parse::<i64>().is_ok());
    }
}
