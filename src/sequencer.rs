//! # Part Sequencer
//!
//! Drives the part submissions of one batch with a bounded number of uploads
//! in flight. After the first failure, or once the batch is cancelled, no new
//! part is dispatched; uploads already on the wire are allowed to finish so
//! their results are still recorded. The caller gets back exactly which parts
//! completed, failed and were never attempted, and chooses between
//! resubmitting those and aborting the session.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;

use crate::constants::FALLBACK_PART_CONCURRENCY;
use crate::coordinator::Coordinator;
use crate::errors::UploadError;
use crate::models::{PartRequest, PartResult};
use crate::session::UploadSession;
use crate::store::ObjectStore;

/// Shared flag a caller sets to stop a batch from dispatching more parts.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
#[error("{error} (failed parts {failed:?}, never attempted {not_attempted:?})")]
pub struct BatchFailure {
    /// First failure observed, or `Cancelled`.
    #[source]
    pub error: UploadError,
    pub failed: Vec<u16>,
    pub completed: Vec<u16>,
    pub not_attempted: Vec<u16>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartSequencer {
    concurrency: usize,
}

impl Default for PartSequencer {
    /// One upload in flight per available hardware thread.
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(FALLBACK_PART_CONCURRENCY);
        Self::new(workers)
    }
}

impl PartSequencer {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Submits `parts` in order, at most `concurrency` at a time.
    ///
    /// Returns only after every dispatched submission has returned, so the
    /// session has nothing outstanding and may be finalized or aborted.
    /// On success the results are sorted by part number.
    pub async fn run<S: ObjectStore>(
        &self,
        coordinator: &Coordinator<S>,
        session: &UploadSession,
        parts: Vec<PartRequest>,
        cancel: &CancelFlag,
    ) -> Result<Vec<PartResult>, BatchFailure> {
        let mut pending = parts.into_iter();
        let mut running = FuturesUnordered::new();
        let mut completed = Vec::new();
        let mut failed = Vec::new();
        let mut first_error = None;

        loop {
            while first_error.is_none() && !cancel.is_cancelled() && running.len() < self.concurrency {
                let Some(part) = pending.next() else { break };
                let part_number = part.part_number;
                running.push(async move { (part_number, coordinator.submit_part(session, part).await) });
            }
            match running.next().await {
                Some((_, Ok(result))) => completed.push(result),
                Some((part_number, Err(error))) => {
                    failed.push(part_number);
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
                None => break,
            }
        }

        completed.sort_by_key(|r: &PartResult| r.part_number);
        let not_attempted: Vec<u16> = pending.map(|p| p.part_number).collect();
        let error = match first_error {
            Some(error) => error,
            None if !not_attempted.is_empty() => UploadError::Cancelled {
                object_key: session.object_key().to_string(),
                upload_id: session.upload_id().to_string(),
            },
            None => return Ok(completed),
        };
        failed.sort_unstable();
        Err(BatchFailure {
            error,
            failed,
            completed: completed.iter().map(|r| r.part_number).collect(),
            not_attempted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CoordinatorOptions;
    use crate::models::SessionState;
    use crate::registry::SessionRegistry;
    use crate::store::memory::{InMemoryStore, StoreOp};
    use futures::executor::block_on;

    fn coordinator() -> Coordinator<InMemoryStore> {
        Coordinator::new(
            InMemoryStore::new(),
            Arc::new(SessionRegistry::new(4)),
            CoordinatorOptions::default(),
        )
    }

    fn parts(numbers: impl IntoIterator<Item = u16>) -> Vec<PartRequest> {
        numbers
            .into_iter()
            .map(|n| PartRequest::new(n, vec![n as u8; 16]))
            .collect()
    }

    #[test]
    fn concurrency_is_at_least_one() {
        assert_eq!(PartSequencer::new(0).concurrency(), 1);
        assert!(PartSequencer::default().concurrency() >= 1);
    }

    #[test]
    fn results_sorted_despite_out_of_order_completion() {
        let c = coordinator();
        c.store().delay_part(1, 5);
        c.store().delay_part(2, 2);
        let results = block_on(async {
            let session = c.begin_session("k").await.unwrap();
            PartSequencer::new(3)
                .run(&c, &session, parts([1, 2, 3]), &CancelFlag::new())
                .await
                .unwrap()
        });
        let numbers: Vec<u16> = results.iter().map(|r| r.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn never_exceeds_concurrency() {
        let c = coordinator();
        for n in 1..=10 {
            c.store().delay_part(n, usize::from(n % 3));
        }
        block_on(async {
            let session = c.begin_session("k").await.unwrap();
            PartSequencer::new(4)
                .run(&c, &session, parts(1..=10), &CancelFlag::new())
                .await
                .unwrap();
        });
        assert!(c.store().peak_in_flight() <= 4);
        assert!(c.store().peak_in_flight() > 1);
    }

    #[test]
    fn stops_dispatching_after_first_failure() {
        let c = coordinator();
        c.store().fail_part(2);
        let failure = block_on(async {
            let session = c.begin_session("k").await.unwrap();
            let failure = PartSequencer::new(1)
                .run(&c, &session, parts(1..=5), &CancelFlag::new())
                .await
                .unwrap_err();
            assert_eq!(session.state(), SessionState::PartsInFlight);
            failure
        });
        assert!(matches!(failure.error, UploadError::PartUploadFailed { part_number: 2, .. }));
        assert_eq!(failure.completed, vec![1]);
        assert_eq!(failure.failed, vec![2]);
        assert_eq!(failure.not_attempted, vec![3, 4, 5]);
        assert_eq!(c.store().count_calls(StoreOp::UploadPart), 2);
    }

    #[test]
    fn in_flight_parts_finish_after_failure() {
        let c = coordinator();
        c.store().fail_part(1);
        c.store().delay_part(2, 3);
        let failure = block_on(async {
            let session = c.begin_session("k").await.unwrap();
            PartSequencer::new(2)
                .run(&c, &session, parts(1..=4), &CancelFlag::new())
                .await
                .unwrap_err()
        });
        assert_eq!(failure.failed, vec![1]);
        assert_eq!(failure.completed, vec![2]);
        assert_eq!(failure.not_attempted, vec![3, 4]);
    }

    #[test]
    fn resubmitting_only_affected_parts_recovers() {
        let c = coordinator();
        c.store().fail_part(2);
        block_on(async {
            let session = c.begin_session("k").await.unwrap();
            let sequencer = PartSequencer::new(1);
            let failure = sequencer
                .run(&c, &session, parts(1..=3), &CancelFlag::new())
                .await
                .unwrap_err();
            c.store().heal_part(2);
            let retry: Vec<u16> = failure
                .failed
                .iter()
                .chain(&failure.not_attempted)
                .copied()
                .collect();
            sequencer
                .run(&c, &session, parts(retry), &CancelFlag::new())
                .await
                .unwrap();
            let descriptor = c.finalize(&session).await.unwrap();
            assert_eq!(descriptor.part_count, 3);
        });
    }

    #[test]
    fn cancelled_batch_dispatches_nothing() {
        let c = coordinator();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let failure = block_on(async {
            let session = c.begin_session("k").await.unwrap();
            PartSequencer::new(2)
                .run(&c, &session, parts(1..=3), &cancel)
                .await
                .unwrap_err()
        });
        assert!(matches!(failure.error, UploadError::Cancelled { .. }));
        assert_eq!(failure.not_attempted, vec![1, 2, 3]);
        assert_eq!(c.store().count_calls(StoreOp::UploadPart), 0);
    }
}
