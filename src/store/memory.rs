//! In-process object store.
//!
//! Applies the same manifest rules a real multipart store does: parts must be
//! listed in ascending order, every listed eTag must match the stored part, and
//! (optionally) every part but the last must meet a minimum size. eTags are
//! content-derived, so identical bytes always produce identical objects.
//!
//! With the `test-utils` feature the store can also inject failures, hang
//! individual operations, and reorder part completions.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::ObjectStore;
use crate::errors::StoreError;
use crate::models::{CompletedPart, StoredObject};

/// Store operation, used to target injected faults and to record calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Initiate,
    UploadPart,
    Complete,
    Abort,
}

#[derive(Clone, Debug)]
pub struct StoredBlob {
    pub etag: String,
    pub bytes: Vec<u8>,
}

struct PendingUpload {
    bucket: String,
    object_key: String,
    parts: BTreeMap<u16, StoredBlob>,
}

#[derive(Default)]
struct Faults {
    fail_initiate: bool,
    failing_parts: HashSet<u16>,
    reject_completion: Option<String>,
    fail_abort: bool,
    hung: HashSet<StoreOp>,
    part_delays: HashMap<u16, usize>,
    completion_delay: usize,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    uploads: HashMap<String, PendingUpload>,
    objects: HashMap<(String, String), StoredBlob>,
    calls: Vec<StoreOp>,
    in_flight: usize,
    peak_in_flight: usize,
    faults: Faults,
}

#[derive(Default)]
pub struct InMemoryStore {
    min_part_size: Option<u64>,
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects completion when any part but the last is smaller than `bytes`.
    pub fn with_min_part_size(mut self, bytes: u64) -> Self {
        self.min_part_size = Some(bytes);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Finished object stored under `bucket`/`object_key`.
    pub fn object(&self, bucket: &str, object_key: &str) -> Option<StoredBlob> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), object_key.to_string()))
            .cloned()
    }

    /// Upload IDs that were initiated but neither completed nor aborted.
    pub fn open_uploads(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().uploads.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn count_calls(&self, op: StoreOp) -> usize {
        self.lock().calls.iter().filter(|&&c| c == op).count()
    }

    /// Highest number of part uploads observed running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.lock().peak_in_flight
    }

    /// Logs the call and reports whether `op` is set to hang.
    fn record(&self, op: StoreOp) -> bool {
        let mut inner = self.lock();
        inner.calls.push(op);
        inner.faults.hung.contains(&op)
    }

    fn combined_etag(parts: &[CompletedPart]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.etag.as_bytes());
        }
        format!("{}-{}", hex::encode(hasher.finalize()), parts.len())
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl InMemoryStore {
    pub fn fail_initiate(&self, fail: bool) {
        self.lock().faults.fail_initiate = fail;
    }

    /// Every upload of `part_number` fails until [`Self::heal_part`] is called.
    pub fn fail_part(&self, part_number: u16) {
        self.lock().faults.failing_parts.insert(part_number);
    }

    pub fn heal_part(&self, part_number: u16) {
        self.lock().faults.failing_parts.remove(&part_number);
    }

    pub fn reject_completion(&self, reason: impl Into<String>) {
        self.lock().faults.reject_completion = Some(reason.into());
    }

    pub fn fail_abort(&self, fail: bool) {
        self.lock().faults.fail_abort = fail;
    }

    /// Calls of `op` never resolve.
    pub fn hang(&self, op: StoreOp) {
        self.lock().faults.hung.insert(op);
    }

    /// Makes the upload of `part_number` yield to the executor `polls` times
    /// before it is stored, so completions arrive out of submission order.
    pub fn delay_part(&self, part_number: u16, polls: usize) {
        self.lock().faults.part_delays.insert(part_number, polls);
    }

    /// Makes every completion yield to the executor `polls` times before the
    /// manifest is checked.
    pub fn delay_completion(&self, polls: usize) {
        self.lock().faults.completion_delay = polls;
    }
}

#[async_trait(?Send)]
impl ObjectStore for InMemoryStore {
    async fn initiate_upload(&self, bucket: &str, object_key: &str) -> Result<String, StoreError> {
        if self.record(StoreOp::Initiate) {
            futures::future::pending::<()>().await;
        }
        let mut inner = self.lock();
        if inner.faults.fail_initiate {
            return Err(StoreError::Unavailable("ServiceUnavailable".into()));
        }
        inner.next_id += 1;
        let upload_id = format!("mem-{:06}", inner.next_id);
        inner.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                object_key: object_key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _object_key: &str,
        upload_id: &str,
        part_number: u16,
        payload: Vec<u8>,
    ) -> Result<String, StoreError> {
        if self.record(StoreOp::UploadPart) {
            futures::future::pending::<()>().await;
        }
        let delay = {
            let mut inner = self.lock();
            inner.in_flight += 1;
            inner.peak_in_flight = inner.peak_in_flight.max(inner.in_flight);
            inner.faults.part_delays.get(&part_number).copied().unwrap_or(0)
        };
        YieldNow { remaining: delay }.await;

        let mut inner = self.lock();
        inner.in_flight -= 1;
        if inner.faults.failing_parts.contains(&part_number) {
            return Err(StoreError::Unavailable(format!(
                "connection reset while sending part {part_number}"
            )));
        }
        let upload = inner
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::Rejected(format!("NoSuchUpload: {upload_id}")))?;
        let etag = hex::encode(Sha256::digest(&payload));
        upload.parts.insert(
            part_number,
            StoredBlob {
                etag: etag.clone(),
                bytes: payload,
            },
        );
        Ok(etag)
    }

    async fn complete_upload(
        &self,
        _bucket: &str,
        _object_key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<StoredObject, StoreError> {
        if self.record(StoreOp::Complete) {
            futures::future::pending::<()>().await;
        }
        let delay = self.lock().faults.completion_delay;
        YieldNow { remaining: delay }.await;

        let mut inner = self.lock();
        if let Some(reason) = inner.faults.reject_completion.clone() {
            return Err(StoreError::Rejected(reason));
        }
        let upload = inner
            .uploads
            .get(upload_id)
            .ok_or_else(|| StoreError::Rejected(format!("NoSuchUpload: {upload_id}")))?;
        if parts.is_empty() {
            return Err(StoreError::Rejected("MalformedXML: empty part list".into()));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(StoreError::Rejected("InvalidPartOrder".into()));
        }

        let mut bytes = Vec::new();
        for (i, listed) in parts.iter().enumerate() {
            let stored = upload
                .parts
                .get(&listed.part_number)
                .filter(|p| p.etag == listed.etag)
                .ok_or_else(|| {
                    StoreError::Rejected(format!("InvalidPart: {}", listed.part_number))
                })?;
            let is_last = i + 1 == parts.len();
            if let Some(min) = self.min_part_size {
                if !is_last && (stored.bytes.len() as u64) < min {
                    return Err(StoreError::Rejected(format!(
                        "EntityTooSmall: part {} is {} bytes",
                        listed.part_number,
                        stored.bytes.len()
                    )));
                }
            }
            bytes.extend_from_slice(&stored.bytes);
        }

        let etag = Self::combined_etag(parts);
        let key = (upload.bucket.clone(), upload.object_key.clone());
        let size = bytes.len() as u64;
        inner.uploads.remove(upload_id);
        inner.objects.insert(
            key.clone(),
            StoredBlob {
                etag: etag.clone(),
                bytes,
            },
        );
        Ok(StoredObject {
            key: key.1,
            etag,
            size,
        })
    }

    async fn abort_upload(
        &self,
        _bucket: &str,
        _object_key: &str,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        if self.record(StoreOp::Abort) {
            futures::future::pending::<()>().await;
        }
        let mut inner = self.lock();
        if inner.faults.fail_abort {
            return Err(StoreError::Unavailable("InternalError".into()));
        }
        inner
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::Rejected(format!("NoSuchUpload: {upload_id}")))
    }
}

/// Returns `Pending` a fixed number of times, waking itself each time.
struct YieldNow {
    remaining: usize,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.remaining == 0 {
            return Poll::Ready(());
        }
        self.remaining -= 1;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
