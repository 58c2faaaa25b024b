//! # Multipart Upload Coordinator
//!
//! Owns the state machine of every upload session and is the only code that
//! mutates one:
//!
//! ```text
//! Initiated     --submit_part-------------------> PartsInFlight
//! PartsInFlight --submit_part-------------------> PartsInFlight
//! PartsInFlight --finalize (1..N, store ok)-----> Completed
//! PartsInFlight --finalize (store rejects)------> Failed
//! Initiated | PartsInFlight | Failed --abort----> Aborted
//! ```
//!
//! `finalize` with no parts or with a gap in the part numbers fails without
//! touching the session, so the caller can submit the missing parts and retry.
//! While a completion call is with the store the session is frozen: parts,
//! a second `finalize` and `abort` are refused with `CompletionInProgress`.
//! The coordinator never retries a store call itself; a failed part or a
//! rejected completion is reported and the caller decides between resubmitting
//! and aborting.
//!
//! Each session carries its own lock, held only for bookkeeping and never
//! across a store call. Part results are keyed by part number, so completions
//! may arrive in any order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::constants::{
    DEFAULT_CONTROL_TIMEOUT_MS, DEFAULT_PART_TIMEOUT_MS, MAX_PART_NUMBER, STORAGE_BUCKET_NAME,
};
use crate::errors::{StoreError, UploadError};
use crate::log_data;
use crate::logging::Logger;
use crate::models::{CompletedPart, ObjectDescriptor, PartRequest, PartResult, SessionState};
use crate::registry::SessionRegistry;
use crate::sequencer::{CancelFlag, PartSequencer};
use crate::session::{SessionInner, UploadSession};
use crate::store::ObjectStore;
use crate::utils::{generate_request_id, with_timeout, NoTimeout, Timer};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Bucket every session of this coordinator writes into.
    pub bucket: String,
    /// Deadline for a single part upload.
    pub part_timeout: Duration,
    /// Deadline for initiate, complete and abort calls.
    pub control_timeout: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            bucket: STORAGE_BUCKET_NAME.to_string(),
            part_timeout: Duration::from_millis(DEFAULT_PART_TIMEOUT_MS),
            control_timeout: Duration::from_millis(DEFAULT_CONTROL_TIMEOUT_MS),
        }
    }
}

pub struct Coordinator<S> {
    store: S,
    registry: Arc<SessionRegistry>,
    options: CoordinatorOptions,
    timer: Box<dyn Timer>,
    logger: Logger,
}

/// Counts one dispatched part upload until dropped, including when the
/// submitting future is cancelled mid-call.
struct InFlight<'a>(&'a UploadSession);

impl<'a> InFlight<'a> {
    /// `inner` must be the held lock of `session`.
    fn enter(session: &'a UploadSession, inner: &mut SessionInner) -> Self {
        inner.in_flight += 1;
        Self(session)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut inner = self.0.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
    }
}

/// Holds the session's completion marker while the store call runs; a
/// dropped `finalize` future releases it.
struct Completing<'a>(&'a UploadSession);

impl<'a> Completing<'a> {
    fn enter(session: &'a UploadSession, inner: &mut SessionInner) -> Self {
        inner.completing = true;
        Self(session)
    }
}

impl Drop for Completing<'_> {
    fn drop(&mut self) {
        self.0.lock().completing = false;
    }
}

impl<S: ObjectStore> Coordinator<S> {
    /// Deadlines are disabled until a timer is supplied with [`Self::with_timer`].
    pub fn new(store: S, registry: Arc<SessionRegistry>, options: CoordinatorOptions) -> Self {
        Self {
            store,
            registry,
            options,
            timer: Box::new(NoTimeout),
            logger: Logger::new(generate_request_id()),
        }
    }

    pub fn with_timer(mut self, timer: impl Timer + 'static) -> Self {
        self.timer = Box::new(timer);
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    async fn call<T>(
        &self,
        limit: Duration,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        with_timeout(self.timer.as_ref(), limit, fut)
            .await
            .unwrap_or_else(|limit| Err(StoreError::TimedOut(limit)))
    }

    /// Opens a multipart upload for `object_key` and registers its session.
    pub async fn begin_session(&self, object_key: &str) -> Result<Arc<UploadSession>, UploadError> {
        let too_many = || UploadError::TooManySessions {
            object_key: object_key.to_string(),
            limit: self.registry.max_sessions(),
        };
        if !self.registry.has_capacity() {
            return Err(too_many());
        }

        let upload_id = self
            .call(
                self.options.control_timeout,
                self.store.initiate_upload(&self.options.bucket, object_key),
            )
            .await
            .map_err(|source| {
                self.logger.error(
                    "Failed to initiate multipart upload",
                    log_data!("objectKey" => object_key, "error" => source.to_string()),
                );
                UploadError::StoreUnavailable {
                    object_key: object_key.to_string(),
                    source,
                }
            })?;

        let session = Arc::new(UploadSession::new(upload_id, object_key.to_string()));
        if !self.registry.try_insert(Arc::clone(&session)) {
            // Lost a race for the last slot; the store-side upload is orphaned otherwise.
            self.release_store_upload(&session).await;
            return Err(too_many());
        }

        self.logger.info(
            "Multipart upload initiated",
            log_data!("objectKey" => object_key, "uploadId" => session.upload_id()),
        );
        Ok(session)
    }

    fn ensure_open(session: &UploadSession, state: SessionState) -> Result<(), UploadError> {
        let object_key = session.object_key().to_string();
        let upload_id = session.upload_id().to_string();
        match state {
            SessionState::Initiated | SessionState::PartsInFlight => Ok(()),
            SessionState::Completed => Err(UploadError::AlreadyCompleted {
                object_key,
                upload_id,
            }),
            SessionState::Aborted => Err(UploadError::AlreadyAborted {
                object_key,
                upload_id,
            }),
            SessionState::Failed => Err(UploadError::SessionFailed {
                object_key,
                upload_id,
            }),
        }
    }

    fn ensure_idle(session: &UploadSession, inner: &SessionInner) -> Result<(), UploadError> {
        if inner.completing {
            return Err(UploadError::CompletionInProgress {
                object_key: session.object_key().to_string(),
                upload_id: session.upload_id().to_string(),
            });
        }
        Ok(())
    }

    fn validate_part(session: &UploadSession, part: &PartRequest) -> Result<(), UploadError> {
        let reason = if part.part_number == 0 || part.part_number > MAX_PART_NUMBER {
            format!("part number must be between 1 and {MAX_PART_NUMBER}")
        } else if part.declared_size != part.payload.len() as u64 {
            format!(
                "declared size {} does not match payload of {} bytes",
                part.declared_size,
                part.payload.len()
            )
        } else {
            return Ok(());
        };
        Err(UploadError::InvalidPart {
            object_key: session.object_key().to_string(),
            upload_id: session.upload_id().to_string(),
            part_number: part.part_number,
            reason,
        })
    }

    /// Sends one part to the store and records its result.
    ///
    /// Resubmitting a part number replaces the earlier result. A failed part
    /// is not recorded and is not retried here.
    pub async fn submit_part(
        &self,
        session: &UploadSession,
        part: PartRequest,
    ) -> Result<PartResult, UploadError> {
        let _in_flight = {
            let mut inner = session.lock();
            Self::ensure_open(session, inner.state)?;
            Self::ensure_idle(session, &inner)?;
            Self::validate_part(session, &part)?;
            if inner.state == SessionState::Initiated {
                inner.transition(SessionState::PartsInFlight);
            }
            InFlight::enter(session, &mut inner)
        };

        let part_number = part.part_number;
        let size = part.payload.len() as u64;
        let etag = self
            .call(
                self.options.part_timeout,
                self.store.upload_part(
                    &self.options.bucket,
                    session.object_key(),
                    session.upload_id(),
                    part_number,
                    part.payload,
                ),
            )
            .await
            .map_err(|source| {
                self.logger.warn(
                    "Part upload failed",
                    log_data!(
                        "objectKey" => session.object_key(),
                        "uploadId" => session.upload_id(),
                        "partNumber" => part_number,
                        "error" => source.to_string()
                    ),
                );
                UploadError::PartUploadFailed {
                    object_key: session.object_key().to_string(),
                    upload_id: session.upload_id().to_string(),
                    part_number,
                    source,
                }
            })?;

        let mut inner = session.lock();
        // Aborted while the part was on the wire.
        Self::ensure_open(session, inner.state)?;
        let result = PartResult {
            part_number,
            etag,
            size,
        };
        inner.parts.insert(part_number, result.clone());
        inner.total_bytes_seen += size;
        inner.updated_at = Utc::now();
        Ok(result)
    }

    /// Assembles the recorded parts into the final object.
    pub async fn finalize(&self, session: &UploadSession) -> Result<ObjectDescriptor, UploadError> {
        let (manifest, completing) = {
            let mut inner = session.lock();
            Self::ensure_open(session, inner.state)?;
            Self::ensure_idle(session, &inner)?;
            let object_key = session.object_key().to_string();
            let upload_id = session.upload_id().to_string();
            if inner.in_flight > 0 {
                return Err(UploadError::PartsOutstanding {
                    object_key,
                    upload_id,
                    count: inner.in_flight,
                });
            }
            if inner.parts.is_empty() {
                return Err(UploadError::EmptyUpload {
                    object_key,
                    upload_id,
                });
            }
            let missing = inner.missing_parts();
            if !missing.is_empty() {
                return Err(UploadError::IncompletePartSet {
                    object_key,
                    upload_id,
                    missing,
                });
            }
            // BTreeMap iteration is ascending, which the manifest requires.
            let manifest: Vec<CompletedPart> = inner
                .parts
                .values()
                .map(|p| CompletedPart {
                    part_number: p.part_number,
                    etag: p.etag.clone(),
                })
                .collect();
            (manifest, Completing::enter(session, &mut inner))
        };

        let outcome = self
            .call(
                self.options.control_timeout,
                self.store.complete_upload(
                    &self.options.bucket,
                    session.object_key(),
                    session.upload_id(),
                    &manifest,
                ),
            )
            .await;

        {
            let mut inner = session.lock();
            inner.completing = false;
            Self::ensure_open(session, inner.state)?;
            inner.transition(if outcome.is_ok() {
                SessionState::Completed
            } else {
                SessionState::Failed
            });
        }
        drop(completing);

        match outcome {
            Ok(object) => {
                self.registry.remove(session.upload_id());
                self.logger.info(
                    "Multipart upload completed",
                    log_data!(
                        "objectKey" => session.object_key(),
                        "uploadId" => session.upload_id(),
                        "parts" => manifest.len(),
                        "size" => object.size
                    ),
                );
                Ok(ObjectDescriptor {
                    object_key: session.object_key().to_string(),
                    etag: object.etag,
                    size: object.size,
                    part_count: manifest.len(),
                })
            }
            Err(source) => {
                // A timed-out completion is ambiguous; it is treated as failed
                // and the caller has to abort.
                self.registry.remove(session.upload_id());
                self.logger.error(
                    "Store rejected multipart completion",
                    log_data!(
                        "objectKey" => session.object_key(),
                        "uploadId" => session.upload_id(),
                        "error" => source.to_string()
                    ),
                );
                Err(UploadError::StoreRejectedCompletion {
                    object_key: session.object_key().to_string(),
                    upload_id: session.upload_id().to_string(),
                    source,
                })
            }
        }
    }

    /// Abandons the session and asks the store to discard its parts.
    ///
    /// A failure of the store call is logged, not returned: the session is
    /// aborted either way and the store-side upload is left for a sweeper.
    pub async fn abort(&self, session: &UploadSession) -> Result<(), UploadError> {
        {
            let mut inner = session.lock();
            match inner.state {
                SessionState::Completed | SessionState::Aborted => {
                    return Self::ensure_open(session, inner.state);
                }
                _ => {
                    Self::ensure_idle(session, &inner)?;
                    inner.transition(SessionState::Aborted);
                }
            }
        }
        self.registry.remove(session.upload_id());
        self.release_store_upload(session).await;
        self.logger.info(
            "Multipart upload aborted",
            log_data!("objectKey" => session.object_key(), "uploadId" => session.upload_id()),
        );
        Ok(())
    }

    async fn release_store_upload(&self, session: &UploadSession) {
        let outcome = self
            .call(
                self.options.control_timeout,
                self.store.abort_upload(
                    &self.options.bucket,
                    session.object_key(),
                    session.upload_id(),
                ),
            )
            .await;
        if let Err(e) = outcome {
            self.logger.warn(
                "Store abort failed; upload left for the sweeper",
                log_data!(
                    "objectKey" => session.object_key(),
                    "uploadId" => session.upload_id(),
                    "error" => e.to_string()
                ),
            );
        }
    }

    /// Aborts every registered session idle for longer than `max_age` and
    /// returns their upload IDs.
    pub async fn sweep_stale(&self, max_age: chrono::Duration) -> Vec<String> {
        let mut swept = Vec::new();
        for session in self.registry.stale(max_age, Utc::now()) {
            match self.abort(&session).await {
                Ok(()) => swept.push(session.upload_id().to_string()),
                Err(e) => self.logger.warn(
                    "Stale session could not be aborted",
                    log_data!("uploadId" => session.upload_id(), "error" => e.to_string()),
                ),
            }
        }
        swept
    }

    /// Uploads `parts` as one object: begin, submit the batch, finalize.
    ///
    /// Any failure after the session opened aborts it before the error is
    /// returned, so no partial upload is left behind.
    pub async fn assemble(
        &self,
        object_key: &str,
        parts: Vec<PartRequest>,
        sequencer: &PartSequencer,
        cancel: &CancelFlag,
    ) -> Result<ObjectDescriptor, UploadError> {
        let session = self.begin_session(object_key).await?;
        let outcome = match sequencer.run(self, &session, parts, cancel).await {
            Ok(_) => self.finalize(&session).await,
            Err(failure) => Err(failure.error),
        };
        if outcome.is_err() {
            if let Err(e) = self.abort(&session).await {
                self.logger.warn(
                    "Abort after failed assembly was refused",
                    log_data!("uploadId" => session.upload_id(), "error" => e.to_string()),
                );
            }
        }
        outcome
    }
}
