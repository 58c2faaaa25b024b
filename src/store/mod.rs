//! # Object Store Collaborator
//!
//! The narrow interface the coordinator drives to run the three-phase
//! multipart protocol against a remote store. Backends:
//!
//! - [`r2::R2Store`]: Cloudflare R2 through the Worker bucket binding
//! - [`memory::InMemoryStore`]: in-process store with the same manifest rules
//!
//! Futures are not `Send`; the Workers runtime is single-threaded and every
//! backend is driven from one task.

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::models::{CompletedPart, StoredObject};

pub mod memory;
pub mod r2;

#[async_trait(?Send)]
pub trait ObjectStore {
    /// Opens a multipart upload and returns the store-assigned upload ID.
    async fn initiate_upload(&self, bucket: &str, object_key: &str) -> Result<String, StoreError>;

    /// Stores one part and returns its eTag.
    async fn upload_part(
        &self,
        bucket: &str,
        object_key: &str,
        upload_id: &str,
        part_number: u16,
        payload: Vec<u8>,
    ) -> Result<String, StoreError>;

    /// Assembles the object from `parts`, which must be in ascending part order.
    async fn complete_upload(
        &self,
        bucket: &str,
        object_key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<StoredObject, StoreError>;

    async fn abort_upload(
        &self,
        bucket: &str,
        object_key: &str,
        upload_id: &str,
    ) -> Result<(), StoreError>;
}
