//! R2 backend for the object store collaborator.

use async_trait::async_trait;
use worker::{Bucket, Env, UploadedPart};

use super::ObjectStore;
use crate::errors::StoreError;
use crate::models::{CompletedPart, StoredObject};

/// Resolves the `bucket` argument of every call as an R2 binding name on the
/// Worker environment, so one store serves every bound bucket.
pub struct R2Store<'a> {
    env: &'a Env,
}

impl<'a> R2Store<'a> {
    pub fn new(env: &'a Env) -> Self {
        Self { env }
    }

    fn bucket(&self, binding: &str) -> Result<Bucket, StoreError> {
        self.env
            .bucket(binding)
            .map_err(|e| StoreError::Unavailable(format!("R2 binding `{binding}`: {e}")))
    }
}

#[async_trait(?Send)]
impl ObjectStore for R2Store<'_> {
    async fn initiate_upload(&self, bucket: &str, object_key: &str) -> Result<String, StoreError> {
        let upload = self
            .bucket(bucket)?
            .create_multipart_upload(object_key)
            .execute()
            .await?;
        Ok(upload.upload_id().await.to_string())
    }

    async fn upload_part(
        &self,
        bucket: &str,
        object_key: &str,
        upload_id: &str,
        part_number: u16,
        payload: Vec<u8>,
    ) -> Result<String, StoreError> {
        let upload = self
            .bucket(bucket)?
            .resume_multipart_upload(object_key, upload_id)?;
        let part = upload.upload_part(part_number, payload).await?;
        Ok(part.etag())
    }

    async fn complete_upload(
        &self,
        bucket: &str,
        object_key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<StoredObject, StoreError> {
        let upload = self
            .bucket(bucket)?
            .resume_multipart_upload(object_key, upload_id)?;
        let manifest: Vec<UploadedPart> = parts
            .iter()
            .map(|p| UploadedPart::new(p.part_number, p.etag.clone()))
            .collect();
        let object = upload
            .complete(manifest)
            .await
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        Ok(StoredObject {
            key: object.key(),
            etag: object.etag(),
            size: u64::from(object.size()),
        })
    }

    async fn abort_upload(
        &self,
        bucket: &str,
        object_key: &str,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        let upload = self
            .bucket(bucket)?
            .resume_multipart_upload(object_key, upload_id)?;
        upload.abort().await?;
        Ok(())
    }
}
