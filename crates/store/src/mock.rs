use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::traits::*;

/// In-memory part sink for tests. Payloads are kept per session until
/// completion assembles them into an object map.
#[derive(Default)]
pub struct MockPartStore {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    uploads: HashMap<String, MockUpload>,
    objects: HashMap<(String, String), Vec<u8>>,
    next_upload: u64,
}

struct MockUpload {
    bucket: String,
    key: String,
    parts: HashMap<i32, MockPart>,
}

struct MockPart {
    etag: String,
    payload: Vec<u8>,
}

impl MockPartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assembled object bytes, if the upload for `bucket`/`key` completed.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.objects.get(&(bucket.to_string(), key.to_string())).cloned()
    }

    pub fn upload_exists(&self, upload_id: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.uploads.contains_key(upload_id)
    }

    /// Parts staged so far for an open session.
    pub fn part_count(&self, upload_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.uploads.get(upload_id).map(|u| u.parts.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PartStore for MockPartStore {
    async fn create_multipart_upload(&self, request: CreateMultipartUploadRequest) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.next_upload += 1;
        let upload_id = format!("mpu_mock_{}", state.next_upload);

        state.uploads.insert(
            upload_id.clone(),
            MockUpload {
                bucket: request.bucket,
                key: request.key,
                parts: HashMap::new(),
            },
        );

        Ok(upload_id)
    }

    async fn upload_part(&self, request: UploadPartRequest) -> Result<String> {
        // Buffer the payload before taking the lock
        let mut payload = Vec::with_capacity(request.size as usize);
        let mut stream = request.data;
        while let Some(chunk) = stream.try_next().await? {
            payload.extend_from_slice(&chunk);
        }

        let etag = format!("{:x}", Md5::digest(&payload));

        let mut state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .get_mut(&request.upload_id)
            .ok_or_else(|| anyhow!("Multipart upload not found: {}", request.upload_id))?;

        upload.parts.insert(request.part_number, MockPart {
            etag: etag.clone(),
            payload,
        });

        Ok(etag)
    }

    async fn complete_multipart_upload(&self, request: CompleteMultipartUploadRequest) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .get(&request.upload_id)
            .ok_or_else(|| anyhow!("Multipart upload not found: {}", request.upload_id))?;

        if upload.bucket != request.bucket || upload.key != request.key {
            return Err(anyhow!("Bucket/key mismatch in multipart upload"));
        }

        let mut sorted_parts = request.parts.clone();
        sorted_parts.sort_by_key(|p| p.part_number);

        let mut object = Vec::new();
        let mut etag_parts = Vec::new();
        for part in &sorted_parts {
            let staged = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| anyhow!("Part {} not found", part.part_number))?;
            object.extend_from_slice(&staged.payload);
            etag_parts.extend_from_slice(staged.etag.as_bytes());
        }

        let final_etag = format!("{:x}-{}", Md5::digest(&etag_parts), sorted_parts.len());

        state.uploads.remove(&request.upload_id);
        state
            .objects
            .insert((request.bucket, request.key), object);

        Ok(final_etag)
    }

    async fn abort_multipart_upload(&self, upload_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.uploads.remove(upload_id);
        Ok(())
    }
}
