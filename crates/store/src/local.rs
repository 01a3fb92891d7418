use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use md5::{Digest, Md5};
use std::path::PathBuf;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

use crate::{traits::*, StoreConfig};

/// Filesystem-backed part sink. Parts are staged under
/// `<staging_dir>/<upload_id>/part_NNNNN` and concatenated into
/// `<staging_dir>/objects/<bucket>/<key>` on completion.
#[derive(Debug, Clone)]
pub struct LocalPartStore {
    config: StoreConfig,
}

impl LocalPartStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.staging_dir)?;

        Ok(Self { config })
    }

    fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.config.staging_dir.join(upload_id)
    }

    fn part_path(&self, upload_id: &str, part_number: i32) -> PathBuf {
        self.upload_dir(upload_id).join(format!("part_{:05}", part_number))
    }

    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.config.staging_dir.join("objects").join(bucket).join(key)
    }
}

#[async_trait]
impl PartStore for LocalPartStore {
    async fn create_multipart_upload(&self, request: CreateMultipartUploadRequest) -> Result<String> {
        let upload_id = format!("mpu_{}", Uuid::new_v4());

        let upload_dir = self.upload_dir(&upload_id);
        fs::create_dir_all(&upload_dir).await?;

        let metadata = serde_json::json!({
            "bucket": request.bucket,
            "key": request.key,
            "content_type": request.content_type,
            "upload_id": upload_id,
            "created_at": chrono::Utc::now().to_rfc3339(),
        });

        let metadata_path = upload_dir.join("metadata.json");
        fs::write(&metadata_path, metadata.to_string()).await?;

        tracing::info!(
            "Created multipart upload {} for {}/{}",
            upload_id,
            request.bucket,
            request.key
        );

        Ok(upload_id)
    }

    async fn upload_part(&self, request: UploadPartRequest) -> Result<String> {
        let upload_dir = self.upload_dir(&request.upload_id);

        if !upload_dir.exists() {
            return Err(anyhow!("Multipart upload not found: {}", request.upload_id));
        }

        let part_path = self.part_path(&request.upload_id, request.part_number);
        let mut part_file = fs::File::create(&part_path).await?;
        let mut stream = request.data;
        let mut hasher = Md5::new();

        while let Some(chunk) = stream.try_next().await? {
            hasher.update(&chunk);
            part_file.write_all(&chunk).await?;
        }

        part_file.sync_all().await?;
        drop(part_file);

        let etag = format!("{:x}", hasher.finalize());
        Ok(etag)
    }

    async fn complete_multipart_upload(&self, request: CompleteMultipartUploadRequest) -> Result<String> {
        let upload_dir = self.upload_dir(&request.upload_id);

        if !upload_dir.exists() {
            return Err(anyhow!("Multipart upload not found: {}", request.upload_id));
        }

        // Verify the session was opened for this bucket/key
        let metadata_path = upload_dir.join("metadata.json");
        let metadata_content = fs::read_to_string(&metadata_path).await?;
        let upload_metadata: serde_json::Value = serde_json::from_str(&metadata_content)?;

        let expected_bucket = upload_metadata["bucket"].as_str().unwrap_or("");
        let expected_key = upload_metadata["key"].as_str().unwrap_or("");

        if expected_bucket != request.bucket || expected_key != request.key {
            return Err(anyhow!("Bucket/key mismatch in multipart upload"));
        }

        let mut sorted_parts = request.parts.clone();
        sorted_parts.sort_by_key(|p| p.part_number);

        for part in &sorted_parts {
            let part_path = self.part_path(&request.upload_id, part.part_number);
            if !part_path.exists() {
                return Err(anyhow!("Part {} not found", part.part_number));
            }
        }

        // Concatenate parts into the final object
        let final_path = self.object_path(&request.bucket, &request.key);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut final_file = fs::File::create(&final_path).await?;

        for part in &sorted_parts {
            let part_path = self.part_path(&request.upload_id, part.part_number);
            let part_data = fs::read(&part_path).await?;
            final_file.write_all(&part_data).await?;
        }

        final_file.sync_all().await?;
        drop(final_file);

        fs::remove_dir_all(&upload_dir).await?;

        // Composite etag: MD5 of the concatenated part etags + "-" + part count
        let mut etag_parts = Vec::new();
        for part in &sorted_parts {
            etag_parts.extend_from_slice(part.etag.as_bytes());
        }
        let final_etag = format!("{:x}-{}", Md5::digest(&etag_parts), sorted_parts.len());

        tracing::info!(
            "Completed multipart upload {} ({} parts) into {}/{}",
            request.upload_id,
            sorted_parts.len(),
            request.bucket,
            request.key
        );

        Ok(final_etag)
    }

    async fn abort_multipart_upload(&self, upload_id: &str) -> Result<()> {
        let upload_dir = self.upload_dir(upload_id);

        if upload_dir.exists() {
            fs::remove_dir_all(&upload_dir).await?;
            tracing::info!("Aborted multipart upload {}", upload_id);
        }

        Ok(())
    }
}
