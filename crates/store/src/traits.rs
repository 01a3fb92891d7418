use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// One part accepted by a store. The etag is the store's completion token
/// and is treated as opaque by everything upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartUploadPart {
    pub part_number: i32,
    pub etag: String,
    pub size: u64,
}

pub struct CreateMultipartUploadRequest {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
}

pub struct UploadPartRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number: i32,
    pub size: u64,
    pub data: ByteStream,
}

pub struct CompleteMultipartUploadRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub parts: Vec<MultipartUploadPart>,
}

/// Sink for the parts of a multipart upload session. Implementations stage
/// or persist part payloads; they never speak a wire protocol.
#[async_trait]
pub trait PartStore: Send + Sync {
    /// Open a new upload session and return its upload id.
    async fn create_multipart_upload(&self, request: CreateMultipartUploadRequest) -> Result<String>;

    /// Accept one part payload, returning its etag.
    async fn upload_part(&self, request: UploadPartRequest) -> Result<String>;

    /// Assemble the listed parts into the final object and return its etag.
    async fn complete_multipart_upload(&self, request: CompleteMultipartUploadRequest) -> Result<String>;

    /// Discard a session and anything staged under it.
    async fn abort_multipart_upload(&self, upload_id: &str) -> Result<()>;
}
