use std::sync::Arc;

use crate::progress::ProgressListener;
use crate::source::ContentSource;

/// Minimum part size accepted by S3-compatible services (5 MiB).
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Default part size (8 MiB).
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Service quota on parts per upload.
pub const MAX_PARTS: u64 = 10_000;

/// Part size for `content_length`, scaled up from the default so the upload
/// never exceeds the part-count quota.
pub fn optimal_part_size(content_length: u64) -> u64 {
    DEFAULT_PART_SIZE.max(content_length.div_ceil(MAX_PARTS))
}

/// Everything that defines one upload: where it goes, which session it
/// belongs to, how to cut it, and who to tell about progress. Immutable once
/// handed to the part generator.
pub struct UploadSpec {
    pub bucket: String,
    pub key: String,
    /// Session id, if the upload has already been initiated with the store.
    pub upload_id: Option<String>,
    pub part_size: u64,
    pub source: ContentSource,
    pub progress: Option<Arc<dyn ProgressListener>>,
}

impl UploadSpec {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, source: ContentSource) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            upload_id: None,
            part_size: optimal_part_size(source.length()),
            source,
            progress: None,
        }
    }

    pub fn with_upload_id(mut self, upload_id: impl Into<String>) -> Self {
        self.upload_id = Some(upload_id.into());
        self
    }

    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    pub fn with_progress(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.progress = Some(listener);
        self
    }
}
