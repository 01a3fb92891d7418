use std::sync::{Arc, Mutex};

use crate::error::{TransferError, TransferResult};
use crate::progress::ProgressListener;
use crate::resume::ResumeManifest;
use crate::source::{ContentSource, PartData};
use crate::spec::UploadSpec;

/// One bounded byte range of an upload, addressed to the part sink.
pub struct PartRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number: i32,
    pub offset: u64,
    pub size: u64,
    pub is_last_part: bool,
    pub data: PartData,
    pub progress: Option<Arc<dyn ProgressListener>>,
}

/// Generates the part requests of a multipart upload one at a time, so a
/// large upload never materializes thousands of requests up front.
///
/// Parts completed by a previous attempt (per the resume manifest) are
/// skipped; their byte counts accumulate and are handed out as skip batches
/// through [`drain_skip_batches`](Self::drain_skip_batches) so a progress
/// reporter can account for them exactly once.
///
/// The factory is safe to share across upload workers: `try_next_part` claims
/// a part atomically, so no two callers ever receive the same part number.
pub struct PartRequestFactory {
    bucket: String,
    key: String,
    upload_id: String,
    part_size: u64,
    source: ContentSource,
    progress: Option<Arc<dyn ProgressListener>>,
    resume: ResumeManifest,
    state: Mutex<FactoryState>,
}

struct FactoryState {
    next_part_number: i32,
    offset: u64,
    remaining: u64,
    pending_skip_bytes: u64,
    skip_batches: Vec<u64>,
}

impl FactoryState {
    fn flush_pending_skip(&mut self) {
        if self.pending_skip_bytes > 0 {
            let batch = self.pending_skip_bytes;
            self.pending_skip_bytes = 0;
            self.skip_batches.push(batch);
        }
    }
}

impl PartRequestFactory {
    pub fn new(spec: UploadSpec, resume: Option<ResumeManifest>) -> TransferResult<Self> {
        if spec.part_size == 0 {
            return Err(TransferError::InvalidConfiguration(
                "part size must be greater than zero".to_string(),
            ));
        }

        let upload_id = spec.upload_id.ok_or_else(|| {
            TransferError::InvalidConfiguration("upload session id is required".to_string())
        })?;

        let remaining = spec.source.length();

        Ok(Self {
            bucket: spec.bucket,
            key: spec.key,
            upload_id,
            part_size: spec.part_size,
            source: spec.source,
            progress: spec.progress,
            resume: resume.unwrap_or_default(),
            state: Mutex::new(FactoryState {
                next_part_number: 1,
                offset: 0,
                remaining,
                pending_skip_bytes: 0,
                skip_batches: Vec::new(),
            }),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn content_length(&self) -> u64 {
        self.source.length()
    }

    pub fn is_sequential(&self) -> bool {
        self.source.is_sequential()
    }

    pub fn progress(&self) -> Option<&Arc<dyn ProgressListener>> {
        self.progress.as_ref()
    }

    /// True while unconsumed bytes remain. Observation only; a concurrent
    /// caller may take the final part between this check and a subsequent
    /// call, so use [`try_next_part`](Self::try_next_part) to claim work.
    pub fn has_remaining(&self) -> bool {
        self.state.lock().unwrap().remaining > 0
    }

    /// Claim the next outstanding part, or `None` once the upload is fully
    /// handed out. Check and take happen atomically.
    pub fn try_next_part(&self) -> Option<PartRequest> {
        let mut state = self.state.lock().unwrap();

        loop {
            if state.remaining == 0 {
                // A fully-resumed tail has no part emission to anchor its
                // skipped bytes to; flush them here so drained batches always
                // sum with emitted parts to the content length.
                state.flush_pending_skip();
                return None;
            }

            let size = self.part_size.min(state.remaining);
            let is_last_part = state.remaining - size == 0;
            let part_number = state.next_part_number;

            if self.resume.contains(part_number) {
                tracing::debug!(
                    "Part {} ({} bytes at offset {}) already completed, skipping",
                    part_number,
                    size,
                    state.offset
                );
                state.offset += size;
                state.remaining -= size;
                state.pending_skip_bytes += size;
                state.next_part_number += 1;
                continue;
            }

            state.flush_pending_skip();

            let data = self.source.slice(state.offset, size);
            let request = PartRequest {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
                upload_id: self.upload_id.clone(),
                part_number,
                offset: state.offset,
                size,
                is_last_part,
                data,
                progress: self.progress.clone(),
            };

            state.offset += size;
            state.remaining -= size;
            state.next_part_number += 1;

            return Some(request);
        }
    }

    /// Return and clear the finalized skip-byte batches. Each batch is the
    /// contiguous run of previously-completed bytes preceding an emitted
    /// part (or the tail of a fully-resumed upload), reported exactly once.
    pub fn drain_skip_batches(&self) -> Vec<u64> {
        std::mem::take(&mut self.state.lock().unwrap().skip_batches)
    }
}
