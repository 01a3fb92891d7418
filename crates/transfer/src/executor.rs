use std::sync::Arc;
use tokio::task::JoinSet;

use haulbay_store::{
    CompleteMultipartUploadRequest, CreateMultipartUploadRequest, MultipartUploadPart, PartStore,
    UploadPartRequest,
};

use crate::error::{TransferError, TransferResult};
use crate::factory::{PartRequest, PartRequestFactory};
use crate::progress::ProgressEvent;
use crate::resume::ResumeManifest;
use crate::spec::UploadSpec;

/// Summary of a finished upload session.
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub upload_id: String,
    pub etag: String,
    pub parts: Vec<MultipartUploadPart>,
}

/// Pulls part requests from a shared factory with a pool of workers and
/// pushes them through a [`PartStore`].
pub struct TransferExecutor {
    store: Arc<dyn PartStore>,
    concurrency: usize,
}

impl TransferExecutor {
    pub fn new(store: Arc<dyn PartStore>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }

    /// Upload every outstanding part of the factory's session and return the
    /// completed-part records, sorted by part number.
    pub async fn upload_parts(
        &self,
        factory: Arc<PartRequestFactory>,
    ) -> TransferResult<Vec<MultipartUploadPart>> {
        // A sequential source has one shared cursor and its parts must be
        // read in part-number order, so it gets exactly one worker.
        let workers = if factory.is_sequential() { 1 } else { self.concurrency };

        let mut tasks = JoinSet::new();
        for _ in 0..workers {
            let store = self.store.clone();
            let factory = factory.clone();
            tasks.spawn(async move { upload_worker(store, factory).await });
        }

        let mut parts = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(completed)) => parts.extend(completed),
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(TransferError::Store(e.into())),
            }
        }

        // A fully-resumed tail flushes its skip batch at exhaustion
        replay_skip_batches(&factory);

        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    /// Run a whole upload: initiate the session if the spec has none, move
    /// every outstanding part, then complete. A failed session is aborted
    /// before the error is returned.
    pub async fn upload(
        &self,
        mut spec: UploadSpec,
        resume: Option<ResumeManifest>,
    ) -> TransferResult<CompletedUpload> {
        if spec.upload_id.is_none() {
            let upload_id = self
                .store
                .create_multipart_upload(CreateMultipartUploadRequest {
                    bucket: spec.bucket.clone(),
                    key: spec.key.clone(),
                    content_type: "binary/octet-stream".to_string(),
                })
                .await?;
            spec.upload_id = Some(upload_id);
        }

        let total_bytes = spec.source.length();
        let progress = spec.progress.clone();
        let resumed_parts: Vec<MultipartUploadPart> =
            resume.as_ref().map(|m| m.parts().to_vec()).unwrap_or_default();

        let factory = Arc::new(PartRequestFactory::new(spec, resume)?);
        let bucket = factory.bucket().to_string();
        let key = factory.key().to_string();
        let upload_id = factory.upload_id().to_string();

        tracing::info!(
            "Uploading {}/{} ({} bytes, {} resumed parts) in session {}",
            bucket,
            key,
            total_bytes,
            resumed_parts.len(),
            upload_id
        );

        let fresh = match self.upload_parts(factory).await {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!("Upload session {} failed: {}", upload_id, e);
                if let Some(listener) = &progress {
                    listener.on_event(ProgressEvent::UploadFailed);
                }
                if let Err(abort_err) = self.store.abort_multipart_upload(&upload_id).await {
                    tracing::warn!("Failed to abort upload session {}: {}", upload_id, abort_err);
                }
                return Err(e);
            }
        };

        let mut parts = resumed_parts;
        parts.extend(fresh);
        parts.sort_by_key(|p| p.part_number);

        let etag = self
            .store
            .complete_multipart_upload(CompleteMultipartUploadRequest {
                bucket,
                key,
                upload_id: upload_id.clone(),
                parts: parts.clone(),
            })
            .await?;

        if let Some(listener) = &progress {
            listener.on_event(ProgressEvent::UploadCompleted { total_bytes });
        }

        tracing::info!("Completed upload session {} with etag {}", upload_id, etag);

        Ok(CompletedUpload {
            upload_id,
            etag,
            parts,
        })
    }
}

async fn upload_worker(
    store: Arc<dyn PartStore>,
    factory: Arc<PartRequestFactory>,
) -> TransferResult<Vec<MultipartUploadPart>> {
    let mut completed = Vec::new();

    while let Some(part) = factory.try_next_part() {
        // Replay skipped-byte batches tied to this emission before the part
        // itself transfers
        replay_skip_batches(&factory);

        let PartRequest {
            bucket,
            key,
            upload_id,
            part_number,
            offset,
            size,
            data,
            progress,
            ..
        } = part;

        tracing::debug!(
            "Uploading part {} ({} bytes at offset {})",
            part_number,
            size,
            offset
        );

        let stream = data.open().await?;
        let etag = store
            .upload_part(UploadPartRequest {
                bucket,
                key,
                upload_id,
                part_number,
                size,
                data: stream,
            })
            .await?;

        if let Some(listener) = &progress {
            listener.on_event(ProgressEvent::Transferred { bytes: size });
            listener.on_event(ProgressEvent::PartCompleted { part_number, bytes: size });
        }

        completed.push(MultipartUploadPart {
            part_number,
            etag,
            size,
        });
    }

    Ok(completed)
}

fn replay_skip_batches(factory: &PartRequestFactory) {
    let batches = factory.drain_skip_batches();
    if batches.is_empty() {
        return;
    }

    match factory.progress() {
        Some(listener) => {
            for bytes in batches {
                listener.on_event(ProgressEvent::AlreadyTransferred { bytes });
            }
        }
        None => {
            tracing::debug!("Dropping {} skip batches: no progress listener attached", batches.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressListener;
    use crate::source::ContentSource;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use bytes::Bytes;
    use haulbay_store::{ByteStream, MockPartStore};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingListener {
        transferred: AtomicU64,
        already_transferred: AtomicU64,
        completed: AtomicBool,
        failed: AtomicBool,
    }

    impl ProgressListener for CountingListener {
        fn on_event(&self, event: ProgressEvent) {
            match event {
                ProgressEvent::Transferred { bytes } => {
                    self.transferred.fetch_add(bytes, Ordering::SeqCst);
                }
                ProgressEvent::AlreadyTransferred { bytes } => {
                    self.already_transferred.fetch_add(bytes, Ordering::SeqCst);
                }
                ProgressEvent::UploadCompleted { .. } => {
                    self.completed.store(true, Ordering::SeqCst);
                }
                ProgressEvent::UploadFailed => {
                    self.failed.store(true, Ordering::SeqCst);
                }
                ProgressEvent::PartCompleted { .. } => {}
            }
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn byte_stream(data: Vec<u8>) -> ByteStream {
        Box::pin(futures::stream::once(async move {
            Ok::<_, anyhow::Error>(Bytes::from(data))
        }))
    }

    #[tokio::test]
    async fn uploads_sequential_source_end_to_end() {
        let store = Arc::new(MockPartStore::new());
        let executor = TransferExecutor::new(store.clone(), 4);

        let content = pattern(250);
        let spec = UploadSpec::new(
            "checkpoints",
            "model.bin",
            ContentSource::for_reader(std::io::Cursor::new(content.clone()), 250),
        )
        .with_part_size(100);

        let completed = executor.upload(spec, None).await.unwrap();

        assert_eq!(completed.parts.len(), 3);
        assert!(completed.etag.ends_with("-3"));
        assert_eq!(store.object("checkpoints", "model.bin").unwrap(), content);
    }

    #[tokio::test]
    async fn uploads_file_source_with_concurrent_workers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.bin");
        let content = pattern(1000);
        tokio::fs::write(&path, &content).await.unwrap();

        let store = Arc::new(MockPartStore::new());
        let executor = TransferExecutor::new(store.clone(), 4);

        let spec = UploadSpec::new(
            "checkpoints",
            "model.bin",
            ContentSource::for_file(&path).await.unwrap(),
        )
        .with_part_size(128);

        let completed = executor.upload(spec, None).await.unwrap();

        assert_eq!(completed.parts.len(), 8);
        assert_eq!(store.object("checkpoints", "model.bin").unwrap(), content);
    }

    #[tokio::test]
    async fn resumed_upload_transfers_only_missing_parts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.bin");
        let content = pattern(300);
        tokio::fs::write(&path, &content).await.unwrap();

        let store = Arc::new(MockPartStore::new());

        // First attempt got part 1 through before being interrupted
        let upload_id = store
            .create_multipart_upload(CreateMultipartUploadRequest {
                bucket: "checkpoints".to_string(),
                key: "model.bin".to_string(),
                content_type: "binary/octet-stream".to_string(),
            })
            .await
            .unwrap();
        let etag = store
            .upload_part(UploadPartRequest {
                bucket: "checkpoints".to_string(),
                key: "model.bin".to_string(),
                upload_id: upload_id.clone(),
                part_number: 1,
                size: 100,
                data: byte_stream(content[..100].to_vec()),
            })
            .await
            .unwrap();
        let manifest = ResumeManifest::new(vec![MultipartUploadPart {
            part_number: 1,
            etag,
            size: 100,
        }]);

        let listener = Arc::new(CountingListener::default());
        let executor = TransferExecutor::new(store.clone(), 2);
        let spec = UploadSpec::new(
            "checkpoints",
            "model.bin",
            ContentSource::for_file(&path).await.unwrap(),
        )
        .with_upload_id(upload_id.clone())
        .with_part_size(100)
        .with_progress(listener.clone());

        let completed = executor.upload(spec, Some(manifest)).await.unwrap();

        assert_eq!(completed.upload_id, upload_id);
        assert_eq!(completed.parts.len(), 3);
        assert_eq!(store.object("checkpoints", "model.bin").unwrap(), content);

        // Skipped bytes replay as synthetic progress; totals add up to the
        // content length with no double counting
        assert_eq!(listener.already_transferred.load(Ordering::SeqCst), 100);
        assert_eq!(listener.transferred.load(Ordering::SeqCst), 200);
        assert!(listener.completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn fully_resumed_upload_completes_without_transferring() {
        let store = Arc::new(MockPartStore::new());

        let upload_id = store
            .create_multipart_upload(CreateMultipartUploadRequest {
                bucket: "checkpoints".to_string(),
                key: "model.bin".to_string(),
                content_type: "binary/octet-stream".to_string(),
            })
            .await
            .unwrap();

        let content = pattern(200);
        let mut resumed = Vec::new();
        for (part_number, range) in [(1, 0..100), (2, 100..200)] {
            let etag = store
                .upload_part(UploadPartRequest {
                    bucket: "checkpoints".to_string(),
                    key: "model.bin".to_string(),
                    upload_id: upload_id.clone(),
                    part_number,
                    size: 100,
                    data: byte_stream(content[range].to_vec()),
                })
                .await
                .unwrap();
            resumed.push(MultipartUploadPart { part_number, etag, size: 100 });
        }

        let listener = Arc::new(CountingListener::default());
        let executor = TransferExecutor::new(store.clone(), 2);
        let spec = UploadSpec::new(
            "checkpoints",
            "model.bin",
            ContentSource::for_reader(std::io::Cursor::new(Vec::<u8>::new()), 200),
        )
        .with_upload_id(upload_id.clone())
        .with_part_size(100)
        .with_progress(listener.clone());

        let completed = executor
            .upload(spec, Some(ResumeManifest::new(resumed)))
            .await
            .unwrap();

        assert_eq!(completed.parts.len(), 2);
        assert_eq!(store.object("checkpoints", "model.bin").unwrap(), content);

        // The tail skip batch still reaches the listener
        assert_eq!(listener.transferred.load(Ordering::SeqCst), 0);
        assert_eq!(listener.already_transferred.load(Ordering::SeqCst), 200);
        assert!(listener.completed.load(Ordering::SeqCst));
    }

    struct FailingStore {
        aborted: AtomicBool,
    }

    #[async_trait]
    impl PartStore for FailingStore {
        async fn create_multipart_upload(
            &self,
            _request: CreateMultipartUploadRequest,
        ) -> anyhow::Result<String> {
            Ok("mpu_failing".to_string())
        }

        async fn upload_part(&self, _request: UploadPartRequest) -> anyhow::Result<String> {
            Err(anyhow!("disk full"))
        }

        async fn complete_multipart_upload(
            &self,
            _request: CompleteMultipartUploadRequest,
        ) -> anyhow::Result<String> {
            Err(anyhow!("nothing to complete"))
        }

        async fn abort_multipart_upload(&self, _upload_id: &str) -> anyhow::Result<()> {
            self.aborted.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_part_aborts_the_session() {
        let store = Arc::new(FailingStore {
            aborted: AtomicBool::new(false),
        });
        let listener = Arc::new(CountingListener::default());
        let executor = TransferExecutor::new(store.clone(), 2);

        let content = pattern(100);
        let spec = UploadSpec::new(
            "checkpoints",
            "model.bin",
            ContentSource::for_reader(std::io::Cursor::new(content), 100),
        )
        .with_part_size(100)
        .with_progress(listener.clone());

        let result = executor.upload(spec, None).await;

        assert!(matches!(result, Err(TransferError::Store(_))));
        assert!(store.aborted.load(Ordering::SeqCst));
        assert!(listener.failed.load(Ordering::SeqCst));
        assert!(!listener.completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn upload_parts_reports_each_batch_once() {
        let store = Arc::new(MockPartStore::new());

        let upload_id = store
            .create_multipart_upload(CreateMultipartUploadRequest {
                bucket: "checkpoints".to_string(),
                key: "model.bin".to_string(),
                content_type: "binary/octet-stream".to_string(),
            })
            .await
            .unwrap();

        let content = pattern(500);
        let listener = Arc::new(CountingListener::default());
        let spec = UploadSpec::new(
            "checkpoints",
            "model.bin",
            ContentSource::for_reader(std::io::Cursor::new(content[200..].to_vec()), 500),
        )
        .with_upload_id(upload_id.clone())
        .with_part_size(100)
        .with_progress(listener.clone());

        // Parts 1 and 2 done previously; cursor already sits at their end
        let manifest = ResumeManifest::new(vec![
            MultipartUploadPart { part_number: 1, etag: "a".to_string(), size: 100 },
            MultipartUploadPart { part_number: 2, etag: "b".to_string(), size: 100 },
        ]);

        let factory = Arc::new(PartRequestFactory::new(spec, Some(manifest)).unwrap());
        let executor = TransferExecutor::new(store.clone(), 2);
        let parts = executor.upload_parts(factory.clone()).await.unwrap();

        assert_eq!(parts.iter().map(|p| p.part_number).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(listener.already_transferred.load(Ordering::SeqCst), 200);
        assert_eq!(listener.transferred.load(Ordering::SeqCst), 300);

        // Batches were drained on the way through; nothing is left
        assert!(factory.drain_skip_batches().is_empty());
    }
}
