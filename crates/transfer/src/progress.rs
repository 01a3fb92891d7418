use tokio::sync::mpsc::UnboundedSender;

/// Progress notifications emitted while an upload runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Bytes moved to the store by this attempt.
    Transferred { bytes: u64 },
    /// One contiguous run of bytes completed by a previous attempt, replayed
    /// exactly once as synthetic progress.
    AlreadyTransferred { bytes: u64 },
    PartCompleted { part_number: i32, bytes: u64 },
    UploadCompleted { total_bytes: u64 },
    UploadFailed,
}

/// Receives progress events from upload workers. Called synchronously from
/// the transfer path, so implementations must be cheap and non-blocking.
pub trait ProgressListener: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards events into a channel for a reporting layer to consume.
pub struct ChannelListener {
    sender: UnboundedSender<ProgressEvent>,
}

impl ChannelListener {
    pub fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self { sender }
    }
}

impl ProgressListener for ChannelListener {
    fn on_event(&self, event: ProgressEvent) {
        // A dropped receiver means nobody is reporting anymore
        let _ = self.sender.send(event);
    }
}
