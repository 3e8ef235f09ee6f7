//! Streaming manifest push.
//!
//! ```text
//!   caller                         background task
//!   ──────                         ───────────────
//!   write(bytes) ──► mpsc pipe ──► PUT body
//!   close()      ──► drop sender   (end of body)
//!   commit() ◄──── oneshot ◄────── response or error
//! ```
//!
//! The per-reference [`UploadStatus`] is updated from both sides and sits
//! behind a mutex.

use crate::digest::Digest;
use crate::error::{RemoteError, Result};
use crate::manifests;
use crate::oci::Descriptor;
use crate::service::{RequestBody, Service};
use crate::transport::Transport;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::channel::mpsc;
use futures::SinkExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderValue, CONTENT_LENGTH};
use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Chunks buffered between the writer and the request body.
const PIPE_CAPACITY: usize = 16;

/// Statuses a manifest PUT may answer with.
const ACCEPTED: [StatusCode; 4] = [
    StatusCode::OK,
    StatusCode::CREATED,
    StatusCode::ACCEPTED,
    StatusCode::NO_CONTENT,
];

/// Progress of one push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadStatus {
    /// Reference being pushed.
    pub reference: String,
    /// Size the descriptor announced (0 when unknown).
    pub total: u64,
    /// Bytes written so far.
    pub offset: u64,
    /// Digest the descriptor announced.
    pub expected: Digest,
    /// When the push started.
    pub started_at: DateTime<Utc>,
    /// Last progress or completion.
    pub updated_at: DateTime<Utc>,
    /// Set once the registry confirmed the expected digest.
    pub committed: bool,
}

/// Upload statuses keyed by reference, shared between writers and their
/// background requests.
#[derive(Debug, Clone, Default)]
pub struct StatusTracker {
    statuses: Arc<Mutex<HashMap<String, UploadStatus>>>,
}

impl StatusTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the status for `reference`.
    #[must_use]
    pub fn status(&self, reference: &str) -> Option<UploadStatus> {
        self.statuses.lock().get(reference).cloned()
    }

    /// Forgets `reference`.
    pub fn remove(&self, reference: &str) -> Option<UploadStatus> {
        self.statuses.lock().remove(reference)
    }

    /// Forgets every committed upload and returns how many there were.
    pub fn prune_committed(&self) -> usize {
        let mut statuses = self.statuses.lock();
        let before = statuses.len();
        statuses.retain(|_, status| !status.committed);
        before - statuses.len()
    }

    /// Records `descriptor` as already present under `reference`.
    pub(crate) fn record_existing(&self, reference: &str, descriptor: &Descriptor) {
        let now = Utc::now();
        self.statuses.lock().insert(
            reference.to_string(),
            UploadStatus {
                reference: reference.to_string(),
                total: descriptor.size,
                offset: descriptor.size,
                expected: descriptor.digest.clone(),
                started_at: now,
                updated_at: now,
                committed: true,
            },
        );
    }

    fn start(&self, reference: &str, descriptor: &Descriptor) {
        let now = Utc::now();
        self.statuses.lock().insert(
            reference.to_string(),
            UploadStatus {
                reference: reference.to_string(),
                total: descriptor.size,
                offset: 0,
                expected: descriptor.digest.clone(),
                started_at: now,
                updated_at: now,
                committed: false,
            },
        );
    }

    fn advance(&self, reference: &str, written: u64) {
        match self.statuses.lock().get_mut(reference) {
            Some(status) => {
                status.offset += written;
                status.updated_at = Utc::now();
            }
            None => warn!(reference = %reference, "Upload status missing"),
        }
    }

    fn touch(&self, reference: &str) {
        if let Some(status) = self.statuses.lock().get_mut(reference) {
            status.updated_at = Utc::now();
        }
    }

    fn commit(&self, reference: &str) {
        if let Some(status) = self.statuses.lock().get_mut(reference) {
            status.committed = true;
            status.updated_at = Utc::now();
        }
    }
}

type Chunk = std::result::Result<Bytes, std::io::Error>;

/// Write end of a streaming manifest push.
#[derive(Debug)]
pub struct ManifestWriter {
    reference: String,
    descriptor: Descriptor,
    sender: Option<mpsc::Sender<Chunk>>,
    result: Option<oneshot::Receiver<Result<reqwest::Response>>>,
    tracker: StatusTracker,
    written: u64,
}

impl ManifestWriter {
    /// Starts the background PUT for `descriptor` at the service's manifest
    /// URL and returns the write end.
    pub(crate) fn start(
        transport: Arc<Transport>,
        service: &Service,
        reference: String,
        descriptor: Descriptor,
        tracker: StatusTracker,
    ) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Chunk>(PIPE_CAPACITY);
        let body = RequestBody::stream(reqwest::Body::wrap_stream(receiver));

        let mut request = service.request(Method::PUT, service.manifests()?, body);
        if descriptor.size > 0 {
            request = request.header(CONTENT_LENGTH, HeaderValue::from(descriptor.size));
        }

        tracker.start(&reference, &descriptor);

        let (done, result) = oneshot::channel();
        let task_tracker = tracker.clone();
        let task_reference = reference.clone();
        tokio::spawn(async move {
            let response = transport.send_expecting(&request, &ACCEPTED).await;
            match &response {
                Ok(r) => debug!(
                    reference = %task_reference,
                    status = r.status().as_u16(),
                    "Manifest upload finished"
                ),
                Err(e) => warn!(reference = %task_reference, error = %e, "Manifest upload failed"),
            }
            task_tracker.touch(&task_reference);
            // The writer may have returned on cancellation already.
            let _ = done.send(response);
        });

        debug!(reference = %reference, digest = %descriptor.digest, "Started manifest upload");

        Ok(Self {
            reference,
            descriptor,
            sender: Some(sender),
            result: Some(result),
            tracker,
            written: 0,
        })
    }

    /// The reference being pushed.
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// The descriptor being pushed.
    #[must_use]
    pub const fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Bytes written so far.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// A snapshot of this push's status.
    #[must_use]
    pub fn status(&self) -> Option<UploadStatus> {
        self.tracker.status(&self.reference)
    }

    /// Streams `data` into the request body.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::UploadAborted`] if the writer was closed or the
    /// background request already ended.
    pub async fn write(&mut self, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        let len = data.len() as u64;
        let sender = self.sender.as_mut().ok_or_else(|| RemoteError::UploadAborted {
            reference: self.reference.clone(),
        })?;

        sender.send(Ok(data)).await.map_err(|_| RemoteError::UploadAborted {
            reference: self.reference.clone(),
        })?;

        self.written += len;
        self.tracker.advance(&self.reference, len);
        Ok(())
    }

    /// Ends the request body. Calling it again does nothing.
    pub fn close(&mut self) {
        if let Some(mut sender) = self.sender.take() {
            sender.close_channel();
        }
    }

    /// Closes the body, waits for the registry's answer and verifies it.
    ///
    /// `size` is checked when non-zero. The `Docker-Content-Digest` of the
    /// response must equal `expected`. `cancel` resolving first abandons the
    /// wait with [`RemoteError::Cancelled`]; the background request is left
    /// to finish on its own.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::SizeMismatch`], [`RemoteError::DigestMismatch`],
    /// [`RemoteError::Cancelled`], the request's own error, or
    /// [`RemoteError::UploadAborted`] if the result was already consumed.
    /// The status stays uncommitted on every error.
    pub async fn commit<C>(&mut self, size: u64, expected: &Digest, cancel: C) -> Result<()>
    where
        C: Future<Output = ()>,
    {
        self.close();

        if size > 0 && self.written != size {
            return Err(RemoteError::SizeMismatch {
                expected: size,
                actual: self.written,
            });
        }

        let result = self.result.take().ok_or_else(|| RemoteError::UploadAborted {
            reference: self.reference.clone(),
        })?;

        let response = tokio::select! {
            biased;
            () = cancel => {
                debug!(reference = %self.reference, "Commit cancelled");
                return Err(RemoteError::Cancelled);
            }
            delivered = result => delivered.map_err(|_| RemoteError::UploadAborted {
                reference: self.reference.clone(),
            })??,
        };

        if !ACCEPTED.contains(&response.status()) {
            return Err(RemoteError::unexpected(&response));
        }

        let actual = manifests::content_digest(response.headers())?;
        if &actual != expected {
            return Err(RemoteError::DigestMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }

        self.tracker.commit(&self.reference);
        info!(
            reference = %self.reference,
            digest = %actual,
            size = self.written,
            "Committed manifest"
        );
        Ok(())
    }

    /// Remote uploads cannot be truncated.
    ///
    /// # Errors
    ///
    /// Always returns [`RemoteError::TruncateUnsupported`].
    pub fn truncate(&mut self, _size: u64) -> Result<()> {
        Err(RemoteError::TruncateUnsupported)
    }
}

impl Drop for ManifestWriter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(size: u64) -> Descriptor {
        Descriptor::new(
            crate::MediaType::new(crate::MediaType::OCI_MANIFEST),
            Digest::sha256_of(b"{}"),
            size,
        )
    }

    #[test]
    fn test_tracker_lifecycle() {
        let tracker = StatusTracker::new();
        tracker.start("registry.example.com/library/app:v1", &descriptor(10));

        tracker.advance("registry.example.com/library/app:v1", 4);
        tracker.advance("registry.example.com/library/app:v1", 6);
        let status = tracker.status("registry.example.com/library/app:v1").unwrap();
        assert_eq!(status.offset, 10);
        assert_eq!(status.total, 10);
        assert!(!status.committed);
        assert!(status.updated_at >= status.started_at);

        tracker.commit("registry.example.com/library/app:v1");
        assert!(tracker.status("registry.example.com/library/app:v1").unwrap().committed);

        assert!(tracker.remove("registry.example.com/library/app:v1").is_some());
        assert!(tracker.status("registry.example.com/library/app:v1").is_none());
    }

    #[test]
    fn test_prune_keeps_uncommitted_uploads() {
        let tracker = StatusTracker::new();
        tracker.start("pending", &descriptor(4));
        tracker.start("done", &descriptor(4));
        tracker.commit("done");
        tracker.record_existing("present", &descriptor(7));

        assert_eq!(tracker.prune_committed(), 2);
        assert!(tracker.status("pending").is_some());
        assert!(tracker.status("done").is_none());
        assert!(tracker.status("present").is_none());
    }

    #[test]
    fn test_existing_content_is_recorded_complete() {
        let tracker = StatusTracker::new();
        tracker.record_existing("r", &descriptor(7));
        let status = tracker.status("r").unwrap();
        assert!(status.committed);
        assert_eq!((status.offset, status.total), (7, 7));
    }

    #[test]
    fn test_tracker_clones_share_state() {
        let tracker = StatusTracker::new();
        let clone = tracker.clone();
        tracker.start("r", &descriptor(0));
        clone.advance("r", 3);
        assert_eq!(tracker.status("r").unwrap().offset, 3);
    }
}
