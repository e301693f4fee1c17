// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Upload sessions.
//!
//! An [UploadSession] represents one resumable upload, identified by its
//! upload id. Applications write the object data with
//! [write()][UploadSession::write], which returns once the object is
//! finalized. The session tracks the persisted size across calls, a failed
//! write can be retried with the same data source and the session resumes at
//! the last persisted offset.

use crate::error::{UploadContext, WriteError};
use crate::model::{
    CommonObjectRequestParams, Object, ObjectChecksums, SessionState, WriteObjectSpec, WriteStatus,
};
use crate::persisted_size::{PersistedSize, query};
use crate::replay::{Buffered, Seekable};
use crate::request_options::{RequestOptions, WriteProtocol};
use crate::resume::ResumeController;
use crate::retry_loop::retry_loop;
use crate::stub::dynamic::Storage;
use crate::upload_source::{Payload, Seek, StreamingSource};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const EVENT_CAPACITY: usize = 128;

/// Progress notifications for an upload session.
///
/// Use [UploadSession::subscribe] to receive these events. Slow receivers may
/// miss events, the session never waits for them.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum UploadEvent {
    /// The session moved to a new state.
    StateChanged(SessionState),
    /// The service confirmed a larger persisted size.
    Persisted { size: u64 },
    /// The service is throttling the upload.
    ///
    /// The session waits for `delay` before resuming, and uses a smaller
    /// flush interval from then on.
    Throttled {
        attempt: u32,
        delay: Duration,
        flush_interval: usize,
    },
    /// The session is resuming the upload at `offset`.
    Resuming { offset: u64, attempt: u32 },
}

#[derive(Debug)]
struct Progress {
    state: SessionState,
    tracker: PersistedSize,
    // The offset of the next byte to send.
    cursor: u64,
    object: Option<Object>,
}

/// The state shared between a session and its resume controller.
#[derive(Debug)]
pub(crate) struct Shared {
    progress: Mutex<Progress>,
    events: broadcast::Sender<UploadEvent>,
}

impl Shared {
    pub fn new(tracker: PersistedSize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            progress: Mutex::new(Progress {
                state: SessionState::NotStarted,
                tracker,
                cursor: 0,
                object: None,
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress
            .lock()
            .expect("session progress lock is never poisoned")
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut self.lock().state, state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "upload session state change");
            self.emit(UploadEvent::StateChanged(state));
        }
    }

    pub fn persisted(&self) -> u64 {
        self.lock().tracker.persisted()
    }

    pub fn cursor(&self) -> u64 {
        self.lock().cursor
    }

    pub fn set_cursor(&self, offset: u64) {
        self.lock().cursor = offset;
    }

    pub fn record_sent(&self, end: u64) {
        let mut progress = self.lock();
        progress.tracker.record_sent(end);
        progress.cursor = end;
    }

    pub fn needs_query(&self) -> bool {
        self.lock().tracker.needs_query()
    }

    /// Records a status reported by the service, returns the persisted size.
    pub fn observe(&self, status: &WriteStatus) -> Result<u64> {
        let (before, after) = {
            let mut progress = self.lock();
            let before = progress.tracker.persisted();
            let after = progress.tracker.observe(status)?;
            if let WriteStatus::Finalized(object) = status {
                progress.object = Some(object.as_ref().clone());
            }
            (before, after)
        };
        if after > before {
            self.emit(UploadEvent::Persisted { size: after });
        }
        Ok(after)
    }

    pub fn object(&self) -> Option<Object> {
        self.lock().object.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: UploadEvent) {
        // Fails only if there are no receivers.
        let _ = self.events.send(event);
    }

    pub fn context(&self, upload_id: &str) -> UploadContext {
        UploadContext::new(upload_id, self.persisted())
    }
}

/// Serializes the writes for each upload id.
///
/// Sessions created by the same client for the same upload id share a lock,
/// at most one of them streams data at a time.
#[derive(Debug, Default)]
pub(crate) struct WriteLocks(Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>);

impl WriteLocks {
    pub fn get(&self, upload_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.0.lock().expect("write lock registry is never poisoned");
        locks.retain(|_, lock| lock.strong_count() > 0);
        if let Some(lock) = locks.get(upload_id).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(upload_id.to_string(), Arc::downgrade(&lock));
        lock
    }
}

/// The arguments to create a new [UploadSession].
#[derive(Debug)]
pub(crate) struct NewSession {
    pub stub: Arc<dyn Storage>,
    pub upload_id: String,
    pub spec: WriteObjectSpec,
    pub params: Option<CommonObjectRequestParams>,
    pub known_checksums: Option<ObjectChecksums>,
    pub options: RequestOptions,
    /// The upload was started by another session, or another process.
    pub resumed: bool,
}

/// A resumable upload.
///
/// # Example
/// ```
/// # use google_cloud_storage_write::client::Storage;
/// # async fn sample(client: &Storage) -> anyhow::Result<()> {
/// let session = client
///     .start_upload("projects/_/buckets/my-bucket", "my-object")
///     .send()
///     .await?;
/// println!("upload id = {}", session.upload_id());
/// let object = session.write("the quick brown fox jumps over the lazy dog").await?;
/// println!("object = {object:?}");
/// # Ok(()) }
/// ```
///
/// Sessions are cheap to clone, clones share the upload state.
#[derive(Clone, Debug)]
pub struct UploadSession {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    stub: Arc<dyn Storage>,
    upload_id: String,
    spec: WriteObjectSpec,
    params: Option<CommonObjectRequestParams>,
    known_checksums: Option<ObjectChecksums>,
    options: RequestOptions,
    shared: Shared,
    cancel: CancellationToken,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl UploadSession {
    pub(crate) fn new(args: NewSession, locks: &WriteLocks) -> Self {
        let tracker = if args.resumed {
            PersistedSize::resumed()
        } else {
            PersistedSize::new()
        };
        let write_lock = locks.get(&args.upload_id);
        Self {
            inner: Arc::new(SessionInner {
                stub: args.stub,
                upload_id: args.upload_id,
                spec: args.spec,
                params: args.params,
                known_checksums: args.known_checksums,
                options: args.options,
                shared: Shared::new(tracker),
                cancel: CancellationToken::new(),
                write_lock,
            }),
        }
    }

    /// The upload id, use it to resume the upload from another process.
    pub fn upload_id(&self) -> &str {
        &self.inner.upload_id
    }

    /// The destination and preconditions for the object.
    pub fn destination(&self) -> &WriteObjectSpec {
        &self.inner.spec
    }

    pub fn state(&self) -> SessionState {
        self.inner.shared.state()
    }

    /// The last persisted size confirmed by the service.
    pub fn persisted_size(&self) -> u64 {
        self.inner.shared.persisted()
    }

    /// The offset of the next byte sent to the service.
    ///
    /// This is always at or past [persisted_size()][Self::persisted_size],
    /// the service may not have persisted the bytes in between.
    pub fn source_cursor(&self) -> u64 {
        self.inner.shared.cursor()
    }

    /// The finalized object, if the session observed it.
    pub fn object(&self) -> Option<Object> {
        self.inner.shared.object()
    }

    /// Receives progress events for this session.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.inner.shared.subscribe()
    }

    /// The options used by [write()][Self::write].
    ///
    /// Modify them and call [write_with_options()][Self::write_with_options]
    /// to override the client defaults for a single write.
    pub fn write_options(&self) -> WriteOptions {
        WriteOptions(self.inner.options.clone())
    }

    /// Writes all the data in `payload`, and finalizes the object.
    ///
    /// The session keeps the data not yet persisted by the service in memory,
    /// so it can resume the upload after transient errors. Use
    /// [write_seekable()][Self::write_seekable] for sources that can seek.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_storage_write::session::UploadSession;
    /// # async fn sample(session: &UploadSession) -> anyhow::Result<()> {
    /// let object = session.write(bytes::Bytes::from_static(b"hello")).await?;
    /// assert_eq!(object.size, 5);
    /// # Ok(()) }
    /// ```
    pub async fn write<T, P>(&self, payload: T) -> Result<Object>
    where
        T: Into<Payload<P>>,
        Payload<P>: StreamingSource + Send,
    {
        let options = self.inner.options.clone();
        self.run(Buffered::new(payload.into()), options).await
    }

    /// Like [write()][Self::write], with per-write options.
    pub async fn write_with_options<T, P>(&self, payload: T, options: WriteOptions) -> Result<Object>
    where
        T: Into<Payload<P>>,
        Payload<P>: StreamingSource + Send,
    {
        self.run(Buffered::new(payload.into()), options.0).await
    }

    /// Writes all the data in `payload`, seeking back after errors.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_storage_write::session::UploadSession;
    /// # async fn sample(session: &UploadSession) -> anyhow::Result<()> {
    /// let file = tokio::fs::File::open("my-data.bin").await?;
    /// let object = session.write_seekable(file).await?;
    /// println!("object = {object:?}");
    /// # Ok(()) }
    /// ```
    pub async fn write_seekable<T, P>(&self, payload: T) -> Result<Object>
    where
        T: Into<Payload<P>>,
        Payload<P>: StreamingSource + Seek + Send,
    {
        let options = self.inner.options.clone();
        self.run(Seekable::new(payload.into()), options).await
    }

    /// Queries the persisted size of this upload.
    ///
    /// The result never decreases. A smaller value from the service is
    /// reported as an error.
    pub async fn query_status(&self) -> Result<u64> {
        let inner = &self.inner;
        let status = retry_loop(
            move |deadline| {
                query(inner.stub.as_ref(), &inner.upload_id, inner.params.clone(), deadline)
            },
            &inner.options,
        )
        .await
        .map_err(|e| e.with_context(inner.shared.context(&inner.upload_id)))?;
        inner
            .shared
            .observe(&status)
            .map_err(|e| e.with_context(inner.shared.context(&inner.upload_id)))
    }

    /// Cancels the upload.
    ///
    /// Any [write()][Self::write] in progress fails with a cancelled error,
    /// and the service discards the data persisted so far. Cancelling a
    /// finalized upload has no effect on the object.
    pub async fn cancel(&self) -> Result<()> {
        let inner = &self.inner;
        inner.cancel.cancel();
        if inner.shared.state() != SessionState::Finalized {
            inner.shared.set_state(SessionState::Cancelled);
        }
        tracing::info!(upload_id = inner.upload_id, "cancelling upload");
        retry_loop(
            move |deadline| async move {
                tokio::time::timeout(
                    deadline,
                    inner.stub.cancel_resumable_write(inner.upload_id.clone()),
                )
                .await
                .map_err(Error::timeout)?
            },
            &inner.options,
        )
        .await
        .map_err(|e| e.with_context(inner.shared.context(&inner.upload_id)))
    }

    async fn run<R>(&self, replay: R, options: RequestOptions) -> Result<Object>
    where
        R: crate::replay::Replay,
    {
        let inner = &self.inner;
        self.check_writable()?;
        let _guard = inner.write_lock.lock().await;
        // Another write may have finalized the object while this one waited.
        self.check_writable()?;
        tracing::debug!(
            upload_id = inner.upload_id,
            protocol = ?options.protocol,
            chunk_size = options.chunk_size(),
            flush_interval = options.flush_interval(),
            "starting write"
        );
        ResumeController::new(
            inner.stub.as_ref(),
            &inner.shared,
            &inner.upload_id,
            options,
            replay,
        )
        .with_params(inner.params.clone())
        .with_known_checksums(inner.known_checksums.clone())
        .with_object_size(inner.spec.object_size)
        .with_cancellation(inner.cancel.clone())
        .run()
        .await
    }

    fn check_writable(&self) -> Result<()> {
        let inner = &self.inner;
        let context = || inner.shared.context(&inner.upload_id);
        if inner.cancel.is_cancelled() || inner.shared.state() == SessionState::Cancelled {
            return Err(Error::cancelled().with_context(context()));
        }
        if inner.shared.state() == SessionState::Finalized {
            let error = Error::contract(WriteError::WriteAfterFinalize {
                upload_id: inner.upload_id.clone(),
            });
            return Err(error.with_context(context()));
        }
        Ok(())
    }
}

/// Per-write options.
///
/// # Example
/// ```
/// # use google_cloud_storage_write::session::UploadSession;
/// # use google_cloud_storage_write::WriteProtocol;
/// # async fn sample(session: &UploadSession) -> anyhow::Result<()> {
/// let options = session
///     .write_options()
///     .with_protocol(WriteProtocol::Bidi)
///     .with_chunk_size(4 * 1024 * 1024);
/// let object = session.write_with_options("hello", options).await?;
/// # Ok(()) }
/// ```
#[derive(Clone, Debug)]
pub struct WriteOptions(pub(crate) RequestOptions);

impl WriteOptions {
    /// Changes the retry policy for this write.
    pub fn with_retry_policy<V: Into<crate::retry_policy::RetryPolicyArg>>(mut self, v: V) -> Self {
        self.0.retry_policy = v.into().0;
        self
    }

    /// Changes the backoff policy for resumable errors, except throttling.
    pub fn with_backoff_policy<V: Into<crate::backoff_policy::BackoffPolicyArg>>(
        mut self,
        v: V,
    ) -> Self {
        self.0.backoff_policy = v.into().0;
        self
    }

    /// Changes the backoff policy used when the service throttles the upload.
    pub fn with_throttled_backoff_policy<V: Into<crate::backoff_policy::BackoffPolicyArg>>(
        mut self,
        v: V,
    ) -> Self {
        self.0.throttled_backoff_policy = v.into().0;
        self
    }

    pub fn with_retry_throttler<V: Into<crate::retry_throttler::RetryThrottlerArg>>(
        mut self,
        v: V,
    ) -> Self {
        self.0.retry_throttler = v.into().0;
        self
    }

    /// Changes the deadline for each write stream, and each status query.
    pub fn with_attempt_timeout(mut self, v: Duration) -> Self {
        self.0.attempt_timeout = v;
        self
    }

    /// Changes the payload size for each message.
    ///
    /// The value is rounded up to a multiple of
    /// [WRITE_ALIGNMENT][crate::WRITE_ALIGNMENT].
    pub fn with_chunk_size(mut self, v: usize) -> Self {
        self.0.set_chunk_size(v);
        self
    }

    /// Changes the number of bytes between flush points.
    ///
    /// The value is rounded up to a multiple of the chunk size.
    pub fn with_flush_interval(mut self, v: usize) -> Self {
        self.0.set_flush_interval(v);
        self
    }

    pub fn with_protocol(mut self, v: WriteProtocol) -> Self {
        self.0.protocol = v;
        self
    }

    /// Enables (or disables) the CRC32C checksum on each message.
    pub fn with_crc32c_per_message(mut self, v: bool) -> Self {
        self.0.crc32c_per_message = v;
        self
    }

    /// Enables (or disables) computing the MD5 hash of the object.
    pub fn with_compute_md5(mut self, v: bool) -> Self {
        self.0.compute_md5 = v;
        self
    }
}
