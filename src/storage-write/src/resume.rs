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

//! The resume controller.
//!
//! Drives a single `write()` call on an upload session to completion. The
//! controller is an explicit state machine:
//!
//! ```norust
//! Idle -> Streaming -> { Finalized, Classifying }
//! Classifying -> { Backoff -> Streaming, AbortedRecovery -> Streaming, Fatal }
//! ```
//!
//! Every transition back to `Streaming` after a failure queries the persisted
//! size, and restarts the data source at that offset. The client never
//! resumes from its own bookkeeping, as the service may persist data even if
//! the response is lost.

use crate::chunk_writer::ChunkWriter;
use crate::error::{ErrorCategory, WriteError};
use crate::model::{CommonObjectRequestParams, Object, ObjectChecksums, SessionState, WriteRequest, WriteStatus};
use crate::persisted_size::query;
use crate::replay::Replay;
use crate::request_options::{RequestOptions, WRITE_ALIGNMENT, WriteProtocol, halve};
use crate::retry_loop::{backoff_for, effective_timeout, on_retry_failure, on_success, throttled};
use crate::retry_policy::{RetryResult, RetryState, ThrottleResult};
use crate::session::{Shared, UploadEvent};
use crate::stub::WriteStream;
use crate::stub::dynamic::Storage;
use crate::{Error, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
enum State {
    /// No stream was opened yet.
    Idle,
    /// Sending data on a write stream.
    Streaming,
    /// The last stream (or query) failed.
    Classifying(Error),
    /// Waiting before a resumable error is retried.
    Backoff { error: Error, delay: Duration },
    /// Another writer raced with this one, waiting before resuming.
    AbortedRecovery { error: Error, delay: Duration },
    Finalized(Box<Object>),
    Fatal(Error),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Streaming => "Streaming",
            Self::Classifying(_) => "Classifying",
            Self::Backoff { .. } => "Backoff",
            Self::AbortedRecovery { .. } => "AbortedRecovery",
            Self::Finalized(_) => "Finalized",
            Self::Fatal(_) => "Fatal",
        }
    }
}

pub(crate) struct ResumeController<'a, R> {
    stub: &'a dyn Storage,
    shared: &'a Shared,
    upload_id: &'a str,
    params: Option<CommonObjectRequestParams>,
    known_checksums: Option<ObjectChecksums>,
    // The object size declared when the upload started.
    object_size: Option<u64>,
    options: RequestOptions,
    // Starts at the configured value, halved each time the service throttles
    // the upload.
    flush_interval: usize,
    writer: ChunkWriter<R>,
    retry_state: RetryState,
    cancel: CancellationToken,
    // The size of the object, known once the last chunk is read.
    final_size: Option<u64>,
}

impl<'a, R> ResumeController<'a, R>
where
    R: Replay,
{
    pub fn new(
        stub: &'a dyn Storage,
        shared: &'a Shared,
        upload_id: &'a str,
        options: RequestOptions,
        replay: R,
    ) -> Self {
        let writer = ChunkWriter::new(
            replay,
            options.chunk_size(),
            options.crc32c_per_message,
            options.compute_md5,
        );
        Self {
            stub,
            shared,
            upload_id,
            params: None,
            known_checksums: None,
            object_size: None,
            flush_interval: options.flush_interval(),
            options,
            writer,
            retry_state: RetryState::new(),
            cancel: CancellationToken::new(),
            final_size: None,
        }
    }

    pub fn with_params(mut self, v: Option<CommonObjectRequestParams>) -> Self {
        self.params = v;
        self
    }

    pub fn with_known_checksums(mut self, v: Option<ObjectChecksums>) -> Self {
        self.known_checksums = v;
        self
    }

    pub fn with_object_size(mut self, v: Option<i64>) -> Self {
        self.object_size = v.and_then(|s| u64::try_from(s).ok());
        self
    }

    pub fn with_cancellation(mut self, v: CancellationToken) -> Self {
        self.cancel = v;
        self
    }

    /// Runs the state machine until the object is finalized or the upload
    /// fails.
    ///
    /// Errors carry the upload id and the last confirmed persisted size.
    pub async fn run(mut self) -> Result<Object> {
        let mut state = State::Idle;
        loop {
            tracing::debug!(
                upload_id = self.upload_id,
                state = state.name(),
                persisted_size = self.shared.persisted(),
                "resume controller transition"
            );
            state = match state {
                State::Idle => self.start().await,
                State::Streaming => self.streaming().await,
                State::Classifying(e) => self.classify(e),
                State::Backoff { error, delay } => self.backoff(error, delay).await,
                State::AbortedRecovery { error, delay } => self.recover(error, delay).await,
                State::Finalized(object) => {
                    return match self.finalize(*object) {
                        Ok(object) => Ok(object),
                        Err(e) => Err(self.fail(e)),
                    };
                }
                State::Fatal(e) => return Err(self.fail(e)),
            };
        }
    }

    async fn start(&mut self) -> State {
        if let Err(e) = self.check_source_size().await {
            return State::Fatal(e);
        }
        if self.shared.needs_query() {
            return self.resume().await;
        }
        // A previous write on this session may have persisted some data.
        let persisted = self.shared.persisted();
        match self.seek(persisted).await {
            Ok(()) => State::Streaming,
            Err(e) => State::Classifying(e),
        }
    }

    async fn streaming(&mut self) -> State {
        self.shared.set_state(SessionState::Writing);
        let result = match self.options.protocol {
            WriteProtocol::ClientStreaming => self.client_streaming().await,
            WriteProtocol::Bidi => self.bidi().await,
        };
        match result {
            Ok(object) => State::Finalized(object),
            Err(e) => State::Classifying(e),
        }
    }

    fn classify(&mut self, error: Error) -> State {
        if self.cancel.is_cancelled() {
            return State::Fatal(Error::cancelled());
        }
        let category = error.category();
        self.retry_state.attempt_count += 1;
        let backoff = backoff_for(&self.options, &error).clone();
        let flow = self.options.retry_policy.on_error(&self.retry_state, error);
        on_retry_failure(&self.options.retry_throttler, &flow);
        let error = match flow {
            RetryResult::Permanent(e) => return State::Fatal(e),
            RetryResult::Exhausted(e) => return State::Fatal(Error::exhausted(e)),
            RetryResult::Continue(e) => e,
        };
        let delay = backoff.on_failure(&self.retry_state);
        if self.out_of_time(delay) {
            return State::Fatal(Error::exhausted(error));
        }
        self.shared.set_state(SessionState::AwaitingResume);
        let attempt = self.retry_state.attempt_count;
        tracing::warn!(
            upload_id = self.upload_id,
            ?category,
            attempt,
            ?delay,
            "write attempt failed, resuming: {error}"
        );
        match category {
            ErrorCategory::ResumableThrottled => {
                self.flush_interval = halve(self.flush_interval, WRITE_ALIGNMENT);
                tracing::warn!(
                    upload_id = self.upload_id,
                    flush_interval = self.flush_interval,
                    "the service is throttling this upload, reducing the flush interval"
                );
                self.shared.emit(UploadEvent::Throttled {
                    attempt,
                    delay,
                    flush_interval: self.flush_interval,
                });
                State::Backoff { error, delay }
            }
            ErrorCategory::ResumableConflict => State::AbortedRecovery { error, delay },
            _ => State::Backoff { error, delay },
        }
    }

    async fn backoff(&mut self, error: Error, delay: Duration) -> State {
        match self.wait(error, delay).await {
            Ok(()) => self.resume().await,
            Err(e) => State::Fatal(e),
        }
    }

    async fn recover(&mut self, error: Error, delay: Duration) -> State {
        // The failed stream was dropped before `classify()`, and the session
        // write lock admits a single controller per upload id. No other
        // stream for this upload id is open in this client.
        tracing::warn!(
            upload_id = self.upload_id,
            "concurrent write detected for this upload id, resuming after {delay:?}"
        );
        self.backoff(error, delay).await
    }

    /// Queries the persisted size and restarts the data source at that
    /// offset.
    async fn resume(&mut self) -> State {
        match self.query_and_seek().await {
            Ok(None) => State::Streaming,
            Ok(Some(object)) => State::Finalized(object),
            Err(e) => State::Classifying(e),
        }
    }

    async fn query_and_seek(&mut self) -> Result<Option<Box<Object>>> {
        let deadline = self.attempt_deadline();
        let cancel = self.cancel.clone();
        let status = cancellable(
            &cancel,
            query(self.stub, self.upload_id, self.params.clone(), deadline),
        )
        .await?;
        let persisted = self.shared.observe(&status)?;
        if let WriteStatus::Finalized(object) = status {
            return Ok(Some(object));
        }
        self.writer.release(persisted);
        self.seek(persisted).await?;
        tracing::debug!(
            upload_id = self.upload_id,
            persisted_size = persisted,
            "resuming upload"
        );
        self.shared.emit(UploadEvent::Resuming {
            offset: persisted,
            attempt: self.retry_state.attempt_count,
        });
        Ok(None)
    }

    async fn client_streaming(&mut self) -> Result<Box<Object>> {
        let cancel = self.cancel.clone();
        loop {
            let deadline = self.attempt_deadline();
            let before = self.shared.persisted();
            let (status, finished) =
                timed(&cancel, deadline, self.client_streaming_segment()).await?;
            match status {
                WriteStatus::Finalized(object) => return Ok(object),
                WriteStatus::Persisted(persisted) if finished => {
                    return Err(Error::deser(WriteError::NotFinalized { persisted }));
                }
                WriteStatus::Persisted(persisted) => self.on_progress(before, persisted).await?,
            }
        }
    }

    /// Sends up to one flush interval on a new `WriteObject` stream.
    ///
    /// Returns the status reported by the service, and true if the last
    /// chunk of the object was sent.
    async fn client_streaming_segment(&mut self) -> Result<(WriteStatus, bool)> {
        let mut stream = self.open().await?;
        let end = self.writer.offset() + self.flush_interval as u64;
        let mut first = true;
        let finished = loop {
            let request = self.next_request(end, first).await?;
            first = false;
            let finish = request.finish_write;
            let boundary = request.end_offset() >= end;
            self.send(stream.as_mut(), request).await?;
            if finish || boundary {
                break finish;
            }
        };
        stream.close().await?;
        let status = self.recv(stream.as_mut()).await?;
        Ok((status, finished))
    }

    async fn bidi(&mut self) -> Result<Box<Object>> {
        let cancel = self.cancel.clone();
        let deadline = self.attempt_deadline();
        let mut stream = timed(&cancel, deadline, self.open()).await?;
        let mut first = true;
        loop {
            let deadline = self.attempt_deadline();
            let before = self.shared.persisted();
            let status = timed(&cancel, deadline, self.bidi_segment(stream.as_mut(), first)).await?;
            first = false;
            match status {
                WriteStatus::Finalized(object) => return Ok(object),
                WriteStatus::Persisted(persisted) => self.on_progress(before, persisted).await?,
            }
        }
    }

    /// Sends up to one flush interval on a `BidiWriteObject` stream.
    ///
    /// The last message in the interval requests a flush and a state lookup,
    /// the service flushes first, so the response includes all the data in
    /// the interval.
    async fn bidi_segment(
        &mut self,
        stream: &mut dyn WriteStream,
        first: bool,
    ) -> Result<WriteStatus> {
        let end = self.writer.offset() + self.flush_interval as u64;
        let mut first = first;
        loop {
            let request = self.next_request(end, first).await?;
            first = false;
            let finish = request.finish_write;
            let flush = !finish && request.end_offset() >= end;
            self.send(stream, request.set_flush(flush).set_state_lookup(flush))
                .await?;
            if finish {
                stream.close().await?;
                return match self.recv(stream).await? {
                    WriteStatus::Persisted(persisted) => {
                        Err(Error::deser(WriteError::NotFinalized { persisted }))
                    }
                    finalized => Ok(finalized),
                };
            }
            if flush {
                return self.recv(stream).await;
            }
        }
    }

    async fn open(&mut self) -> Result<Box<dyn WriteStream>> {
        tracing::debug!(
            upload_id = self.upload_id,
            offset = self.writer.offset(),
            protocol = ?self.options.protocol,
            "opening write stream"
        );
        self.stub.open_write_stream(self.options.protocol).await
    }

    /// Creates the next message, ending at or before `end`.
    async fn next_request(&mut self, end: u64, first: bool) -> Result<WriteRequest> {
        let limit = (end - self.writer.offset()) as usize;
        let chunk = self.writer.next_chunk(limit).await?;
        let (chunk_end, last) = (chunk.end_offset(), chunk.last);
        self.check_declared_size(chunk_end, last)?;
        let mut request = chunk.into_request();
        if first {
            request = request
                .set_or_clear_upload_id(Some(self.upload_id))
                .set_or_clear_common_object_request_params(self.params.clone());
        }
        if last {
            self.final_size = Some(chunk_end);
            request = request.set_or_clear_object_checksums(self.object_checksums());
            self.shared.set_state(SessionState::Finalizing);
        }
        Ok(request)
    }

    async fn send(&mut self, stream: &mut dyn WriteStream, request: WriteRequest) -> Result<()> {
        // The data may reach the service even if `send()` fails.
        self.shared.record_sent(request.end_offset());
        if let Err(e) = stream.send(request).await {
            // The stream status is more useful than the send error.
            return Err(match stream.recv().await {
                Err(status) => status,
                Ok(_) => e,
            });
        }
        Ok(())
    }

    async fn recv(&mut self, stream: &mut dyn WriteStream) -> Result<WriteStatus> {
        let status = stream
            .recv()
            .await?
            .ok_or_else(|| Error::deser(WriteError::MissingResponse))?;
        let persisted = self.shared.observe(&status)?;
        self.writer.release(persisted);
        Ok(status)
    }

    async fn seek(&mut self, offset: u64) -> Result<()> {
        self.writer.seek_to(offset).await?;
        self.shared.set_cursor(self.writer.offset());
        Ok(())
    }

    /// Rejects a source whose size contradicts the declared object size.
    ///
    /// Sources of unknown size are checked as the data is sent.
    async fn check_source_size(&mut self) -> Result<()> {
        let Some(object) = self.object_size else {
            return Ok(());
        };
        match self.writer.source_size().await?.exact() {
            Some(sent) if sent != object => {
                Err(Error::ser(WriteError::SizeMismatch { sent, object }))
            }
            _ => Ok(()),
        }
    }

    fn check_declared_size(&self, end: u64, last: bool) -> Result<()> {
        match self.object_size {
            Some(object) if end > object || (last && end != object) => {
                Err(Error::ser(WriteError::SizeMismatch { sent: end, object }))
            }
            _ => Ok(()),
        }
    }

    fn object_checksums(&self) -> Option<ObjectChecksums> {
        match (self.known_checksums.as_ref(), self.writer.checksums()) {
            (known, Some(computed)) => Some(crate::checksum::merge(known, computed)),
            (known, None) => known.cloned(),
        }
    }

    fn finalize(&mut self, object: Object) -> Result<Object> {
        on_success(&self.options.retry_throttler);
        let expected = match self.final_size {
            Some(sent) => {
                let size = object.size.max(0) as u64;
                if size != sent {
                    return Err(Error::deser(WriteError::SizeMismatch { sent, object: size }));
                }
                self.object_checksums()
            }
            // The object was finalized before this write read the data
            // source, only the application-provided checksums are known.
            None => self.known_checksums.clone(),
        };
        if let Some(expected) = expected {
            crate::checksum::validate(&expected, &object.checksums).map_err(|mismatch| {
                Error::deser(WriteError::ChecksumMismatch {
                    mismatch,
                    object: Box::new(object.clone()),
                })
            })?;
        }
        self.shared.set_state(SessionState::Finalized);
        tracing::info!(
            upload_id = self.upload_id,
            bucket = %object.bucket,
            object = %object.name,
            size = object.size,
            "upload finalized"
        );
        Ok(object)
    }

    fn fail(&self, error: Error) -> Error {
        let state = if self.cancel.is_cancelled() || error.is_cancelled() {
            SessionState::Cancelled
        } else {
            SessionState::Failed
        };
        self.shared.set_state(state);
        let context = self.shared.context(self.upload_id);
        tracing::error!(
            upload_id = self.upload_id,
            persisted_size = context.persisted_size,
            category = ?error.category(),
            "upload failed: {error}"
        );
        error.with_context(context)
    }

    /// Waits before the next attempt, honoring the retry throttler.
    async fn wait(&mut self, error: Error, delay: Duration) -> Result<()> {
        let (mut error, mut delay) = (error, delay);
        let cancel = self.cancel.clone();
        loop {
            cancellable(&cancel, async {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await?;
            if !throttled(&self.options.retry_throttler) {
                return Ok(());
            }
            error = match self.options.retry_policy.on_throttle(&self.retry_state, error) {
                ThrottleResult::Exhausted(e) => return Err(Error::exhausted(e)),
                ThrottleResult::Continue(e) => e,
            };
            delay = backoff_for(&self.options, &error).on_failure(&self.retry_state);
            if self.out_of_time(delay) {
                return Err(Error::exhausted(error));
            }
        }
    }

    /// Handles the persisted size reported at the end of a flush interval.
    ///
    /// The retry budget starts over only if the service persisted more data
    /// than it had before the interval. A stream that keeps acknowledging
    /// flushes without persisting anything is a failed attempt. Data sent
    /// past the persisted size is sent again.
    async fn on_progress(&mut self, before: u64, persisted: u64) -> Result<()> {
        if persisted <= before {
            return Err(Error::io(WriteError::NoProgress {
                sent: self.writer.offset(),
                persisted,
            }));
        }
        self.retry_state = RetryState::new();
        on_success(&self.options.retry_throttler);
        if persisted < self.writer.offset() {
            self.seek(persisted).await?;
        }
        Ok(())
    }

    fn out_of_time(&self, delay: Duration) -> bool {
        self.options
            .retry_policy
            .remaining_time(&self.retry_state)
            .is_some_and(|remaining| remaining < delay)
    }

    fn attempt_deadline(&self) -> Duration {
        effective_timeout(
            &self.options,
            self.options.retry_policy.remaining_time(&self.retry_state),
        )
    }
}

/// Runs `future` until it completes or `cancel` is triggered.
async fn cancellable<F, T>(cancel: &CancellationToken, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::cancelled()),
        r = future => r,
    }
}

/// Runs `future` with a deadline, unless `cancel` is triggered first.
async fn timed<F, T>(cancel: &CancellationToken, deadline: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    cancellable(cancel, async move {
        tokio::time::timeout(deadline, future)
            .await
            .map_err(Error::timeout)?
    })
    .await
}
