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

//! Explicit control over a `BidiWriteObject` stream.
//!
//! Most applications should use [UploadSession::write], which resumes the
//! upload after transient errors. Applications that need to decide when data
//! is persisted can use [BidiWriteStream] instead, and request a flush or a
//! state lookup with any message.
//!
//! [UploadSession::write]: crate::session::UploadSession::write

use crate::error::{UploadContext, WriteError};
use crate::model::{CommonObjectRequestParams, WriteRequest, WriteStatus};
use crate::persisted_size::PersistedSize;
use crate::request_options::WRITE_ALIGNMENT;
use crate::stub::WriteStream;
use crate::{Error, Result};

/// The flags for a single message in a [BidiWriteStream].
///
/// If a message requests both a flush and a state lookup, the service
/// flushes first, the persisted size in the response includes the flushed
/// data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteFlags {
    flush: bool,
    state_lookup: bool,
    finish_write: bool,
}

impl WriteFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the service to persist the data sent so far.
    pub fn set_flush(mut self, v: bool) -> Self {
        self.flush = v;
        self
    }

    /// Requests the service to report the persisted size.
    pub fn set_state_lookup(mut self, v: bool) -> Self {
        self.state_lookup = v;
        self
    }

    /// Marks the message as the last one, and finalizes the object.
    pub fn set_finish_write(mut self, v: bool) -> Self {
        self.finish_write = v;
        self
    }

    pub fn flush(&self) -> bool {
        self.flush
    }

    pub fn state_lookup(&self) -> bool {
        self.state_lookup
    }

    pub fn finish_write(&self) -> bool {
        self.finish_write
    }
}

/// A `BidiWriteObject` stream for an existing upload.
///
/// The stream does not retry or resume on errors. Use
/// [Storage::query_upload_status] to find the persisted size, and open a new
/// stream at that offset.
///
/// # Example
/// ```
/// # use google_cloud_storage_write::client::Storage;
/// # use google_cloud_storage_write::bidi::WriteFlags;
/// # async fn sample(client: &Storage, upload_id: &str) -> anyhow::Result<()> {
/// let mut stream = client.open_bidi_write(upload_id, 0).await?;
/// let flags = WriteFlags::new().set_flush(true).set_state_lookup(true);
/// stream.send(vec![0_u8; 256 * 1024], flags).await?;
/// if let Some(status) = stream.next().await? {
///     println!("persisted size = {}", status.persisted_size());
/// }
/// stream.send("the end", WriteFlags::new().set_finish_write(true)).await?;
/// let status = stream.close().await?;
/// println!("final status = {status:?}");
/// # Ok(()) }
/// ```
///
/// [Storage::query_upload_status]: crate::client::Storage::query_upload_status
#[derive(Debug)]
pub struct BidiWriteStream {
    stream: Box<dyn WriteStream>,
    upload_id: String,
    params: Option<CommonObjectRequestParams>,
    offset: u64,
    first: bool,
    finished: bool,
    crc32c_per_message: bool,
    tracker: PersistedSize,
}

impl BidiWriteStream {
    pub(crate) fn new(
        stream: Box<dyn WriteStream>,
        upload_id: String,
        offset: u64,
        crc32c_per_message: bool,
    ) -> Self {
        Self {
            stream,
            upload_id,
            params: None,
            offset,
            first: true,
            finished: false,
            crc32c_per_message,
            tracker: PersistedSize::resumed(),
        }
    }

    pub(crate) fn with_params(mut self, v: Option<CommonObjectRequestParams>) -> Self {
        self.params = v;
        self
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// The offset for the next message.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The last persisted size reported on this stream.
    pub fn persisted_size(&self) -> u64 {
        self.tracker.persisted()
    }

    /// Sends `data` at the current offset.
    ///
    /// The payload must be a multiple of
    /// [WRITE_ALIGNMENT][crate::WRITE_ALIGNMENT], unless the message
    /// finishes the write.
    pub async fn send<T: Into<bytes::Bytes>>(&mut self, data: T, flags: WriteFlags) -> Result<()> {
        let data = data.into();
        if self.finished {
            return Err(self.with_context(Error::contract(WriteError::WriteAfterFinalize {
                upload_id: self.upload_id.clone(),
            })));
        }
        if !flags.finish_write && data.len() % WRITE_ALIGNMENT != 0 {
            return Err(self.with_context(Error::contract(WriteError::MisalignedChunk {
                offset: self.offset,
                len: data.len(),
            })));
        }
        let crc32c = self
            .crc32c_per_message
            .then(|| crate::checksum::payload_crc32c(&data));
        let mut request = WriteRequest::new()
            .set_write_offset(self.offset)
            .set_content(data)
            .set_or_clear_crc32c(crc32c)
            .set_flush(flags.flush)
            .set_state_lookup(flags.state_lookup)
            .set_finish_write(flags.finish_write);
        if self.first {
            request = request
                .set_or_clear_upload_id(Some(self.upload_id.as_str()))
                .set_or_clear_common_object_request_params(self.params.clone());
        }
        let end = request.end_offset();
        self.tracker.record_sent(end);
        if let Err(e) = self.stream.send(request).await {
            return Err(self.with_context(e));
        }
        tracing::debug!(
            upload_id = self.upload_id,
            offset = self.offset,
            end,
            flush = flags.flush,
            state_lookup = flags.state_lookup,
            finish_write = flags.finish_write,
            "bidi message sent"
        );
        self.offset = end;
        self.first = false;
        self.finished = flags.finish_write;
        Ok(())
    }

    /// Receives the next response, `None` at the end of the stream.
    ///
    /// The service responds to messages with a flush and state lookup, and to
    /// the message that finishes the write.
    pub async fn next(&mut self) -> Result<Option<WriteStatus>> {
        let status = match self.stream.recv().await {
            Ok(Some(s)) => s,
            Ok(None) => return Ok(None),
            Err(e) => return Err(self.with_context(e)),
        };
        if let Err(e) = self.tracker.observe(&status) {
            return Err(self.with_context(e));
        }
        Ok(Some(status))
    }

    /// Closes the stream, and returns the last response from the service.
    pub async fn close(mut self) -> Result<WriteStatus> {
        if let Err(e) = self.stream.close().await {
            return Err(self.with_context(e));
        }
        let mut last = None;
        while let Some(status) = self.next().await? {
            last = Some(status);
        }
        last.ok_or_else(|| self.with_context(Error::deser(WriteError::MissingResponse)))
    }

    fn with_context(&self, error: Error) -> Error {
        error.with_context(UploadContext::new(
            self.upload_id.as_str(),
            self.tracker.persisted(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::rpc::Code;
    use crate::model::Object;
    use crate::retry_policy::tests::grpc_error;
    use crate::stub::tests::MockWriteStream;
    use pretty_assertions::assert_eq;

    const Q: usize = WRITE_ALIGNMENT;

    #[test]
    fn flags() {
        let flags = WriteFlags::new();
        assert!(!flags.flush() && !flags.state_lookup() && !flags.finish_write());
        let flags = flags.set_flush(true).set_state_lookup(true);
        assert!(flags.flush() && flags.state_lookup() && !flags.finish_write());
    }

    #[tokio::test]
    async fn flush_and_finish() -> anyhow::Result<()> {
        let mut mock = MockWriteStream::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_send()
            .withf(|r| {
                r.upload_id.as_deref() == Some("test-upload-id")
                    && r.write_offset == 1000 * Q as u64
                    && r.flush
                    && r.state_lookup
                    && r.crc32c.is_some()
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_recv()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(Some(WriteStatus::Persisted(1001 * Q as u64))));
        mock.expect_send()
            .withf(|r| r.upload_id.is_none() && r.finish_write && r.content.len() == 7)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        let object = Object::new().set_size(1001 * Q as i64 + 7);
        let want = WriteStatus::Finalized(Box::new(object));
        let response = want.clone();
        mock.expect_recv()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move || Ok(Some(response)));
        mock.expect_recv()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(None));

        let mut stream =
            BidiWriteStream::new(Box::new(mock), "test-upload-id".into(), 1000 * Q as u64, true);
        let flags = WriteFlags::new().set_flush(true).set_state_lookup(true);
        stream.send(vec![0_u8; Q], flags).await?;
        let status = stream.next().await?;
        assert_eq!(status, Some(WriteStatus::Persisted(1001 * Q as u64)));
        assert_eq!(stream.persisted_size(), 1001 * Q as u64);

        stream
            .send("the end", WriteFlags::new().set_finish_write(true))
            .await?;
        assert_eq!(stream.offset(), 1001 * Q as u64 + 7);
        let err = stream
            .send("more", WriteFlags::new())
            .await
            .expect_err("cannot send after finish_write");
        assert!(err.is_contract(), "{err:?}");

        let status = stream.close().await?;
        assert_eq!(status, want);
        Ok(())
    }

    #[tokio::test]
    async fn misaligned() {
        let mut mock = MockWriteStream::new();
        mock.expect_send().never();
        let mut stream = BidiWriteStream::new(Box::new(mock), "test-upload-id".into(), 0, false);
        let err = stream
            .send(vec![0_u8; Q + 1], WriteFlags::new().set_flush(true))
            .await
            .expect_err("payload is not aligned");
        assert!(err.is_contract(), "{err:?}");
        assert!(
            matches!(
                err.as_write_error(),
                Some(WriteError::MisalignedChunk { offset: 0, len }) if *len == Q + 1
            ),
            "{err:?}"
        );
        assert_eq!(err.upload_id(), Some("test-upload-id"));
    }

    #[tokio::test]
    async fn too_much_progress() {
        let mut mock = MockWriteStream::new();
        mock.expect_send().returning(|_| Ok(()));
        mock.expect_recv()
            .returning(|| Ok(Some(WriteStatus::Persisted(4 * Q as u64))));
        let mut stream = BidiWriteStream::new(Box::new(mock), "test-upload-id".into(), 0, false);
        stream
            .send(vec![0_u8; Q], WriteFlags::new().set_state_lookup(true))
            .await
            .expect("send succeeds");
        let err = stream.next().await.expect_err("more data persisted than sent");
        assert!(
            matches!(err.as_write_error(), Some(WriteError::TooMuchProgress { .. })),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn recv_error() {
        let mut mock = MockWriteStream::new();
        mock.expect_recv()
            .returning(|| Err(grpc_error(Code::NotFound)));
        let mut stream = BidiWriteStream::new(Box::new(mock), "test-upload-id".into(), 0, false);
        let err = stream.next().await.expect_err("NOT_FOUND");
        assert_eq!(err.status().map(|s| s.code), Some(Code::NotFound));
        assert_eq!(err.persisted_size(), Some(0));
    }

    #[tokio::test]
    async fn close_without_response() {
        let mut mock = MockWriteStream::new();
        mock.expect_close().returning(|| Ok(()));
        mock.expect_recv().returning(|| Ok(None));
        let stream = BidiWriteStream::new(Box::new(mock), "test-upload-id".into(), 0, false);
        let err = stream.close().await.expect_err("no response");
        assert!(
            matches!(err.as_write_error(), Some(WriteError::MissingResponse)),
            "{err:?}"
        );
    }
}
