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

//! An in-memory implementation of the resumable write RPCs.
//!
//! The fake persists every message as soon as it is received. Tests inject
//! faults to break streams and status queries.

#![allow(dead_code)]

use google_cloud_storage_write as gcs;

use gcs::error::rpc::{Code, Status};
use gcs::model::{
    CommonObjectRequestParams, Object, ObjectChecksums, StartResumableWriteRequest, WriteRequest,
    WriteStatus,
};
use gcs::stub::WriteStream;
use gcs::{Error, Result, WRITE_ALIGNMENT, WriteProtocol};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// A fault injected into the next write stream.
#[derive(Clone, Copy, Debug)]
pub struct StreamFault {
    /// The stream fails once the upload persisted this many bytes.
    pub after: u64,
    pub code: Code,
}

impl StreamFault {
    pub fn new(after: usize, code: Code) -> Self {
        Self {
            after: after as u64,
            code,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FakeStorage {
    inner: Arc<Mutex<FakeState>>,
}

#[derive(Debug, Default)]
struct FakeState {
    uploads: HashMap<String, Upload>,
    next_id: u64,
    stream_faults: VecDeque<Option<StreamFault>>,
    query_faults: VecDeque<Code>,
    query_results: Vec<u64>,
    streams_opened: usize,
    open_streams: usize,
    max_open_streams: usize,
    misaligned: usize,
    corrupt_checksums: bool,
    stalled_streams: usize,
}

#[derive(Debug)]
struct Upload {
    bucket: String,
    name: String,
    data: Vec<u8>,
    object: Option<Object>,
    cancelled: bool,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.inner.lock().expect("fake storage lock is never poisoned")
    }

    /// Applies `fault` to the next stream, in order.
    pub fn push_stream_fault(&self, fault: StreamFault) {
        self.lock().stream_faults.push_back(Some(fault));
    }

    /// The next stream opens without faults.
    pub fn push_healthy_stream(&self) {
        self.lock().stream_faults.push_back(None);
    }

    /// The next status query fails with `code`.
    pub fn push_query_fault(&self, code: Code) {
        self.lock().query_faults.push_back(code);
    }

    /// The next `count` streams accept data without persisting it.
    pub fn stall_streams(&self, count: usize) {
        self.lock().stalled_streams = count;
    }

    /// Finalized objects report bad checksums.
    pub fn corrupt_checksums(&self) {
        self.lock().corrupt_checksums = true;
    }

    /// Simulates a service bug, the persisted data shrinks.
    pub fn truncate(&self, upload_id: &str, size: usize) {
        if let Some(upload) = self.lock().uploads.get_mut(upload_id) {
            upload.data.truncate(size);
        }
    }

    /// The persisted sizes returned by successful status queries.
    pub fn query_results(&self) -> Vec<u64> {
        self.lock().query_results.clone()
    }

    pub fn streams_opened(&self) -> usize {
        self.lock().streams_opened
    }

    /// The maximum number of streams open at the same time.
    pub fn max_open_streams(&self) -> usize {
        self.lock().max_open_streams
    }

    /// The number of non-final messages with a misaligned payload.
    pub fn misaligned(&self) -> usize {
        self.lock().misaligned
    }

    /// The data persisted for `upload_id`.
    pub fn data(&self, upload_id: &str) -> Option<Vec<u8>> {
        self.lock().uploads.get(upload_id).map(|u| u.data.clone())
    }

    pub fn is_cancelled(&self, upload_id: &str) -> bool {
        self.lock()
            .uploads
            .get(upload_id)
            .is_some_and(|u| u.cancelled)
    }
}

/// Logs to the test output, filtered by `RUST_LOG`.
pub fn enable_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn service_error(code: Code, message: &str) -> Error {
    Error::service(Status::default().set_code(code).set_message(message))
}

impl gcs::stub::Storage for FakeStorage {
    async fn start_resumable_write(&self, request: StartResumableWriteRequest) -> Result<String> {
        let mut state = self.lock();
        state.next_id += 1;
        let upload_id = format!("fake-upload-{}", state.next_id);
        let resource = request.write_object_spec.resource;
        state.uploads.insert(
            upload_id.clone(),
            Upload {
                bucket: resource.bucket,
                name: resource.name,
                data: Vec::new(),
                object: None,
                cancelled: false,
            },
        );
        Ok(upload_id)
    }

    async fn query_write_status(
        &self,
        upload_id: String,
        _params: Option<CommonObjectRequestParams>,
    ) -> Result<WriteStatus> {
        let mut state = self.lock();
        if let Some(code) = state.query_faults.pop_front() {
            return Err(service_error(code, "injected query fault"));
        }
        let status = match state.uploads.get(&upload_id) {
            None => return Err(service_error(Code::NotFound, "unknown upload id")),
            Some(u) if u.cancelled => return Err(service_error(Code::NotFound, "cancelled")),
            Some(Upload {
                object: Some(o), ..
            }) => WriteStatus::Finalized(Box::new(o.clone())),
            Some(u) => WriteStatus::Persisted(u.data.len() as u64),
        };
        state.query_results.push(status.persisted_size());
        Ok(status)
    }

    async fn cancel_resumable_write(&self, upload_id: String) -> Result<()> {
        let mut state = self.lock();
        match state.uploads.get_mut(&upload_id) {
            None => Err(service_error(Code::NotFound, "unknown upload id")),
            Some(upload) => {
                upload.cancelled = true;
                Ok(())
            }
        }
    }

    async fn open_write_stream(&self, protocol: WriteProtocol) -> Result<Box<dyn WriteStream>> {
        let (fault, stalled) = {
            let mut state = self.lock();
            state.streams_opened += 1;
            state.open_streams += 1;
            state.max_open_streams = state.max_open_streams.max(state.open_streams);
            let stalled = state.stalled_streams > 0;
            state.stalled_streams = state.stalled_streams.saturating_sub(1);
            (state.stream_faults.pop_front().flatten(), stalled)
        };
        Ok(Box::new(FakeStream {
            storage: self.clone(),
            protocol,
            fault,
            stalled,
            upload_id: None,
            responses: VecDeque::new(),
            error: None,
            closed: false,
        }))
    }
}

#[derive(Debug)]
struct FakeStream {
    storage: FakeStorage,
    protocol: WriteProtocol,
    fault: Option<StreamFault>,
    stalled: bool,
    upload_id: Option<String>,
    responses: VecDeque<WriteStatus>,
    error: Option<Error>,
    closed: bool,
}

impl FakeStream {
    fn apply(&mut self, request: WriteRequest) -> Result<()> {
        if let Some(id) = &request.upload_id {
            self.upload_id = Some(id.clone());
        }
        let Some(upload_id) = self.upload_id.clone() else {
            return Err(service_error(Code::InvalidArgument, "missing upload id"));
        };
        let mut state = self.storage.lock();
        let corrupt = state.corrupt_checksums;
        if !request.finish_write && request.content.len() % WRITE_ALIGNMENT != 0 {
            state.misaligned += 1;
        }
        let Some(upload) = state.uploads.get_mut(&upload_id) else {
            return Err(service_error(Code::NotFound, "unknown upload id"));
        };
        if upload.cancelled {
            return Err(service_error(Code::NotFound, "cancelled"));
        }
        if let Some(object) = &upload.object {
            // Resending the final message is harmless.
            self.responses
                .push_back(WriteStatus::Finalized(Box::new(object.clone())));
            return Ok(());
        }
        if let Some(fault) = self.fault {
            if upload.data.len() as u64 >= fault.after {
                return Err(service_error(fault.code, "injected stream fault"));
            }
        }
        let persisted = upload.data.len() as u64;
        if self.stalled && !request.finish_write {
            if request.flush || request.state_lookup {
                self.responses.push_back(WriteStatus::Persisted(persisted));
            }
            return Ok(());
        }
        if request.write_offset > persisted {
            return Err(service_error(Code::OutOfRange, "gap in the upload data"));
        }
        // Data before the persisted size is skipped.
        let skip = (persisted - request.write_offset) as usize;
        if skip < request.content.len() {
            upload.data.extend_from_slice(&request.content[skip..]);
        }
        if request.finish_write {
            let crc32c = if corrupt {
                0xDEADBEEF
            } else {
                crc32c::crc32c(&upload.data)
            };
            let object = Object::new()
                .set_bucket(upload.bucket.as_str())
                .set_name(upload.name.as_str())
                .set_generation(1)
                .set_size(upload.data.len() as i64)
                .set_checksums(ObjectChecksums::new().set_crc32c(crc32c));
            upload.object = Some(object.clone());
            self.responses
                .push_back(WriteStatus::Finalized(Box::new(object)));
        } else if request.flush || request.state_lookup {
            self.responses
                .push_back(WriteStatus::Persisted(upload.data.len() as u64));
        }
        Ok(())
    }

    fn current(&self) -> Result<WriteStatus> {
        let Some(upload_id) = &self.upload_id else {
            return Err(service_error(Code::InvalidArgument, "missing upload id"));
        };
        let state = self.storage.lock();
        match state.uploads.get(upload_id) {
            None => Err(service_error(Code::NotFound, "unknown upload id")),
            Some(Upload {
                object: Some(o), ..
            }) => Ok(WriteStatus::Finalized(Box::new(o.clone()))),
            Some(u) => Ok(WriteStatus::Persisted(u.data.len() as u64)),
        }
    }
}

#[async_trait::async_trait]
impl WriteStream for FakeStream {
    async fn send(&mut self, request: WriteRequest) -> Result<()> {
        if self.error.is_some() {
            // The service ignores messages after an error.
            return Ok(());
        }
        if let Err(e) = self.apply(request) {
            self.error = Some(e);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<WriteStatus>> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        match self.protocol {
            WriteProtocol::Bidi => Ok(self.responses.pop_front()),
            _ if self.closed => {
                // A client-streaming RPC has a single response.
                if self.upload_id.is_none() {
                    return Ok(None);
                }
                let status = self.current()?;
                self.upload_id = None;
                Ok(Some(status))
            }
            _ => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.storage.lock().open_streams -= 1;
    }
}
