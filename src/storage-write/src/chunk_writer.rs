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

//! Splits the upload data into messages.
//!
//! The service requires every message payload, except the last one in the
//! upload, to be a multiple of [WRITE_ALIGNMENT]. The data source produces
//! buffers of arbitrary sizes, the [ChunkWriter] regroups them.

use crate::checksum::{Checksum, payload_crc32c};
use crate::error::WriteError;
use crate::model::{ObjectChecksums, WriteRequest};
use crate::replay::Replay;
use crate::request_options::WRITE_ALIGNMENT;
use crate::upload_source::SourceSize;
use crate::{Error, Result};
use std::collections::VecDeque;

/// A single message payload.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Chunk {
    pub offset: u64,
    pub data: bytes::Bytes,
    pub crc32c: Option<u32>,
    /// This is the last chunk of the object.
    pub last: bool,
}

impl Chunk {
    pub fn end_offset(&self) -> u64 {
        self.offset + self.data.len() as u64
    }

    /// Converts the chunk into a message without the upload id or flags.
    pub fn into_request(self) -> WriteRequest {
        WriteRequest::new()
            .set_write_offset(self.offset)
            .set_content(self.data)
            .set_or_clear_crc32c(self.crc32c)
            .set_finish_write(self.last)
    }
}

pub(crate) struct ChunkWriter<R> {
    replay: R,
    chunk_size: usize,
    /// The offset of the next chunk.
    offset: u64,
    /// Data read from the source, starting at `offset`, not yet in a chunk.
    pending: VecDeque<bytes::Bytes>,
    pending_size: usize,
    eof: bool,
    checksum: Checksum,
    crc32c_per_message: bool,
}

impl<R> ChunkWriter<R>
where
    R: Replay,
{
    pub fn new(replay: R, chunk_size: usize, crc32c_per_message: bool, compute_md5: bool) -> Self {
        Self {
            replay,
            chunk_size: crate::request_options::round_up(chunk_size, WRITE_ALIGNMENT),
            offset: 0,
            pending: VecDeque::new(),
            pending_size: 0,
            eof: false,
            checksum: Checksum::new(compute_md5),
            crc32c_per_message,
        }
    }

    /// The offset of the next chunk.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The checksums of the data returned so far, `None` if they are
    /// incomplete.
    pub fn checksums(&self) -> Option<ObjectChecksums> {
        self.checksum.finalize()
    }

    /// Returns the next chunk, with at most `limit` bytes.
    ///
    /// `limit` must be a non-zero multiple of [WRITE_ALIGNMENT]. The payload
    /// is exactly `limit` (or the chunk size, if smaller) bytes, unless this
    /// is the last chunk. The last chunk may be empty.
    pub async fn next_chunk(&mut self, limit: usize) -> Result<Chunk> {
        if limit == 0 || limit % WRITE_ALIGNMENT != 0 {
            return Err(Error::contract(WriteError::MisalignedChunk {
                offset: self.offset,
                len: limit,
            }));
        }
        let target = std::cmp::min(limit, self.chunk_size);
        // Read one byte past the target, to know if this is the last chunk.
        while !self.eof && self.pending_size <= target {
            match self.replay.next().await? {
                None => self.eof = true,
                Some(b) if b.is_empty() => {}
                Some(b) => {
                    self.pending_size += b.len();
                    self.pending.push_back(b);
                }
            }
        }
        let last = self.pending_size <= target;
        let data = self.take(std::cmp::min(target, self.pending_size));
        let chunk = Chunk {
            offset: self.offset,
            crc32c: self.crc32c_per_message.then(|| payload_crc32c(&data)),
            data,
            last,
        };
        self.checksum.update(chunk.offset, &chunk.data);
        self.offset = chunk.end_offset();
        Ok(chunk)
    }

    /// Restarts the chunks at `persisted`.
    ///
    /// Moving backwards rewinds the source, moving forward skips (and hashes)
    /// the data in between.
    pub async fn seek_to(&mut self, persisted: u64) -> Result<()> {
        if persisted <= self.offset {
            if persisted == self.offset {
                return Ok(());
            }
            self.pending.clear();
            self.pending_size = 0;
            self.replay.rewind(persisted).await?;
            self.offset = persisted;
            self.eof = false;
            return Ok(());
        }
        while self.offset < persisted {
            if self.pending.is_empty() {
                match self.replay.next().await? {
                    None => {
                        self.eof = true;
                        return Err(Error::deser(WriteError::TooMuchProgress {
                            sent: self.offset,
                            persisted,
                        }));
                    }
                    Some(b) => {
                        self.pending_size += b.len();
                        self.pending.push_back(b);
                    }
                }
            }
            let skip = std::cmp::min(self.pending_size as u64, persisted - self.offset) as usize;
            let data = self.take(skip);
            self.checksum.update(self.offset, &data);
            self.offset += data.len() as u64;
        }
        Ok(())
    }

    /// The service persisted all the data before `persisted`.
    pub fn release(&mut self, persisted: u64) {
        self.replay.release(persisted);
    }

    pub async fn source_size(&mut self) -> Result<SourceSize> {
        self.replay.size().await
    }

    /// Removes `n` bytes from the pending buffers.
    fn take(&mut self, n: usize) -> bytes::Bytes {
        let mut remaining = n;
        let mut parts = Vec::new();
        while remaining > 0 {
            let Some(mut front) = self.pending.pop_front() else {
                break;
            };
            if front.len() > remaining {
                let tail = front.split_off(remaining);
                self.pending.push_front(tail);
            }
            remaining -= front.len();
            parts.push(front);
        }
        self.pending_size -= n - remaining;
        match parts.len() {
            0 => bytes::Bytes::new(),
            1 => parts.pop().unwrap_or_default(),
            _ => {
                let mut data = bytes::BytesMut::with_capacity(n - remaining);
                parts.iter().for_each(|p| data.extend_from_slice(p));
                data.freeze()
            }
        }
    }
}

// The buffers can be large, only print their sizes.
impl<R> std::fmt::Debug for ChunkWriter<R>
where
    R: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkWriter")
            .field("replay", &self.replay)
            .field("chunk_size", &self.chunk_size)
            .field("offset", &self.offset)
            .field("pending.len", &self.pending.len())
            .field("pending_size", &self.pending_size)
            .field("eof", &self.eof)
            .field("crc32c_per_message", &self.crc32c_per_message)
            .finish()
    }
}
