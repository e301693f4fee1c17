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

//! Makes upload sources restartable.
//!
//! After a failure the upload resumes from the persisted size reported by the
//! service. Any data past that point must be sent again. [Seekable] sources
//! simply seek back. [Buffered] sources keep a copy of every byte that is not
//! yet confirmed as persisted.

use crate::error::WriteError;
use crate::upload_source::{Seek, SourceSize, StreamingSource};
use crate::{Error, Result};
use std::collections::VecDeque;

/// A restartable view of an upload source.
pub(crate) trait Replay: Send {
    /// The next buffer, `None` at the end of the source.
    fn next(&mut self) -> impl Future<Output = Result<Option<bytes::Bytes>>> + Send;

    /// Restart at `offset`, which must not exceed the bytes already returned.
    fn rewind(&mut self, offset: u64) -> impl Future<Output = Result<()>> + Send;

    /// The service persisted all the bytes before `persisted`.
    fn release(&mut self, persisted: u64);

    /// The total size of the source, if known before reading it.
    fn size(&mut self) -> impl Future<Output = Result<SourceSize>> + Send;
}

/// Replays a [StreamingSource] by keeping the unconfirmed bytes in memory.
pub(crate) struct Buffered<S> {
    source: S,
    // The bytes in `[retained_start, source_offset)`.
    retained: VecDeque<bytes::Bytes>,
    retained_start: u64,
    source_offset: u64,
    cursor: u64,
}

impl<S> Buffered<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            retained: VecDeque::new(),
            retained_start: 0,
            source_offset: 0,
            cursor: 0,
        }
    }

    /// The number of bytes held in memory.
    pub fn retained_bytes(&self) -> u64 {
        self.source_offset - self.retained_start
    }

    fn replay_next(&self) -> Option<bytes::Bytes> {
        let mut start = self.retained_start;
        for b in self.retained.iter() {
            let end = start + b.len() as u64;
            if (start..end).contains(&self.cursor) {
                return Some(b.slice((self.cursor - start) as usize..));
            }
            start = end;
        }
        None
    }
}

impl<S> Replay for Buffered<S>
where
    S: StreamingSource + Send,
{
    async fn next(&mut self) -> Result<Option<bytes::Bytes>> {
        if self.cursor < self.source_offset {
            let data = self.replay_next();
            if let Some(b) = &data {
                self.cursor += b.len() as u64;
            }
            return Ok(data);
        }
        let Some(data) = self.source.next().await.transpose().map_err(Error::ser)? else {
            return Ok(None);
        };
        self.source_offset += data.len() as u64;
        self.cursor = self.source_offset;
        self.retained.push_back(data.clone());
        Ok(Some(data))
    }

    async fn rewind(&mut self, offset: u64) -> Result<()> {
        if offset < self.retained_start {
            return Err(Error::deser(WriteError::UnexpectedRewind {
                offset: self.retained_start,
                persisted: offset,
            }));
        }
        self.cursor = std::cmp::min(offset, self.source_offset);
        Ok(())
    }

    fn release(&mut self, persisted: u64) {
        let persisted = std::cmp::min(persisted, self.source_offset);
        while let Some(front) = self.retained.front() {
            let end = self.retained_start + front.len() as u64;
            if end > persisted {
                break;
            }
            self.retained_start = end;
            self.retained.pop_front();
        }
    }
    async fn size(&mut self) -> Result<SourceSize> {
        self.source.size().await.map_err(Error::ser)
    }
}

impl<S> std::fmt::Debug for Buffered<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffered")
            .field("retained_start", &self.retained_start)
            .field("retained_bytes", &self.retained_bytes())
            .field("source_offset", &self.source_offset)
            .field("cursor", &self.cursor)
            .finish()
    }
}

/// Replays a source that supports [Seek].
pub(crate) struct Seekable<S> {
    source: S,
}

impl<S> Seekable<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S> Replay for Seekable<S>
where
    S: StreamingSource + Seek + Send,
{
    async fn next(&mut self) -> Result<Option<bytes::Bytes>> {
        self.source.next().await.transpose().map_err(Error::ser)
    }

    async fn rewind(&mut self, offset: u64) -> Result<()> {
        self.source.seek(offset).await.map_err(Error::ser)
    }

    fn release(&mut self, _persisted: u64) {}

    async fn size(&mut self) -> Result<SourceSize> {
        self.source.size().await.map_err(Error::ser)
    }
}

impl<S> std::fmt::Debug for Seekable<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Seekable").finish_non_exhaustive()
    }
}
