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

//! Data sources for resumable writes.
//!
//! A write reads the object data from a [StreamingSource]. The source always
//! produces the complete object, starting at offset 0, and the client library
//! skips any prefix the service already persisted.
//!
//! Sources that implement [Seek] are restarted at the persisted size after a
//! failure. For other sources the client library keeps the data that the
//! service has not confirmed in memory.
//!
//! Sources that know their size up front report it via
//! [size()][StreamingSource::size]. If the upload declared an object size,
//! a write with a source of a different size fails before any data is sent.

use bytes::{Bytes, BytesMut};

/// The size of a data source, if known before reading it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum SourceSize {
    /// The source ends after exactly this many bytes.
    Exact(u64),
    #[default]
    Unknown,
}

impl SourceSize {
    /// The size, if known.
    pub fn exact(&self) -> Option<u64> {
        match self {
            Self::Exact(n) => Some(*n),
            Self::Unknown => None,
        }
    }
}

/// Produces the object data for a write, in a single pass.
pub trait StreamingSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// The next buffer, `None` at the end of the object data.
    ///
    /// Buffers may have any size, the client library regroups them into
    /// messages.
    fn next(&mut self) -> impl Future<Output = Option<Result<Bytes, Self::Error>>> + Send;

    /// The total size of the object data.
    ///
    /// The default implementation reports [SourceSize::Unknown].
    fn size(&self) -> impl Future<Output = Result<SourceSize, Self::Error>> + Send {
        std::future::ready(Ok(SourceSize::Unknown))
    }
}

/// A [StreamingSource] that can restart at an arbitrary offset.
pub trait Seek: StreamingSource {
    /// After this call [next()][StreamingSource::next] returns the data
    /// starting at `offset`.
    fn seek(&mut self, offset: u64) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// The data for a write.
///
/// Converts common types into a [StreamingSource]. Use [Payload::new] to
/// write from a custom source.
///
/// # Example
/// ```
/// # use google_cloud_storage_write::upload_source::Payload;
/// let payload = Payload::from("the quick brown fox jumps over the lazy dog");
/// let parts = Payload::from(vec![
///     bytes::Bytes::from_static(b"the quick brown fox "),
///     bytes::Bytes::from_static(b"jumps over the lazy dog"),
/// ]);
/// ```
#[derive(Debug)]
pub struct Payload<T>(T);

impl<T: StreamingSource> Payload<T> {
    pub fn new(source: T) -> Self {
        Self(source)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: StreamingSource> StreamingSource for Payload<T> {
    type Error = T::Error;

    fn next(&mut self) -> impl Future<Output = Option<Result<Bytes, Self::Error>>> + Send {
        self.0.next()
    }

    fn size(&self) -> impl Future<Output = Result<SourceSize, Self::Error>> + Send {
        self.0.size()
    }
}

impl<T: Seek> Seek for Payload<T> {
    fn seek(&mut self, offset: u64) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.0.seek(offset)
    }
}

impl From<Bytes> for Payload<BufferSource> {
    fn from(value: Bytes) -> Self {
        Self(BufferSource::new([value]))
    }
}

impl From<&'static str> for Payload<BufferSource> {
    fn from(value: &'static str) -> Self {
        Self::from(Bytes::from_static(value.as_bytes()))
    }
}

impl From<Vec<u8>> for Payload<BufferSource> {
    fn from(value: Vec<u8>) -> Self {
        Self::from(Bytes::from(value))
    }
}

impl From<Vec<Bytes>> for Payload<BufferSource> {
    fn from(value: Vec<Bytes>) -> Self {
        Self(BufferSource::new(value))
    }
}

impl From<tokio::fs::File> for Payload<FileSource> {
    fn from(value: tokio::fs::File) -> Self {
        Self(FileSource { file: value })
    }
}

/// Object data already in memory, possibly split across several buffers.
#[derive(Debug)]
pub struct BufferSource {
    parts: Vec<Bytes>,
    // The end offset of each part, in the same order as `parts`.
    ends: Vec<u64>,
    position: u64,
}

impl BufferSource {
    fn new<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        let parts: Vec<Bytes> = parts.into_iter().filter(|b| !b.is_empty()).collect();
        let ends = parts
            .iter()
            .scan(0_u64, |end, b| {
                *end += b.len() as u64;
                Some(*end)
            })
            .collect();
        Self {
            parts,
            ends,
            position: 0,
        }
    }

    fn len(&self) -> u64 {
        self.ends.last().copied().unwrap_or(0)
    }
}

impl StreamingSource for BufferSource {
    type Error = std::io::Error;

    async fn next(&mut self) -> Option<Result<Bytes, Self::Error>> {
        let index = self.ends.partition_point(|end| *end <= self.position);
        let part = self.parts.get(index)?;
        let start = self.ends[index] - part.len() as u64;
        let data = part.slice((self.position - start) as usize..);
        self.position = self.ends[index];
        Some(Ok(data))
    }

    async fn size(&self) -> Result<SourceSize, Self::Error> {
        Ok(SourceSize::Exact(self.len()))
    }
}

impl Seek for BufferSource {
    async fn seek(&mut self, offset: u64) -> Result<(), Self::Error> {
        self.position = std::cmp::min(offset, self.len());
        Ok(())
    }
}

const READ_SIZE: usize = 256 * 1024;

/// Object data read from a file.
///
/// The size is the file length when the write starts.
#[derive(Debug)]
pub struct FileSource {
    file: tokio::fs::File,
}

impl StreamingSource for FileSource {
    type Error = std::io::Error;

    async fn next(&mut self) -> Option<Result<Bytes, Self::Error>> {
        use tokio::io::AsyncReadExt;
        let mut buffer = BytesMut::with_capacity(READ_SIZE);
        match self.file.read_buf(&mut buffer).await {
            Ok(0) => None,
            Ok(_) => Some(Ok(buffer.freeze())),
            Err(e) => Some(Err(e)),
        }
    }

    async fn size(&self) -> Result<SourceSize, Self::Error> {
        let metadata = self.file.metadata().await?;
        Ok(SourceSize::Exact(metadata.len()))
    }
}

impl Seek for FileSource {
    async fn seek(&mut self, offset: u64) -> Result<(), Self::Error> {
        use tokio::io::AsyncSeekExt;
        self.file.seek(std::io::SeekFrom::Start(offset)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use test_case::test_case;

    const CONTENTS: &[u8] = b"how vexingly quick daft zebras jump";

    async fn read_all<S: StreamingSource>(source: &mut S) -> anyhow::Result<Vec<u8>> {
        let mut got = Vec::new();
        while let Some(b) = source.next().await.transpose()? {
            got.extend_from_slice(&b);
        }
        Ok(got)
    }

    fn split() -> Payload<BufferSource> {
        Payload::from(vec![
            Bytes::from_static(&CONTENTS[0..4]),
            Bytes::new(),
            Bytes::from_static(&CONTENTS[4..16]),
            Bytes::from_static(&CONTENTS[16..]),
        ])
    }

    #[tokio::test]
    async fn empty() -> anyhow::Result<()> {
        let mut payload = Payload::from(Bytes::new());
        assert_eq!(payload.size().await?, SourceSize::Exact(0));
        assert!(payload.next().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn conversions() -> anyhow::Result<()> {
        let mut payload = Payload::from("how vexingly quick daft zebras jump");
        assert_eq!(read_all(&mut payload).await?, CONTENTS);
        let mut payload = Payload::from(CONTENTS.to_vec());
        assert_eq!(payload.size().await?.exact(), Some(CONTENTS.len() as u64));
        assert_eq!(read_all(&mut payload).await?, CONTENTS);
        Ok(())
    }

    #[tokio::test]
    async fn buffers() -> anyhow::Result<()> {
        let mut payload = split();
        assert_eq!(payload.size().await?, SourceSize::Exact(CONTENTS.len() as u64));
        // Empty buffers are skipped.
        let mut sizes = Vec::new();
        while let Some(b) = payload.next().await.transpose()? {
            sizes.push(b.len());
        }
        assert_eq!(sizes, vec![4, 12, CONTENTS.len() - 16]);
        Ok(())
    }

    #[test_case(0)]
    #[test_case(3)]
    #[test_case(4)]
    #[test_case(5)]
    #[test_case(16)]
    #[test_case(20)]
    #[test_case(CONTENTS.len())]
    #[tokio::test]
    async fn buffers_seek(offset: usize) -> anyhow::Result<()> {
        let mut payload = split();
        let _ = read_all(&mut payload).await?;
        payload.seek(offset as u64).await?;
        assert_eq!(read_all(&mut payload).await?, &CONTENTS[offset..]);
        Ok(())
    }

    #[tokio::test]
    async fn seek_past_end() -> anyhow::Result<()> {
        let mut payload = Payload::from(Bytes::from_static(CONTENTS));
        payload.seek(CONTENTS.len() as u64 + 10).await?;
        assert!(payload.next().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn default_size_is_unknown() -> anyhow::Result<()> {
        struct Once(Option<Bytes>);
        impl StreamingSource for Once {
            type Error = std::io::Error;
            async fn next(&mut self) -> Option<Result<Bytes, Self::Error>> {
                self.0.take().map(Ok)
            }
        }
        let mut payload = Payload::new(Once(Some(Bytes::from_static(CONTENTS))));
        assert_eq!(payload.size().await?, SourceSize::Unknown);
        assert_eq!(payload.size().await?.exact(), None);
        assert_eq!(read_all(&mut payload).await?, CONTENTS);
        Ok(())
    }

    #[tokio::test]
    async fn file() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(CONTENTS)?;
        file.flush()?;

        let mut payload = Payload::from(tokio::fs::File::open(file.path()).await?);
        assert_eq!(payload.size().await?, SourceSize::Exact(CONTENTS.len() as u64));
        assert_eq!(read_all(&mut payload).await?, CONTENTS);

        payload.seek(8).await?;
        assert_eq!(read_all(&mut payload).await?, &CONTENTS[8..]);
        Ok(())
    }
}
