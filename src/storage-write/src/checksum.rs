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

use crate::error::ChecksumMismatch;
use crate::model::ObjectChecksums;

/// Computes the CRC32C checksum of a single message payload.
pub(crate) fn payload_crc32c(data: &bytes::Bytes) -> u32 {
    crc32c::crc32c(data)
}

/// Compares the checksums computed (or provided) by the application against
/// the checksums reported by the service.
///
/// Missing values on either side are not compared.
pub(crate) fn validate(
    expected: &ObjectChecksums,
    received: &Option<ObjectChecksums>,
) -> Result<(), ChecksumMismatch> {
    let Some(recv) = received else {
        return Ok(());
    };
    let crc32c = match (expected.crc32c, recv.crc32c) {
        (Some(e), Some(r)) if e != r => Some((r, e)),
        _ => None,
    };
    let md5 = match (&expected.md5_hash, &recv.md5_hash) {
        (e, r) if e.is_empty() || r.is_empty() || e == r => None,
        (e, r) => Some((r.clone(), e.clone())),
    };
    match (crc32c, md5) {
        (None, None) => Ok(()),
        (Some((got, want)), None) => Err(ChecksumMismatch::Crc32c { got, want }),
        (None, Some((got, want))) => Err(ChecksumMismatch::Md5 { got, want }),
        (Some(crc32c), Some(md5)) => {
            let got = ObjectChecksums::new()
                .set_crc32c(crc32c.0)
                .set_md5_hash(md5.0);
            let want = ObjectChecksums::new()
                .set_crc32c(crc32c.1)
                .set_md5_hash(md5.1);
            Err(ChecksumMismatch::Both {
                got: Box::new(got),
                want: Box::new(want),
            })
        }
    }
}

/// Merges the checksums provided by the application with the computed
/// checksums. The application-provided values take precedence.
pub(crate) fn merge(known: Option<&ObjectChecksums>, computed: ObjectChecksums) -> ObjectChecksums {
    let Some(known) = known else {
        return computed;
    };
    let mut merged = known.clone();
    merged.crc32c = merged.crc32c.or(computed.crc32c);
    if merged.md5_hash.is_empty() {
        merged.md5_hash = computed.md5_hash;
    }
    merged
}

/// The running checksums for the full object.
///
/// Data may be presented more than once, as the upload rewinds after
/// failures. Only the bytes past the last hashed offset change the checksum.
/// If the data skips ahead the checksums become unusable, and
/// [finalize][Checksum::finalize] returns `None`.
#[derive(Clone, Debug)]
pub(crate) struct Checksum {
    crc32c: Crc32c,
    md5_hash: Option<Md5>,
}

impl Checksum {
    pub fn new(compute_md5: bool) -> Self {
        Self {
            crc32c: Crc32c::default(),
            md5_hash: compute_md5.then(Md5::default),
        }
    }

    pub fn update(&mut self, offset: u64, data: &bytes::Bytes) {
        self.crc32c.update(offset, data);
        if let Some(md5) = &mut self.md5_hash {
            md5.update(offset, data);
        }
    }

    /// The checksums for all the data presented so far.
    ///
    /// Returns `None` if there is a gap in the data.
    pub fn finalize(&self) -> Option<ObjectChecksums> {
        if !self.crc32c.complete {
            return None;
        }
        let res = ObjectChecksums::new().set_crc32c(self.crc32c.checksum);
        match &self.md5_hash {
            None => Some(res),
            Some(md5) if md5.complete => Some(res.set_md5_hash(md5.finalize())),
            Some(_) => None,
        }
    }
}

#[derive(Clone, Debug)]
struct Crc32c {
    checksum: u32,
    offset: u64,
    complete: bool,
}

impl Default for Crc32c {
    fn default() -> Self {
        Self {
            checksum: 0,
            offset: 0,
            complete: true,
        }
    }
}

impl Crc32c {
    fn update(&mut self, offset: u64, data: &bytes::Bytes) {
        let (next, complete) = checked_update(self.offset, offset, data, |data| {
            self.checksum = crc32c::crc32c_append(self.checksum, data)
        });
        self.offset = next;
        self.complete = self.complete && complete;
    }
}

#[derive(Clone)]
struct Md5 {
    hasher: md5::Context,
    offset: u64,
    complete: bool,
}

impl Default for Md5 {
    fn default() -> Self {
        Self {
            hasher: md5::Context::new(),
            offset: 0,
            complete: true,
        }
    }
}

impl Md5 {
    fn update(&mut self, offset: u64, data: &bytes::Bytes) {
        let (next, complete) = checked_update(self.offset, offset, data, |data| {
            self.hasher.consume(data);
        });
        self.offset = next;
        self.complete = self.complete && complete;
    }

    fn finalize(&self) -> bytes::Bytes {
        let digest = self.hasher.clone().finalize();
        bytes::Bytes::from_owner(Vec::from_iter(digest.0))
    }
}

impl std::fmt::Debug for Md5 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Md5")
            .field("hasher", &"[skipped]")
            .field("offset", &self.offset)
            .field("complete", &self.complete)
            .finish()
    }
}

// Returns the new hashed offset, and false if `data` starts past `current`.
fn checked_update<F>(current: u64, offset: u64, data: &bytes::Bytes, updater: F) -> (u64, bool)
where
    F: FnOnce(&bytes::Bytes),
{
    let end = offset + data.len() as u64;
    if offset > current {
        return (end, false);
    }
    if (offset..end).contains(&current) {
        let data = data.slice((current - offset) as usize..);
        updater(&data);
        return (end, true);
    }
    (current, true)
}
