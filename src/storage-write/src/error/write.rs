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

use crate::model::{Object, ObjectChecksums};

/// Indicates that a checksum mismatch was detected while writing an object.
///
/// When performing an object write, the client library computes the CRC32C
/// checksum (and optionally the MD5 hash) of the data sent to the service and
/// compares them against the values reported by the service when the object
/// is finalized. If the values do not match, the write operation completes
/// with an error and the error includes this type.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ChecksumMismatch {
    /// The CRC32C checksum sent by the service does not match the computed (or expected) value.
    Crc32c { got: u32, want: u32 },

    /// The MD5 hash sent by the service does not match the computed (or expected) value.
    Md5 {
        got: bytes::Bytes,
        want: bytes::Bytes,
    },

    /// The CRC32C checksum **and** the MD5 hash sent by the service do not
    /// match the computed (or expected) values.
    Both {
        got: Box<ObjectChecksums>,
        want: Box<ObjectChecksums>,
    },
}

impl std::fmt::Display for ChecksumMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crc32c { got, want } => write!(
                f,
                "the CRC32C checksums do not match: got=0x{got:08x}, want=0x{want:08x}"
            ),
            Self::Md5 { got, want } => write!(
                f,
                "the MD5 hashes do not match: got={:0x?}, want={:0x?}",
                &got, &want
            ),
            Self::Both { got, want } => {
                write!(
                    f,
                    "both the CRC32C checksums and MD5 hashes do not match: got.crc32c=0x{:08x}, want.crc32c=0x{:08x}, got.md5={:x?}, want.md5={:x?}",
                    got.crc32c.unwrap_or_default(),
                    want.crc32c.unwrap_or_default(),
                    got.md5_hash,
                    want.md5_hash
                )
            }
        }
    }
}

/// Represents an error that can occur when writing object data.
///
/// These errors are returned as the `source()` of an [Error][crate::Error].
/// None of them are retried: they indicate either a bug in the application,
/// a bug in the client library, or a service that violates the resumable
/// write protocol.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum WriteError {
    /// The service has "uncommitted" previously persisted bytes.
    ///
    /// # Troubleshoot
    ///
    /// In resumable uploads the client library queries the service to find
    /// out how many bytes it has durably stored. The service must never report
    /// fewer bytes than a previous report for the same upload id. This error
    /// indicates a bug in the service, or an upload id shared with an
    /// application that restarted the upload from scratch.
    ///
    /// Please open a bug report if you encounter this error.
    #[error(
        "the service previously persisted {offset} bytes, but now reports only {persisted} as persisted"
    )]
    UnexpectedRewind { offset: u64, persisted: u64 },

    /// The service reports more bytes persisted than sent.
    ///
    /// # Troubleshoot
    ///
    /// Most likely this indicates that two concurrent uploads are using the
    /// same upload id. Maybe your application is using a resumed upload id
    /// from a different process, or the upload id was shared by mistake.
    #[error("the service reports {persisted} bytes as persisted, but we only sent {sent} bytes")]
    TooMuchProgress { sent: u64, persisted: u64 },

    /// The size of the object does not match the number of bytes sent.
    ///
    /// # Troubleshoot
    ///
    /// The finalized object, or the object size declared when the upload
    /// started, disagrees with the number of bytes read from the data source.
    /// If the size was declared up front, verify the data source produces
    /// exactly that many bytes.
    #[error("the object size ({object}) does not match the number of bytes sent ({sent})")]
    SizeMismatch { sent: u64, object: u64 },

    /// The checksums reported by the service do not match the expected checksums.
    ///
    /// # Troubleshoot
    ///
    /// The client library compares the CRC32C checksum and/or MD5 hash of the
    /// uploaded data against the hash reported by the service at the end of
    /// the upload. This error indicates they did not match.
    ///
    /// If you provided known values for these checksums verify those values
    /// are correct.
    ///
    /// Otherwise, this is probably a data corruption problem. These are
    /// notoriously difficult to root cause. They probably indicate faulty
    /// equipment, such as the physical machine hosting your client, the
    /// network elements between your client and the service, or the physical
    /// machine hosting the service.
    ///
    /// If possible, resend the data from a different machine.
    #[error("checksum mismatch {mismatch} when uploading {} to {}", .object.name, .object.bucket)]
    ChecksumMismatch {
        mismatch: ChecksumMismatch,
        object: Box<Object>,
    },

    /// The application tried to write more data to a finalized upload.
    ///
    /// # Troubleshoot
    ///
    /// Only one finalize is accepted per upload id. Start a new upload to
    /// write a new version of the object.
    #[error("the upload {upload_id} is already finalized, no more data can be written")]
    WriteAfterFinalize { upload_id: String },

    /// A non-final message payload is not a multiple of 256KiB.
    ///
    /// # Troubleshoot
    ///
    /// Only the last message of an upload may have a size that is not a
    /// multiple of 256KiB. Buffer your data, or mark the message as the final
    /// message of the upload.
    #[error(
        "the message at offset {offset} has {len} bytes, only the final message may have a size that is not a multiple of 262144"
    )]
    MisalignedChunk { offset: u64, len: usize },

    /// The service did not finalize the object after the final message.
    ///
    /// # Troubleshoot
    ///
    /// The client library sent all the data with `finish_write` set, but the
    /// service reported the upload as still in progress. Please open a bug
    /// report if you encounter this error.
    #[error("the service did not finalize the object, it only reports {persisted} bytes as persisted")]
    NotFinalized { persisted: u64 },

    /// The service acknowledged a flush without persisting any new data.
    ///
    /// # Troubleshoot
    ///
    /// The client library resumes the upload, and fails once the retry
    /// policy is exhausted. Persistent occurrences indicate a problem in the
    /// service, please open a bug report.
    #[error(
        "the service reports {persisted} bytes as persisted after we sent {sent} bytes, no data was persisted in this flush interval"
    )]
    NoProgress { sent: u64, persisted: u64 },

    /// The service closed a write stream without reporting any status.
    #[error("the service closed the write stream without reporting the persisted size")]
    MissingResponse,
}
