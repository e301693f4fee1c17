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

//! The data model for resumable writes.
//!
//! These types are independent of the wire format. The gRPC transport converts
//! them to (and from) the protobuf messages.

use std::collections::HashMap;

/// The metadata for an object in Cloud Storage.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct Object {
    /// The name of the object.
    pub name: String,
    /// The name of the bucket containing the object, in
    /// `projects/_/buckets/{bucket}` format.
    pub bucket: String,
    /// The content generation of the object.
    pub generation: i64,
    /// The version of the metadata for this generation of the object.
    pub metageneration: i64,
    /// The storage class of the object.
    pub storage_class: String,
    /// The content length of the object, in bytes.
    pub size: i64,
    /// The media type of the object data.
    pub content_type: String,
    /// User-provided metadata.
    pub metadata: HashMap<String, String>,
    /// The checksums of the complete object.
    pub checksums: Option<ObjectChecksums>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of [name][Object::name].
    pub fn set_name<T: Into<String>>(mut self, v: T) -> Self {
        self.name = v.into();
        self
    }

    /// Sets the value of [bucket][Object::bucket].
    pub fn set_bucket<T: Into<String>>(mut self, v: T) -> Self {
        self.bucket = v.into();
        self
    }

    /// Sets the value of [generation][Object::generation].
    pub fn set_generation<T: Into<i64>>(mut self, v: T) -> Self {
        self.generation = v.into();
        self
    }

    /// Sets the value of [metageneration][Object::metageneration].
    pub fn set_metageneration<T: Into<i64>>(mut self, v: T) -> Self {
        self.metageneration = v.into();
        self
    }

    /// Sets the value of [storage_class][Object::storage_class].
    pub fn set_storage_class<T: Into<String>>(mut self, v: T) -> Self {
        self.storage_class = v.into();
        self
    }

    /// Sets the value of [size][Object::size].
    pub fn set_size<T: Into<i64>>(mut self, v: T) -> Self {
        self.size = v.into();
        self
    }

    /// Sets the value of [content_type][Object::content_type].
    pub fn set_content_type<T: Into<String>>(mut self, v: T) -> Self {
        self.content_type = v.into();
        self
    }

    /// Sets the value of [metadata][Object::metadata].
    pub fn set_metadata<T, K, V>(mut self, v: T) -> Self
    where
        T: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata = v.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Sets the value of [checksums][Object::checksums].
    pub fn set_checksums<T: Into<ObjectChecksums>>(mut self, v: T) -> Self {
        self.checksums = Some(v.into());
        self
    }

    /// Sets or clears the value of [checksums][Object::checksums].
    pub fn set_or_clear_checksums<T: Into<ObjectChecksums>>(mut self, v: Option<T>) -> Self {
        self.checksums = v.map(|x| x.into());
        self
    }
}

/// Message used for storing full (not subrange) object checksums.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct ObjectChecksums {
    /// CRC32C digest of the object data.
    pub crc32c: Option<u32>,
    /// MD5 hash of the object data. Empty if not known.
    pub md5_hash: bytes::Bytes,
}

impl ObjectChecksums {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of [crc32c][ObjectChecksums::crc32c].
    pub fn set_crc32c<T: Into<u32>>(mut self, v: T) -> Self {
        self.crc32c = Some(v.into());
        self
    }

    /// Sets or clears the value of [crc32c][ObjectChecksums::crc32c].
    pub fn set_or_clear_crc32c<T: Into<u32>>(mut self, v: Option<T>) -> Self {
        self.crc32c = v.map(|x| x.into());
        self
    }

    /// Sets the value of [md5_hash][ObjectChecksums::md5_hash].
    pub fn set_md5_hash<T: Into<bytes::Bytes>>(mut self, v: T) -> Self {
        self.md5_hash = v.into();
        self
    }
}

/// The destination and preconditions for a new upload.
///
/// This is supplied once, when the upload starts, and is immutable for the
/// life of the upload.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct WriteObjectSpec {
    /// The destination object, including its bucket, name, and metadata.
    pub resource: Object,
    /// Apply a predefined set of access controls to the object.
    pub predefined_acl: String,
    /// Makes the operation conditional on the current object generation.
    ///
    /// Setting this to `0` makes the operation succeed only if there are no
    /// live versions of the object.
    pub if_generation_match: Option<i64>,
    /// Makes the operation conditional on the current object generation not
    /// matching the given value.
    pub if_generation_not_match: Option<i64>,
    /// Makes the operation conditional on the current object metageneration.
    pub if_metageneration_match: Option<i64>,
    /// Makes the operation conditional on the current object metageneration
    /// not matching the given value.
    pub if_metageneration_not_match: Option<i64>,
    /// The expected final object size, if known.
    ///
    /// The upload fails if the data source produces a different number of
    /// bytes.
    pub object_size: Option<i64>,
}

impl WriteObjectSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of [resource][WriteObjectSpec::resource].
    pub fn set_resource<T: Into<Object>>(mut self, v: T) -> Self {
        self.resource = v.into();
        self
    }

    /// Sets the value of [predefined_acl][WriteObjectSpec::predefined_acl].
    pub fn set_predefined_acl<T: Into<String>>(mut self, v: T) -> Self {
        self.predefined_acl = v.into();
        self
    }

    /// Sets the value of [if_generation_match][WriteObjectSpec::if_generation_match].
    pub fn set_if_generation_match<T: Into<i64>>(mut self, v: T) -> Self {
        self.if_generation_match = Some(v.into());
        self
    }

    /// Sets the value of [if_generation_not_match][WriteObjectSpec::if_generation_not_match].
    pub fn set_if_generation_not_match<T: Into<i64>>(mut self, v: T) -> Self {
        self.if_generation_not_match = Some(v.into());
        self
    }

    /// Sets the value of [if_metageneration_match][WriteObjectSpec::if_metageneration_match].
    pub fn set_if_metageneration_match<T: Into<i64>>(mut self, v: T) -> Self {
        self.if_metageneration_match = Some(v.into());
        self
    }

    /// Sets the value of [if_metageneration_not_match][WriteObjectSpec::if_metageneration_not_match].
    pub fn set_if_metageneration_not_match<T: Into<i64>>(mut self, v: T) -> Self {
        self.if_metageneration_not_match = Some(v.into());
        self
    }

    /// Sets the value of [object_size][WriteObjectSpec::object_size].
    pub fn set_object_size<T: Into<i64>>(mut self, v: T) -> Self {
        self.object_size = Some(v.into());
        self
    }
}

/// Parameters that are common to all the object requests.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct CommonObjectRequestParams {
    /// Encryption algorithm used with the Customer-Supplied Encryption Keys
    /// feature.
    pub encryption_algorithm: String,
    /// Encryption key used with the Customer-Supplied Encryption Keys feature.
    pub encryption_key_bytes: bytes::Bytes,
    /// SHA256 hash of the encryption key.
    pub encryption_key_sha256_bytes: bytes::Bytes,
}

impl CommonObjectRequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of [encryption_algorithm][CommonObjectRequestParams::encryption_algorithm].
    pub fn set_encryption_algorithm<T: Into<String>>(mut self, v: T) -> Self {
        self.encryption_algorithm = v.into();
        self
    }

    /// Sets the value of [encryption_key_bytes][CommonObjectRequestParams::encryption_key_bytes].
    pub fn set_encryption_key_bytes<T: Into<bytes::Bytes>>(mut self, v: T) -> Self {
        self.encryption_key_bytes = v.into();
        self
    }

    /// Sets the value of [encryption_key_sha256_bytes][CommonObjectRequestParams::encryption_key_sha256_bytes].
    pub fn set_encryption_key_sha256_bytes<T: Into<bytes::Bytes>>(mut self, v: T) -> Self {
        self.encryption_key_sha256_bytes = v.into();
        self
    }
}

/// The request to start a new resumable upload.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct StartResumableWriteRequest {
    /// The destination and preconditions.
    pub write_object_spec: WriteObjectSpec,
    /// Encryption parameters.
    pub common_object_request_params: Option<CommonObjectRequestParams>,
    /// Known checksums for the complete object.
    pub object_checksums: Option<ObjectChecksums>,
}

impl StartResumableWriteRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of [write_object_spec][StartResumableWriteRequest::write_object_spec].
    pub fn set_write_object_spec<T: Into<WriteObjectSpec>>(mut self, v: T) -> Self {
        self.write_object_spec = v.into();
        self
    }

    /// Sets or clears the value of [common_object_request_params][StartResumableWriteRequest::common_object_request_params].
    pub fn set_or_clear_common_object_request_params<T: Into<CommonObjectRequestParams>>(
        mut self,
        v: Option<T>,
    ) -> Self {
        self.common_object_request_params = v.map(|x| x.into());
        self
    }

    /// Sets or clears the value of [object_checksums][StartResumableWriteRequest::object_checksums].
    pub fn set_or_clear_object_checksums<T: Into<ObjectChecksums>>(mut self, v: Option<T>) -> Self {
        self.object_checksums = v.map(|x| x.into());
        self
    }
}

/// A single message on a write stream.
///
/// Only the first message on each stream carries the upload id. Only the
/// last message of the upload may set `finish_write`, and only that message
/// may have a payload that is not a multiple of 256KiB.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct WriteRequest {
    /// The upload id, set in the first message of each stream.
    pub upload_id: Option<String>,
    /// The offset of `content` within the object.
    pub write_offset: u64,
    /// The payload.
    pub content: bytes::Bytes,
    /// The CRC32C checksum of `content`, if computed.
    pub crc32c: Option<u32>,
    /// The checksums of the complete object, only sent with the last message.
    pub object_checksums: Option<ObjectChecksums>,
    /// Persist the data received so far. Only meaningful in bidi streams.
    pub flush: bool,
    /// Report the persisted size. Only meaningful in bidi streams.
    ///
    /// If both `flush` and `state_lookup` are set, the service flushes first,
    /// so the reported size includes the flushed data.
    pub state_lookup: bool,
    /// Finalize the object after this message.
    pub finish_write: bool,
    /// Encryption parameters.
    pub common_object_request_params: Option<CommonObjectRequestParams>,
}

impl WriteRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets or clears the value of [upload_id][WriteRequest::upload_id].
    pub fn set_or_clear_upload_id<T: Into<String>>(mut self, v: Option<T>) -> Self {
        self.upload_id = v.map(|x| x.into());
        self
    }

    /// Sets the value of [write_offset][WriteRequest::write_offset].
    pub fn set_write_offset(mut self, v: u64) -> Self {
        self.write_offset = v;
        self
    }

    /// Sets the value of [content][WriteRequest::content].
    pub fn set_content<T: Into<bytes::Bytes>>(mut self, v: T) -> Self {
        self.content = v.into();
        self
    }

    /// Sets or clears the value of [crc32c][WriteRequest::crc32c].
    pub fn set_or_clear_crc32c(mut self, v: Option<u32>) -> Self {
        self.crc32c = v;
        self
    }

    /// Sets or clears the value of [object_checksums][WriteRequest::object_checksums].
    pub fn set_or_clear_object_checksums<T: Into<ObjectChecksums>>(mut self, v: Option<T>) -> Self {
        self.object_checksums = v.map(|x| x.into());
        self
    }

    /// Sets the value of [flush][WriteRequest::flush].
    pub fn set_flush(mut self, v: bool) -> Self {
        self.flush = v;
        self
    }

    /// Sets the value of [state_lookup][WriteRequest::state_lookup].
    pub fn set_state_lookup(mut self, v: bool) -> Self {
        self.state_lookup = v;
        self
    }

    /// Sets the value of [finish_write][WriteRequest::finish_write].
    pub fn set_finish_write(mut self, v: bool) -> Self {
        self.finish_write = v;
        self
    }

    /// Sets or clears the value of [common_object_request_params][WriteRequest::common_object_request_params].
    pub fn set_or_clear_common_object_request_params<T: Into<CommonObjectRequestParams>>(
        mut self,
        v: Option<T>,
    ) -> Self {
        self.common_object_request_params = v.map(|x| x.into());
        self
    }

    /// The offset just past the payload of this message.
    pub fn end_offset(&self) -> u64 {
        self.write_offset + self.content.len() as u64
    }
}

/// The status of an upload, as reported by the service.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteStatus {
    /// The upload is in progress, and this many bytes are durably persisted.
    Persisted(u64),
    /// The upload is finalized.
    Finalized(Box<Object>),
}

impl WriteStatus {
    /// The number of bytes persisted by the service.
    pub fn persisted_size(&self) -> u64 {
        match self {
            Self::Persisted(p) => *p,
            Self::Finalized(o) => o.size.max(0) as u64,
        }
    }

    /// Returns true if the upload is finalized.
    pub fn is_finalized(&self) -> bool {
        matches!(self, Self::Finalized(_))
    }
}

/// The lifecycle state of an upload session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SessionState {
    /// The session has not written any data.
    #[default]
    NotStarted,
    /// A write stream is active.
    Writing,
    /// A write stream failed, and the session is waiting to resume it.
    AwaitingResume,
    /// The final message was sent, waiting for the service to confirm it.
    Finalizing,
    /// The object is finalized.
    Finalized,
    /// The application cancelled the session.
    Cancelled,
    /// The upload failed with an error that cannot be resumed automatically.
    Failed,
}

impl SessionState {
    /// Returns true if no more data can be written in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Cancelled)
    }
}
