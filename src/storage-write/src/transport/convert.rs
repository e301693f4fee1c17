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

//! Conversions between the data model and the protobuf messages.

use crate::google::storage::v2 as proto;
use crate::model;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub(crate) enum ConvertError {
    #[error("the value for {field} ({value}) is out of range")]
    OutOfRange { field: &'static str, value: u64 },
    #[error("the value for {field} ({value}) must not be negative")]
    Negative { field: &'static str, value: i64 },
    #[error("the response does not include a write status")]
    MissingWriteStatus,
}

type Result<T> = std::result::Result<T, ConvertError>;

/// Converts from `Self` into the protobuf message `T`.
pub(crate) trait ToProto<T>: Sized {
    fn to_proto(self) -> Result<T>;
}

/// Converts from the protobuf message `Self` into `T`.
pub(crate) trait FromProto<T>: Sized {
    fn cnv(self) -> Result<T>;
}

fn to_i64(field: &'static str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| ConvertError::OutOfRange { field, value })
}

fn to_u64(field: &'static str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| ConvertError::Negative { field, value })
}

impl ToProto<proto::ObjectChecksums> for model::ObjectChecksums {
    fn to_proto(self) -> Result<proto::ObjectChecksums> {
        Ok(proto::ObjectChecksums {
            crc32c: self.crc32c,
            md5_hash: self.md5_hash,
        })
    }
}

impl FromProto<model::ObjectChecksums> for proto::ObjectChecksums {
    fn cnv(self) -> Result<model::ObjectChecksums> {
        Ok(model::ObjectChecksums::new()
            .set_or_clear_crc32c(self.crc32c)
            .set_md5_hash(self.md5_hash))
    }
}

impl ToProto<proto::Object> for model::Object {
    fn to_proto(self) -> Result<proto::Object> {
        Ok(proto::Object {
            name: self.name,
            bucket: self.bucket,
            generation: self.generation,
            metageneration: self.metageneration,
            storage_class: self.storage_class,
            size: self.size,
            content_type: self.content_type,
            checksums: self.checksums.map(|c| c.to_proto()).transpose()?,
            metadata: self.metadata,
        })
    }
}

impl FromProto<model::Object> for proto::Object {
    fn cnv(self) -> Result<model::Object> {
        let checksums = self.checksums.map(|c| c.cnv()).transpose()?;
        Ok(model::Object::new()
            .set_name(self.name)
            .set_bucket(self.bucket)
            .set_generation(self.generation)
            .set_metageneration(self.metageneration)
            .set_storage_class(self.storage_class)
            .set_size(self.size)
            .set_content_type(self.content_type)
            .set_metadata(self.metadata)
            .set_or_clear_checksums(checksums))
    }
}

impl ToProto<proto::WriteObjectSpec> for model::WriteObjectSpec {
    fn to_proto(self) -> Result<proto::WriteObjectSpec> {
        Ok(proto::WriteObjectSpec {
            resource: Some(self.resource.to_proto()?),
            predefined_acl: self.predefined_acl,
            if_generation_match: self.if_generation_match,
            if_generation_not_match: self.if_generation_not_match,
            if_metageneration_match: self.if_metageneration_match,
            if_metageneration_not_match: self.if_metageneration_not_match,
            object_size: self.object_size,
        })
    }
}

impl ToProto<proto::CommonObjectRequestParams> for model::CommonObjectRequestParams {
    fn to_proto(self) -> Result<proto::CommonObjectRequestParams> {
        Ok(proto::CommonObjectRequestParams {
            encryption_algorithm: self.encryption_algorithm,
            encryption_key_bytes: self.encryption_key_bytes,
            encryption_key_sha256_bytes: self.encryption_key_sha256_bytes,
        })
    }
}

impl ToProto<proto::StartResumableWriteRequest> for model::StartResumableWriteRequest {
    fn to_proto(self) -> Result<proto::StartResumableWriteRequest> {
        Ok(proto::StartResumableWriteRequest {
            write_object_spec: Some(self.write_object_spec.to_proto()?),
            common_object_request_params: self
                .common_object_request_params
                .map(|p| p.to_proto())
                .transpose()?,
            object_checksums: self.object_checksums.map(|c| c.to_proto()).transpose()?,
        })
    }
}

fn checksummed_data(
    content: bytes::Bytes,
    crc32c: Option<u32>,
) -> Option<proto::ChecksummedData> {
    if content.is_empty() && crc32c.is_none() {
        return None;
    }
    Some(proto::ChecksummedData { content, crc32c })
}

impl ToProto<proto::WriteObjectRequest> for model::WriteRequest {
    fn to_proto(self) -> Result<proto::WriteObjectRequest> {
        use proto::write_object_request::{Data, FirstMessage};
        Ok(proto::WriteObjectRequest {
            write_offset: to_i64("write_offset", self.write_offset)?,
            object_checksums: self.object_checksums.map(|c| c.to_proto()).transpose()?,
            finish_write: self.finish_write,
            common_object_request_params: self
                .common_object_request_params
                .map(|p| p.to_proto())
                .transpose()?,
            first_message: self.upload_id.map(FirstMessage::UploadId),
            data: checksummed_data(self.content, self.crc32c).map(Data::ChecksummedData),
        })
    }
}

impl ToProto<proto::BidiWriteObjectRequest> for model::WriteRequest {
    fn to_proto(self) -> Result<proto::BidiWriteObjectRequest> {
        use proto::bidi_write_object_request::{Data, FirstMessage};
        Ok(proto::BidiWriteObjectRequest {
            write_offset: to_i64("write_offset", self.write_offset)?,
            object_checksums: self.object_checksums.map(|c| c.to_proto()).transpose()?,
            state_lookup: self.state_lookup,
            flush: self.flush,
            finish_write: self.finish_write,
            common_object_request_params: self
                .common_object_request_params
                .map(|p| p.to_proto())
                .transpose()?,
            first_message: self.upload_id.map(FirstMessage::UploadId),
            data: checksummed_data(self.content, self.crc32c).map(Data::ChecksummedData),
        })
    }
}

impl FromProto<model::WriteStatus> for proto::QueryWriteStatusResponse {
    fn cnv(self) -> Result<model::WriteStatus> {
        use proto::query_write_status_response::WriteStatus;
        match self.write_status {
            None => Err(ConvertError::MissingWriteStatus),
            Some(WriteStatus::PersistedSize(p)) => {
                Ok(model::WriteStatus::Persisted(to_u64("persisted_size", p)?))
            }
            Some(WriteStatus::Resource(o)) => Ok(model::WriteStatus::Finalized(Box::new(o.cnv()?))),
        }
    }
}

impl FromProto<model::WriteStatus> for proto::WriteObjectResponse {
    fn cnv(self) -> Result<model::WriteStatus> {
        use proto::write_object_response::WriteStatus;
        match self.write_status {
            None => Err(ConvertError::MissingWriteStatus),
            Some(WriteStatus::PersistedSize(p)) => {
                Ok(model::WriteStatus::Persisted(to_u64("persisted_size", p)?))
            }
            Some(WriteStatus::Resource(o)) => Ok(model::WriteStatus::Finalized(Box::new(o.cnv()?))),
        }
    }
}

impl FromProto<model::WriteStatus> for proto::BidiWriteObjectResponse {
    fn cnv(self) -> Result<model::WriteStatus> {
        use proto::bidi_write_object_response::WriteStatus;
        match self.write_status {
            None => Err(ConvertError::MissingWriteStatus),
            Some(WriteStatus::PersistedSize(p)) => {
                Ok(model::WriteStatus::Persisted(to_u64("persisted_size", p)?))
            }
            Some(WriteStatus::Resource(o)) => Ok(model::WriteStatus::Finalized(Box::new(o.cnv()?))),
        }
    }
}
