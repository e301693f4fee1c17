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

//! Errors returned by the resumable write client.
//!
//! All the functions in this crate return [Error] on failure. The error type
//! is opaque: applications query it with predicates (such as
//! [is_timeout][Error::is_timeout]), inspect the [status][Error::status]
//! reported by the service, or downcast its `source()`. The write-specific
//! problems detected by the client library are reported as a [WriteError]
//! source.
//!
//! Errors returned by a write also carry the [UploadContext]: the upload id
//! and the last persisted size the client observed. Applications can use
//! these values to resume the upload later, possibly in a different process.

pub mod rpc;
mod write;

pub use write::{ChecksumMismatch, WriteError};

use rpc::{Code, Status};
use std::error::Error as StdError;

type BoxError = Box<dyn StdError + Send + Sync>;

/// The error type for the resumable write client.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<BoxError>,
    context: Option<Box<UploadContext>>,
}

/// Classifies errors by how the client library reacts to them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Transient failures, retried with backoff. No data is lost.
    ResumableTransient,
    /// The service is overloaded or rate limiting the client. Retried, but
    /// with a longer backoff and a lower send rate.
    ResumableThrottled,
    /// Another writer is using the same upload id. Retried after the client
    /// ensures there is a single stream for the upload.
    ResumableConflict,
    /// The upload cannot complete. The upload id may still be valid.
    Fatal,
    /// The application (or the client library) violated the protocol.
    ClientContract,
}

impl ErrorCategory {
    /// Returns true if the client library retries errors in this category.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::ResumableTransient | Self::ResumableThrottled | Self::ResumableConflict
        )
    }
}

/// The upload id and persisted size associated with a failed write.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct UploadContext {
    /// The upload id for the failed write.
    pub upload_id: String,
    /// The last persisted size confirmed by the service.
    pub persisted_size: u64,
}

impl UploadContext {
    pub(crate) fn new<T: Into<String>>(upload_id: T, persisted_size: u64) -> Self {
        Self {
            upload_id: upload_id.into(),
            persisted_size,
        }
    }
}

impl Error {
    /// Creates an error representing an RPC that failed in the service.
    pub fn service(status: Status) -> Self {
        Self::new(ErrorKind::Service(Box::new(status)), None)
    }

    /// Creates an error representing a timeout.
    pub fn timeout<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Timeout, Some(source.into()))
    }

    /// The request could not be completed before its deadline.
    ///
    /// Timeouts are classified the same as [Code::DeadlineExceeded].
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Creates an error representing an exhausted retry policy.
    pub fn exhausted<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Exhausted, Some(source.into()))
    }

    /// The retry policy was exhausted.
    ///
    /// The `source()` contains the error from the last attempt.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.kind, ErrorKind::Exhausted)
    }

    /// Creates an error representing a problem producing the request.
    ///
    /// Typically this is a problem reading from the data source.
    pub fn ser<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Serialization, Some(source.into()))
    }

    /// The request could not be created, typically because the data source
    /// returned an error.
    pub fn is_serialization(&self) -> bool {
        matches!(self.kind, ErrorKind::Serialization)
    }

    /// Creates an error representing an invalid response from the service.
    pub fn deser<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Deserialization, Some(source.into()))
    }

    /// The response from the service is invalid or violates the protocol.
    pub fn is_deserialization(&self) -> bool {
        matches!(self.kind, ErrorKind::Deserialization)
    }

    /// Creates an error representing a broken connection.
    pub fn io<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Io, Some(source.into()))
    }

    /// The connection to the service failed.
    pub fn is_io(&self) -> bool {
        matches!(self.kind, ErrorKind::Io)
    }

    /// Creates an error representing a local cancellation.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, None)
    }

    /// The upload was cancelled by the application.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Creates an error representing a client-side protocol violation.
    pub fn contract<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Contract, Some(source.into()))
    }

    /// The application violated the write protocol, for example, by writing
    /// to a finalized upload.
    pub fn is_contract(&self) -> bool {
        matches!(self.kind, ErrorKind::Contract)
    }

    /// Creates an error representing a failure to obtain credentials.
    pub fn authentication<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Authentication, Some(source.into()))
    }

    /// The client could not create the authentication headers.
    ///
    /// Transient problems, as reported by the credentials, are resumable.
    pub fn is_authentication(&self) -> bool {
        matches!(self.kind, ErrorKind::Authentication)
    }

    /// Creates an unclassified error.
    pub fn other<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Other, Some(source.into()))
    }

    /// The status reported by the service, if any.
    pub fn status(&self) -> Option<&Status> {
        match &self.kind {
            ErrorKind::Service(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    /// Returns the [WriteError] in this error, if any.
    pub fn as_write_error(&self) -> Option<&WriteError> {
        self.source
            .as_ref()
            .and_then(|e| e.downcast_ref::<WriteError>())
    }

    /// Classifies the error.
    ///
    /// The resume logic uses this classification to decide if (and how) a
    /// failed write stream is resumed.
    pub fn category(&self) -> ErrorCategory {
        match &self.kind {
            ErrorKind::Service(status) => match status.code {
                Code::DeadlineExceeded | Code::Internal | Code::Unavailable => {
                    ErrorCategory::ResumableTransient
                }
                Code::ResourceExhausted => ErrorCategory::ResumableThrottled,
                Code::Aborted => ErrorCategory::ResumableConflict,
                _ => ErrorCategory::Fatal,
            },
            ErrorKind::Timeout | ErrorKind::Io => ErrorCategory::ResumableTransient,
            ErrorKind::Authentication => {
                let transient = self
                    .source
                    .as_ref()
                    .and_then(|e| e.downcast_ref::<auth::errors::CredentialsError>())
                    .is_some_and(|e| e.is_transient());
                if transient {
                    ErrorCategory::ResumableTransient
                } else {
                    ErrorCategory::Fatal
                }
            }
            ErrorKind::Contract => ErrorCategory::ClientContract,
            ErrorKind::Exhausted
            | ErrorKind::Serialization
            | ErrorKind::Deserialization
            | ErrorKind::Cancelled
            | ErrorKind::Other => ErrorCategory::Fatal,
        }
    }

    /// The upload id and persisted size for a failed write, if known.
    pub fn upload_context(&self) -> Option<&UploadContext> {
        self.context.as_deref()
    }

    /// The upload id for a failed write, if known.
    pub fn upload_id(&self) -> Option<&str> {
        self.context.as_ref().map(|c| c.upload_id.as_str())
    }

    /// The last persisted size confirmed by the service, if known.
    pub fn persisted_size(&self) -> Option<u64> {
        self.context.as_ref().map(|c| c.persisted_size)
    }

    pub(crate) fn with_context(mut self, context: UploadContext) -> Self {
        self.context = Some(Box::new(context));
        self
    }

    fn new(kind: ErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            context: None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.source) {
            (ErrorKind::Service(s), _) => write!(
                f,
                "the service reports an error with code {} described as: {}",
                s.code, s.message
            )?,
            (ErrorKind::Timeout, Some(e)) => {
                write!(f, "the request exceeded the request deadline {e}")?
            }
            (ErrorKind::Exhausted, Some(e)) => write!(f, "{e}")?,
            (ErrorKind::Serialization, Some(e)) => {
                write!(f, "cannot create the request from the data source {e}")?
            }
            (ErrorKind::Deserialization, Some(e)) => {
                write!(f, "cannot process the response {e}")?
            }
            (ErrorKind::Io, Some(e)) => write!(f, "the connection to the service failed {e}")?,
            (ErrorKind::Authentication, Some(e)) => {
                write!(f, "cannot create the authentication headers {e}")?
            }
            (ErrorKind::Cancelled, _) => write!(f, "the upload was cancelled by the application")?,
            (ErrorKind::Contract, Some(e)) => write!(f, "the write protocol was violated: {e}")?,
            (ErrorKind::Other, Some(e)) => {
                write!(f, "an unclassified problem making a request: {e}")?
            }
            (_, None) => unreachable!("no constructor allows this"),
        };
        if let Some(c) = &self.context {
            write!(
                f,
                " [upload_id={}, persisted_size={}]",
                c.upload_id, c.persisted_size
            )?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<tonic::Status> for Error {
    fn from(value: tonic::Status) -> Self {
        match value.code() {
            // The tonic layers report broken connections and expired deadlines
            // with these codes. They carry the original error as their
            // `source()`.
            tonic::Code::DeadlineExceeded if value.source().is_some() => Self::timeout(value),
            tonic::Code::Unavailable if value.source().is_some() => Self::io(value),
            _ => Self::service(Status::from(&value)),
        }
    }
}

#[derive(Debug)]
enum ErrorKind {
    Service(Box<Status>),
    Timeout,
    Exhausted,
    Serialization,
    Deserialization,
    Io,
    Authentication,
    Cancelled,
    Contract,
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn service(code: Code) -> Error {
        Error::service(Status::default().set_code(code).set_message("test-only"))
    }

    #[test_case(Code::DeadlineExceeded, ErrorCategory::ResumableTransient)]
    #[test_case(Code::Internal, ErrorCategory::ResumableTransient)]
    #[test_case(Code::Unavailable, ErrorCategory::ResumableTransient)]
    #[test_case(Code::ResourceExhausted, ErrorCategory::ResumableThrottled)]
    #[test_case(Code::Aborted, ErrorCategory::ResumableConflict)]
    #[test_case(Code::NotFound, ErrorCategory::Fatal)]
    #[test_case(Code::Cancelled, ErrorCategory::Fatal)]
    #[test_case(Code::PermissionDenied, ErrorCategory::Fatal)]
    #[test_case(Code::InvalidArgument, ErrorCategory::Fatal)]
    #[test_case(Code::Unknown, ErrorCategory::Fatal)]
    fn service_category(code: Code, want: ErrorCategory) {
        let error = service(code);
        assert_eq!(error.category(), want, "{error:?}");
        assert_eq!(error.status().map(|s| s.code), Some(code));
    }

    #[test]
    fn local_categories() {
        assert_eq!(
            Error::timeout("t").category(),
            ErrorCategory::ResumableTransient
        );
        assert_eq!(Error::io("t").category(), ErrorCategory::ResumableTransient);
        assert_eq!(
            Error::exhausted(service(Code::Internal)).category(),
            ErrorCategory::Fatal
        );
        assert_eq!(Error::cancelled().category(), ErrorCategory::Fatal);
        assert_eq!(
            Error::contract(WriteError::WriteAfterFinalize {
                upload_id: "u".into()
            })
            .category(),
            ErrorCategory::ClientContract
        );
        assert_eq!(Error::ser("bad source").category(), ErrorCategory::Fatal);
    }

    #[test]
    fn predicates() {
        let e = Error::timeout("t");
        assert!(e.is_timeout(), "{e:?}");
        assert!(!e.is_exhausted(), "{e:?}");
        let e = Error::exhausted(service(Code::Internal));
        assert!(e.is_exhausted(), "{e:?}");
        assert!(e.status().is_none(), "{e:?}");
        let e = Error::cancelled();
        assert!(e.is_cancelled(), "{e:?}");
        assert!(e.source().is_none(), "{e:?}");
        let e = Error::io("broken pipe");
        assert!(e.is_io(), "{e:?}");
        let e = Error::deser(WriteError::MissingResponse);
        assert!(e.is_deserialization(), "{e:?}");
        assert!(
            matches!(e.as_write_error(), Some(WriteError::MissingResponse)),
            "{e:?}"
        );
    }

    #[test_case(true, ErrorCategory::ResumableTransient)]
    #[test_case(false, ErrorCategory::Fatal)]
    fn authentication(transient: bool, want: ErrorCategory) {
        let source = auth::errors::CredentialsError::from_msg(transient, "test-only");
        let e = Error::authentication(source);
        assert!(e.is_authentication(), "{e:?}");
        assert_eq!(e.category(), want, "{e:?}");
        assert!(e.to_string().contains("test-only"), "{e}");

        // Errors creating the credentials are never resumable.
        let e = Error::authentication("cannot find default credentials");
        assert_eq!(e.category(), ErrorCategory::Fatal, "{e:?}");
    }

    #[test]
    fn context() {
        let e = service(Code::NotFound);
        assert!(e.upload_context().is_none(), "{e:?}");
        assert!(e.upload_id().is_none(), "{e:?}");
        let e = e.with_context(UploadContext::new("test-upload-id", 262144));
        assert_eq!(e.upload_id(), Some("test-upload-id"));
        assert_eq!(e.persisted_size(), Some(262144));
        let fmt = e.to_string();
        assert!(fmt.contains("test-upload-id"), "{fmt}");
        assert!(fmt.contains("262144"), "{fmt}");
        assert!(fmt.contains("NOT_FOUND"), "{fmt}");
    }

    #[test]
    fn from_tonic() {
        let e = Error::from(tonic::Status::aborted("conflict"));
        assert_eq!(e.category(), ErrorCategory::ResumableConflict);
        assert_eq!(e.status().map(|s| s.message.as_str()), Some("conflict"));

        let e = Error::from(tonic::Status::not_found("no such upload"));
        assert_eq!(e.category(), ErrorCategory::Fatal);
    }

    #[test]
    fn is_resumable() {
        assert!(ErrorCategory::ResumableTransient.is_resumable());
        assert!(ErrorCategory::ResumableThrottled.is_resumable());
        assert!(ErrorCategory::ResumableConflict.is_resumable());
        assert!(!ErrorCategory::Fatal.is_resumable());
        assert!(!ErrorCategory::ClientContract.is_resumable());
    }
}
