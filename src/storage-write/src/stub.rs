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

//! Traits to mock the transport used by [Storage][crate::client::Storage].
//!
//! The default implementation of these traits uses gRPC. Application
//! developers may implement these traits to test their code without a
//! connection to the service, or to use a custom transport.

use crate::Result;
use crate::model::{CommonObjectRequestParams, StartResumableWriteRequest, WriteRequest, WriteStatus};
use crate::request_options::WriteProtocol;

/// Defines the unary RPCs and the write streams used by resumable writes.
///
/// Services gain new RPCs routinely. Consequently, this trait gains new methods
/// too. To avoid breaking applications the trait provides a default
/// implementation of each method. These implementations panic.
pub trait Storage: std::fmt::Debug + Send + Sync {
    /// Starts a new resumable upload, returns the upload id.
    fn start_resumable_write(
        &self,
        _request: StartResumableWriteRequest,
    ) -> impl Future<Output = Result<String>> + Send {
        unimplemented_stub::<String>()
    }

    /// Queries the persisted size (or the finalized object) for an upload.
    fn query_write_status(
        &self,
        _upload_id: String,
        _params: Option<CommonObjectRequestParams>,
    ) -> impl Future<Output = Result<WriteStatus>> + Send {
        unimplemented_stub::<WriteStatus>()
    }

    /// Cancels an upload.
    fn cancel_resumable_write(&self, _upload_id: String) -> impl Future<Output = Result<()>> + Send {
        unimplemented_stub::<()>()
    }

    /// Opens a new write stream.
    ///
    /// Opening a stream consumes a connection resource, dropping the stream
    /// releases it.
    fn open_write_stream(
        &self,
        _protocol: WriteProtocol,
    ) -> impl Future<Output = Result<Box<dyn WriteStream>>> + Send {
        unimplemented_stub::<Box<dyn WriteStream>>()
    }
}

/// A single write stream.
///
/// With [WriteProtocol::ClientStreaming] the service sends a single response,
/// after the client closes the stream. With [WriteProtocol::Bidi] the service
/// sends a response for each message with `flush` and `state_lookup`, and for
/// the message with `finish_write`.
#[async_trait::async_trait]
pub trait WriteStream: std::fmt::Debug + Send {
    /// Sends a message.
    ///
    /// Errors from `send()` may hide the actual error status, which is
    /// returned by [recv()][WriteStream::recv].
    async fn send(&mut self, request: WriteRequest) -> Result<()>;

    /// Receives the next response, `None` at the end of the stream.
    async fn recv(&mut self) -> Result<Option<WriteStatus>>;

    /// Closes the sending side of the stream.
    async fn close(&mut self) -> Result<()>;
}

pub(crate) mod dynamic {
    use super::{
        CommonObjectRequestParams, Result, StartResumableWriteRequest, WriteProtocol, WriteStatus,
        WriteStream,
    };

    /// An object-safe version of [super::Storage].
    #[async_trait::async_trait]
    pub trait Storage: std::fmt::Debug + Send + Sync {
        async fn start_resumable_write(&self, request: StartResumableWriteRequest)
        -> Result<String>;
        async fn query_write_status(
            &self,
            upload_id: String,
            params: Option<CommonObjectRequestParams>,
        ) -> Result<WriteStatus>;
        async fn cancel_resumable_write(&self, upload_id: String) -> Result<()>;
        async fn open_write_stream(&self, protocol: WriteProtocol) -> Result<Box<dyn WriteStream>>;
    }

    #[async_trait::async_trait]
    impl<T: super::Storage> Storage for T {
        async fn start_resumable_write(
            &self,
            request: StartResumableWriteRequest,
        ) -> Result<String> {
            T::start_resumable_write(self, request).await
        }

        async fn query_write_status(
            &self,
            upload_id: String,
            params: Option<CommonObjectRequestParams>,
        ) -> Result<WriteStatus> {
            T::query_write_status(self, upload_id, params).await
        }

        async fn cancel_resumable_write(&self, upload_id: String) -> Result<()> {
            T::cancel_resumable_write(self, upload_id).await
        }

        async fn open_write_stream(&self, protocol: WriteProtocol) -> Result<Box<dyn WriteStream>> {
            T::open_write_stream(self, protocol).await
        }
    }
}

async fn unimplemented_stub<T>() -> Result<T> {
    unimplemented!("to prevent breaking changes the stub trait provides default implementations that panic");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    mockall::mock! {
        #[derive(Debug)]
        pub Storage {}
        impl Storage for Storage {
            async fn start_resumable_write(&self, request: StartResumableWriteRequest) -> Result<String>;
            async fn query_write_status(&self, upload_id: String, params: Option<CommonObjectRequestParams>) -> Result<WriteStatus>;
            async fn cancel_resumable_write(&self, upload_id: String) -> Result<()>;
            async fn open_write_stream(&self, protocol: WriteProtocol) -> Result<Box<dyn WriteStream>>;
        }
    }

    mockall::mock! {
        #[derive(Debug)]
        pub WriteStream {}
        #[async_trait::async_trait]
        impl WriteStream for WriteStream {
            async fn send(&mut self, request: WriteRequest) -> Result<()>;
            async fn recv(&mut self) -> Result<Option<WriteStatus>>;
            async fn close(&mut self) -> Result<()>;
        }
    }

    #[derive(Debug)]
    struct Empty;
    impl Storage for Empty {}

    #[tokio::test]
    #[should_panic]
    async fn default_start_panics() {
        let _ = Empty.start_resumable_write(StartResumableWriteRequest::new()).await;
    }

    #[tokio::test]
    async fn dynamic_forwards() -> anyhow::Result<()> {
        let mut mock = MockStorage::new();
        mock.expect_start_resumable_write()
            .times(1)
            .returning(|_| Ok("test-upload-id".to_string()));
        mock.expect_query_write_status()
            .withf(|id, params| id == "test-upload-id" && params.is_none())
            .times(1)
            .returning(|_, _| Ok(WriteStatus::Persisted(262144)));
        mock.expect_cancel_resumable_write()
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_open_write_stream()
            .times(1)
            .returning(|_| Ok(Box::new(MockWriteStream::new())));

        let stub: std::sync::Arc<dyn dynamic::Storage> = std::sync::Arc::new(mock);
        let id = stub
            .start_resumable_write(StartResumableWriteRequest::new())
            .await?;
        assert_eq!(id, "test-upload-id");
        let status = stub.query_write_status(id.clone(), None).await?;
        assert_eq!(status, WriteStatus::Persisted(262144));
        stub.cancel_resumable_write(id).await?;
        let _stream = stub.open_write_stream(WriteProtocol::Bidi).await?;
        Ok(())
    }
}
