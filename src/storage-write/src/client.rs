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

use crate::backoff_policy::BackoffPolicyArg;
use crate::bidi::BidiWriteStream;
use crate::model::{
    CommonObjectRequestParams, Object, ObjectChecksums, StartResumableWriteRequest,
    WriteObjectSpec, WriteStatus,
};
use crate::persisted_size::query;
use crate::request_options::{RequestOptions, WriteProtocol};
use crate::retry_loop::retry_loop;
use crate::retry_policy::RetryPolicyArg;
use crate::retry_throttler::RetryThrottlerArg;
use crate::session::{NewSession, UploadSession, WriteLocks};
use crate::stub::dynamic::Storage as StorageStub;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Implements a client for resumable writes in Cloud Storage.
///
/// # Example
/// ```
/// # use google_cloud_storage_write::client::Storage;
/// # async fn sample() -> anyhow::Result<()> {
/// let client = Storage::builder().build().await?;
/// let session = client
///     .start_upload("projects/_/buckets/my-bucket", "my-object")
///     .send()
///     .await?;
/// let object = session.write("hello world").await?;
/// println!("object={object:?}");
/// # Ok(()) }
/// ```
///
/// # Configuration
///
/// To configure `Storage` use the `with_*` methods in the type returned
/// by [builder()][Storage::builder]. The default configuration should
/// work for most applications. Common configuration changes include
///
/// * [with_endpoint()]: by default this client uses the global default
///   endpoint (`https://storage.googleapis.com`).
/// * [with_retry_policy()]: by default the client resumes uploads after
///   transient errors, for up to 10 attempts or 5 minutes.
/// * [with_chunk_size()] and [with_flush_interval()]: control the size of
///   each message, and how often the client waits for the service to persist
///   the data.
///
/// # Pooling and Cloning
///
/// `Storage` holds a connection pool internally, it is advised to
/// create one and then reuse it. You do not need to wrap `Storage` in
/// an [Rc](std::rc::Rc) or [Arc] to reuse it, because it already uses an `Arc`
/// internally.
///
/// [with_endpoint()]: ClientBuilder::with_endpoint
/// [with_retry_policy()]: ClientBuilder::with_retry_policy
/// [with_chunk_size()]: ClientBuilder::with_chunk_size
/// [with_flush_interval()]: ClientBuilder::with_flush_interval
#[derive(Clone, Debug)]
pub struct Storage {
    stub: Arc<dyn StorageStub>,
    options: RequestOptions,
    locks: Arc<WriteLocks>,
}

impl Storage {
    /// Returns a builder for [Storage].
    ///
    /// # Example
    /// ```
    /// # use google_cloud_storage_write::client::Storage;
    /// # async fn sample() -> anyhow::Result<()> {
    /// let client = Storage::builder().build().await?;
    /// # Ok(()) }
    /// ```
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Creates a new client from the provided stub.
    ///
    /// The most common case for calling this function is in tests mocking the
    /// client's behavior.
    pub fn from_stub<T>(stub: T) -> Self
    where
        T: crate::stub::Storage + 'static,
    {
        Self::new(Arc::new(stub), RequestOptions::new())
    }

    fn new(stub: Arc<dyn StorageStub>, options: RequestOptions) -> Self {
        Self {
            stub,
            options,
            locks: Arc::new(WriteLocks::default()),
        }
    }

    /// Starts a new resumable upload.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_storage_write::client::Storage;
    /// # async fn sample(client: &Storage) -> anyhow::Result<()> {
    /// let session = client
    ///     .start_upload("projects/_/buckets/my-bucket", "my-object")
    ///     .with_if_generation_match(0)
    ///     .with_content_type("text/plain")
    ///     .send()
    ///     .await?;
    /// println!("upload id={}", session.upload_id());
    /// # Ok(()) }
    /// ```
    ///
    /// # Parameters
    /// * `bucket` - the bucket name containing the object. In
    ///   `projects/_/buckets/{bucket_id}` format.
    /// * `object` - the object name.
    pub fn start_upload<B, O>(&self, bucket: B, object: O) -> StartUpload
    where
        B: Into<String>,
        O: Into<String>,
    {
        StartUpload::new(self, bucket.into(), object.into())
    }

    /// Attaches a session to an upload started elsewhere.
    ///
    /// The first write on the returned session queries the persisted size,
    /// and skips the data already persisted by the service.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_storage_write::client::Storage;
    /// # use google_cloud_storage_write::model::WriteObjectSpec;
    /// # async fn sample(client: &Storage, upload_id: String) -> anyhow::Result<()> {
    /// let session = client.resume_upload(upload_id, WriteObjectSpec::new());
    /// let file = tokio::fs::File::open("my-data.bin").await?;
    /// let object = session.write_seekable(file).await?;
    /// println!("object={object:?}");
    /// # Ok(()) }
    /// ```
    pub fn resume_upload<T: Into<String>>(&self, upload_id: T, spec: WriteObjectSpec) -> UploadSession {
        let upload_id = upload_id.into();
        tracing::info!(upload_id, "resuming upload");
        UploadSession::new(
            NewSession {
                stub: self.stub.clone(),
                upload_id,
                spec,
                params: None,
                known_checksums: None,
                options: self.options.clone(),
                resumed: true,
            },
            &self.locks,
        )
    }

    /// Queries the status of an upload.
    ///
    /// Returns the persisted size, or the object if the upload is finalized.
    pub async fn query_upload_status<T: Into<String>>(&self, upload_id: T) -> Result<WriteStatus> {
        let upload_id = upload_id.into();
        let stub = self.stub.as_ref();
        let id = upload_id.as_str();
        retry_loop(
            move |deadline| query(stub, id, None, deadline),
            &self.options,
        )
        .await
    }

    /// Cancels an upload.
    ///
    /// The service discards any data persisted for the upload. A write in
    /// progress may still finalize the object, cancelling does not wait for
    /// it.
    pub async fn cancel_upload<T: Into<String>>(&self, upload_id: T) -> Result<()> {
        let upload_id = upload_id.into();
        tracing::info!(upload_id, "cancelling upload");
        let stub = self.stub.as_ref();
        let id = upload_id.as_str();
        retry_loop(
            move |deadline| async move {
                tokio::time::timeout(deadline, stub.cancel_resumable_write(id.to_string()))
                    .await
                    .map_err(Error::timeout)?
            },
            &self.options,
        )
        .await
    }

    /// Opens a bidi write stream for an existing upload.
    ///
    /// The first message on the stream is sent at `offset`, which must not
    /// exceed the persisted size of the upload.
    pub async fn open_bidi_write<T: Into<String>>(
        &self,
        upload_id: T,
        offset: u64,
    ) -> Result<BidiWriteStream> {
        let upload_id = upload_id.into();
        tracing::debug!(upload_id, offset, "opening bidi write stream");
        let stream = self.stub.open_write_stream(WriteProtocol::Bidi).await?;
        Ok(BidiWriteStream::new(
            stream,
            upload_id,
            offset,
            self.options.crc32c_per_message,
        ))
    }
}

/// A request builder to start resumable uploads.
///
/// # Example
/// ```
/// # use google_cloud_storage_write::client::Storage;
/// # async fn sample(client: &Storage) -> anyhow::Result<()> {
/// let session = client
///     .start_upload("projects/_/buckets/my-bucket", "my-object")
///     .with_object_size(5_u64)
///     .with_known_crc32c(crc32c::crc32c(b"hello"))
///     .send()
///     .await?;
/// let object = session.write("hello").await?;
/// # Ok(()) }
/// ```
#[derive(Clone, Debug)]
pub struct StartUpload {
    stub: Arc<dyn StorageStub>,
    locks: Arc<WriteLocks>,
    spec: WriteObjectSpec,
    params: Option<CommonObjectRequestParams>,
    known_checksums: Option<ObjectChecksums>,
    options: RequestOptions,
}

impl StartUpload {
    fn new(client: &Storage, bucket: String, object: String) -> Self {
        let resource = Object::new().set_bucket(bucket).set_name(object);
        Self {
            stub: client.stub.clone(),
            locks: client.locks.clone(),
            spec: WriteObjectSpec::new().set_resource(resource),
            params: None,
            known_checksums: None,
            options: client.options.clone(),
        }
    }

    /// Only create the object if its generation matches `v`.
    ///
    /// Use `0` to create the object only if it does not exist.
    pub fn with_if_generation_match<V: Into<i64>>(mut self, v: V) -> Self {
        self.spec.if_generation_match = Some(v.into());
        self
    }

    pub fn with_if_generation_not_match<V: Into<i64>>(mut self, v: V) -> Self {
        self.spec.if_generation_not_match = Some(v.into());
        self
    }

    pub fn with_if_metageneration_match<V: Into<i64>>(mut self, v: V) -> Self {
        self.spec.if_metageneration_match = Some(v.into());
        self
    }

    pub fn with_if_metageneration_not_match<V: Into<i64>>(mut self, v: V) -> Self {
        self.spec.if_metageneration_not_match = Some(v.into());
        self
    }

    /// Applies a predefined set of access controls, such as `private`.
    pub fn with_predefined_acl<V: Into<String>>(mut self, v: V) -> Self {
        self.spec.predefined_acl = v.into();
        self
    }

    pub fn with_content_type<V: Into<String>>(mut self, v: V) -> Self {
        self.spec.resource = std::mem::take(&mut self.spec.resource).set_content_type(v);
        self
    }

    /// Sets the user-provided metadata for the object.
    pub fn with_metadata<I, K, V>(mut self, i: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.spec.resource = std::mem::take(&mut self.spec.resource).set_metadata(i);
        self
    }

    /// Declares the size of the object.
    ///
    /// The upload fails if the data source produces a different number of
    /// bytes.
    pub fn with_object_size<V: Into<u64>>(mut self, v: V) -> Self {
        self.spec.object_size = i64::try_from(v.into()).ok();
        self
    }

    /// Provides the CRC32C checksum of the complete object.
    ///
    /// The service rejects the upload if the data does not match.
    pub fn with_known_crc32c<V: Into<u32>>(mut self, v: V) -> Self {
        let known = self.known_checksums.take().unwrap_or_default();
        self.known_checksums = Some(known.set_crc32c(v));
        self
    }

    /// Provides the MD5 hash of the complete object.
    pub fn with_known_md5_hash<V: Into<bytes::Bytes>>(mut self, v: V) -> Self {
        let known = self.known_checksums.take().unwrap_or_default();
        self.known_checksums = Some(known.set_md5_hash(v));
        self
    }

    /// Sets the encryption parameters, such as customer-supplied keys.
    pub fn with_common_object_request_params<V: Into<CommonObjectRequestParams>>(
        mut self,
        v: V,
    ) -> Self {
        self.params = Some(v.into());
        self
    }

    /// The retry policy used to start the upload, and to resume it.
    pub fn with_retry_policy<V: Into<RetryPolicyArg>>(mut self, v: V) -> Self {
        self.options.retry_policy = v.into().0;
        self
    }

    pub fn with_backoff_policy<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.options.backoff_policy = v.into().0;
        self
    }

    pub fn with_throttled_backoff_policy<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.options.throttled_backoff_policy = v.into().0;
        self
    }

    pub fn with_retry_throttler<V: Into<RetryThrottlerArg>>(mut self, v: V) -> Self {
        self.options.retry_throttler = v.into().0;
        self
    }

    pub fn with_attempt_timeout(mut self, v: Duration) -> Self {
        self.options.attempt_timeout = v;
        self
    }

    pub fn with_chunk_size(mut self, v: usize) -> Self {
        self.options.set_chunk_size(v);
        self
    }

    pub fn with_flush_interval(mut self, v: usize) -> Self {
        self.options.set_flush_interval(v);
        self
    }

    pub fn with_protocol(mut self, v: WriteProtocol) -> Self {
        self.options.protocol = v;
        self
    }

    pub fn with_crc32c_per_message(mut self, v: bool) -> Self {
        self.options.crc32c_per_message = v;
        self
    }

    pub fn with_compute_md5(mut self, v: bool) -> Self {
        self.options.compute_md5 = v;
        self
    }

    /// Starts the upload, returns a session to write the data.
    pub async fn send(self) -> Result<UploadSession> {
        let request = StartResumableWriteRequest::new()
            .set_write_object_spec(self.spec.clone())
            .set_or_clear_common_object_request_params(self.params.clone())
            .set_or_clear_object_checksums(self.known_checksums.clone());
        let stub = self.stub.as_ref();
        let upload_id = retry_loop(
            move |deadline| {
                let request = request.clone();
                async move {
                    tokio::time::timeout(deadline, stub.start_resumable_write(request))
                        .await
                        .map_err(Error::timeout)?
                }
            },
            &self.options,
        )
        .await?;
        tracing::info!(
            bucket = %self.spec.resource.bucket,
            object = %self.spec.resource.name,
            upload_id,
            "upload started"
        );
        Ok(UploadSession::new(
            NewSession {
                stub: self.stub.clone(),
                upload_id,
                spec: self.spec,
                params: self.params,
                known_checksums: self.known_checksums,
                options: self.options,
                resumed: false,
            },
            &self.locks,
        ))
    }
}

/// A builder for [Storage].
///
/// ```
/// # use google_cloud_storage_write::client::Storage;
/// # async fn sample() -> anyhow::Result<()> {
/// let builder = Storage::builder();
/// let client = builder
///     .with_endpoint("https://storage.googleapis.com")
///     .build()
///     .await?;
/// # Ok(()) }
/// ```
#[derive(Clone, Debug)]
pub struct ClientBuilder {
    endpoint: Option<String>,
    credentials: Option<auth::credentials::Credentials>,
    options: RequestOptions,
}

impl ClientBuilder {
    pub(crate) fn new() -> Self {
        Self {
            endpoint: None,
            credentials: None,
            options: RequestOptions::new(),
        }
    }

    /// Creates a new client.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_storage_write::client::Storage;
    /// # async fn sample() -> anyhow::Result<()> {
    /// let client = Storage::builder().build().await?;
    /// # Ok(()) }
    /// ```
    pub async fn build(self) -> Result<Storage> {
        let credentials = match self.credentials {
            Some(c) => c,
            None => auth::credentials::Builder::default()
                .build()
                .map_err(Error::authentication)?,
        };
        let endpoint = self
            .endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let transport = crate::transport::Transport::new(&endpoint, credentials).await?;
        tracing::info!(endpoint, "storage write client connected");
        Ok(Storage::new(Arc::new(transport), self.options))
    }

    /// Sets the endpoint.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_storage_write::client::Storage;
    /// # async fn sample() -> anyhow::Result<()> {
    /// let client = Storage::builder()
    ///     .with_endpoint("https://private.googleapis.com")
    ///     .build()
    ///     .await?;
    /// # Ok(()) }
    /// ```
    pub fn with_endpoint<V: Into<String>>(mut self, v: V) -> Self {
        self.endpoint = Some(v.into());
        self
    }

    /// Configures the authentication credentials.
    ///
    /// By default the client uses [Application Default Credentials]. More
    /// information about the credential types can be found in the
    /// [google-cloud-auth] crate documentation.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_storage_write::client::Storage;
    /// # async fn sample() -> anyhow::Result<()> {
    /// use google_cloud_auth::credentials::anonymous;
    /// let client = Storage::builder()
    ///     .with_endpoint("http://localhost:9000")
    ///     .with_credentials(anonymous::Builder::new().build())
    ///     .build()
    ///     .await?;
    /// # Ok(()) }
    /// ```
    ///
    /// [Application Default Credentials]: https://cloud.google.com/docs/authentication#adc
    /// [google-cloud-auth]: https://docs.rs/google-cloud-auth
    pub fn with_credentials<V: Into<auth::credentials::Credentials>>(mut self, v: V) -> Self {
        self.credentials = Some(v.into());
        self
    }

    /// Configure the retry policy.
    ///
    /// The client resumes uploads after transient errors. The retry policy
    /// controls how many times, and for how long, the client keeps trying.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_storage_write::client::Storage;
    /// # async fn sample() -> anyhow::Result<()> {
    /// use google_cloud_storage_write::retry_policy::{RetryableErrors, RetryPolicyExt};
    /// let client = Storage::builder()
    ///     .with_retry_policy(RetryableErrors.with_attempt_limit(5))
    ///     .build()
    ///     .await?;
    /// # Ok(()) }
    /// ```
    pub fn with_retry_policy<V: Into<RetryPolicyArg>>(mut self, v: V) -> Self {
        self.options.retry_policy = v.into().0;
        self
    }

    /// Configure the backoff policy for transient errors.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_storage_write::client::Storage;
    /// # async fn sample() -> anyhow::Result<()> {
    /// use google_cloud_storage_write::backoff_policy::ExponentialBackoffBuilder;
    /// use std::time::Duration;
    /// let policy = ExponentialBackoffBuilder::new()
    ///     .with_initial_delay(Duration::from_millis(100))
    ///     .with_maximum_delay(Duration::from_secs(5))
    ///     .with_scaling(4.0)
    ///     .build()?;
    /// let client = Storage::builder()
    ///     .with_backoff_policy(policy)
    ///     .build()
    ///     .await?;
    /// # Ok(()) }
    /// ```
    pub fn with_backoff_policy<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.options.backoff_policy = v.into().0;
        self
    }

    /// Configure the backoff policy used when the service throttles uploads.
    pub fn with_throttled_backoff_policy<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.options.throttled_backoff_policy = v.into().0;
        self
    }

    /// Configure the retry throttler.
    ///
    /// Advanced applications may want to configure a retry throttler to
    /// [Address Cascading Failures] and when [Handling Overload] conditions.
    ///
    /// [Address Cascading Failures]: https://sre.google/sre-book/addressing-cascading-failures/
    /// [Handling Overload]: https://sre.google/sre-book/handling-overload/
    pub fn with_retry_throttler<V: Into<RetryThrottlerArg>>(mut self, v: V) -> Self {
        self.options.retry_throttler = v.into().0;
        self
    }

    /// The deadline for each write stream and each status query.
    pub fn with_attempt_timeout(mut self, v: Duration) -> Self {
        self.options.attempt_timeout = v;
        self
    }

    /// The payload size of each message.
    ///
    /// Rounded up to a multiple of [WRITE_ALIGNMENT][crate::WRITE_ALIGNMENT].
    pub fn with_chunk_size(mut self, v: usize) -> Self {
        self.options.set_chunk_size(v);
        self
    }

    /// The number of bytes sent before the client waits for the service to
    /// persist them.
    ///
    /// With [WriteProtocol::ClientStreaming] this is the data sent on each
    /// stream. With [WriteProtocol::Bidi] the client requests a flush after
    /// this many bytes. Larger values use more memory for sources that cannot
    /// seek.
    pub fn with_flush_interval(mut self, v: usize) -> Self {
        self.options.set_flush_interval(v);
        self
    }

    pub fn with_protocol(mut self, v: WriteProtocol) -> Self {
        self.options.protocol = v;
        self
    }

    /// Enables (or disables) the CRC32C checksum on each message.
    pub fn with_crc32c_per_message(mut self, v: bool) -> Self {
        self.options.crc32c_per_message = v;
        self
    }

    /// Enables (or disables) computing the MD5 hash of each object.
    pub fn with_compute_md5(mut self, v: bool) -> Self {
        self.options.compute_md5 = v;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::rpc::Code;
    use crate::model::SessionState;
    use crate::retry_policy::tests::grpc_error;
    use crate::retry_policy::{RetryPolicyExt, RetryableErrors};
    use crate::stub::tests::{MockStorage, MockWriteStream};
    use pretty_assertions::assert_eq;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Storage: Clone, Send, Sync, std::fmt::Debug);
    assert_impl_all!(StartUpload: Clone, Send, Sync);
    assert_impl_all!(ClientBuilder: Clone, Send, Sync);

    #[test]
    fn builder() {
        let builder = Storage::builder()
            .with_endpoint("http://localhost:8080")
            .with_retry_policy(RetryableErrors.with_attempt_limit(3))
            .with_attempt_timeout(Duration::from_secs(5))
            .with_chunk_size(100)
            .with_flush_interval(1000)
            .with_protocol(WriteProtocol::Bidi)
            .with_crc32c_per_message(false)
            .with_compute_md5(true);
        assert!(builder.credentials.is_none(), "{builder:?}");
        assert_eq!(builder.endpoint.as_deref(), Some("http://localhost:8080"));
        assert_eq!(builder.options.attempt_timeout, Duration::from_secs(5));
        assert_eq!(builder.options.chunk_size(), crate::WRITE_ALIGNMENT);
        assert_eq!(builder.options.flush_interval(), crate::WRITE_ALIGNMENT);
        assert_eq!(builder.options.protocol, WriteProtocol::Bidi);
        assert!(!builder.options.crc32c_per_message);
        assert!(builder.options.compute_md5);
    }

    #[test]
    fn builder_with_credentials() {
        let builder = Storage::builder()
            .with_credentials(auth::credentials::anonymous::Builder::new().build());
        assert!(builder.credentials.is_some(), "{builder:?}");
    }

    #[test]
    fn start_upload_builder() {
        let client = Storage::from_stub(MockStorage::new());
        let builder = client
            .start_upload("projects/_/buckets/test-bucket", "test-object")
            .with_if_generation_match(0)
            .with_if_generation_not_match(1)
            .with_if_metageneration_match(2)
            .with_if_metageneration_not_match(3)
            .with_predefined_acl("private")
            .with_content_type("text/plain")
            .with_metadata([("k", "v")])
            .with_object_size(5_u64)
            .with_known_crc32c(42_u32)
            .with_known_md5_hash(bytes::Bytes::from_static(b"md5"));
        let spec = &builder.spec;
        assert_eq!(spec.resource.bucket, "projects/_/buckets/test-bucket");
        assert_eq!(spec.resource.name, "test-object");
        assert_eq!(spec.resource.content_type, "text/plain");
        assert_eq!(spec.resource.metadata.get("k").map(String::as_str), Some("v"));
        assert_eq!(spec.if_generation_match, Some(0));
        assert_eq!(spec.if_generation_not_match, Some(1));
        assert_eq!(spec.if_metageneration_match, Some(2));
        assert_eq!(spec.if_metageneration_not_match, Some(3));
        assert_eq!(spec.predefined_acl, "private");
        assert_eq!(spec.object_size, Some(5));
        let known = builder.known_checksums.clone().unwrap_or_default();
        assert_eq!(known.crc32c, Some(42));
        assert_eq!(known.md5_hash, bytes::Bytes::from_static(b"md5"));
    }

    #[tokio::test]
    async fn start_upload() -> anyhow::Result<()> {
        let mut mock = MockStorage::new();
        mock.expect_start_resumable_write()
            .withf(|r| {
                r.write_object_spec.resource.name == "test-object"
                    && r.write_object_spec.if_generation_match == Some(0)
                    && r.object_checksums.as_ref().and_then(|c| c.crc32c) == Some(42)
            })
            .times(1)
            .returning(|_| Ok("test-upload-id".to_string()));
        let client = Storage::from_stub(mock);
        let session = client
            .start_upload("projects/_/buckets/test-bucket", "test-object")
            .with_if_generation_match(0)
            .with_known_crc32c(42_u32)
            .send()
            .await?;
        assert_eq!(session.upload_id(), "test-upload-id");
        assert_eq!(session.state(), SessionState::NotStarted);
        assert_eq!(session.persisted_size(), 0);
        assert_eq!(session.destination().resource.name, "test-object");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn start_upload_retries() -> anyhow::Result<()> {
        let mut mock = MockStorage::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_start_resumable_write()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(grpc_error(Code::Unavailable)));
        mock.expect_start_resumable_write()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("test-upload-id".to_string()));
        let client = Storage::from_stub(mock);
        let session = client
            .start_upload("projects/_/buckets/test-bucket", "test-object")
            .send()
            .await?;
        assert_eq!(session.upload_id(), "test-upload-id");
        Ok(())
    }

    #[tokio::test]
    async fn start_upload_permanent_error() {
        let mut mock = MockStorage::new();
        mock.expect_start_resumable_write()
            .times(1)
            .returning(|_| Err(grpc_error(Code::PermissionDenied)));
        let client = Storage::from_stub(mock);
        let err = client
            .start_upload("projects/_/buckets/test-bucket", "test-object")
            .send()
            .await
            .expect_err("PERMISSION_DENIED is not retried");
        assert_eq!(err.status().map(|s| s.code), Some(Code::PermissionDenied));
    }

    #[tokio::test]
    async fn query_upload_status() -> anyhow::Result<()> {
        let mut mock = MockStorage::new();
        mock.expect_query_write_status()
            .withf(|id, _| id == "test-upload-id")
            .times(1)
            .returning(|_, _| Ok(WriteStatus::Persisted(262144)));
        let client = Storage::from_stub(mock);
        let status = client.query_upload_status("test-upload-id").await?;
        assert_eq!(status, WriteStatus::Persisted(262144));
        Ok(())
    }

    #[tokio::test]
    async fn query_upload_status_not_found() {
        let mut mock = MockStorage::new();
        mock.expect_query_write_status()
            .times(1)
            .returning(|_, _| Err(grpc_error(Code::NotFound)));
        let client = Storage::from_stub(mock);
        let err = client
            .query_upload_status("test-upload-id")
            .await
            .expect_err("NOT_FOUND is fatal");
        assert_eq!(err.category(), crate::error::ErrorCategory::Fatal);
    }

    #[tokio::test]
    async fn cancel_upload() -> anyhow::Result<()> {
        let mut mock = MockStorage::new();
        mock.expect_cancel_resumable_write()
            .withf(|id| id == "test-upload-id")
            .times(1)
            .returning(|_| Ok(()));
        let client = Storage::from_stub(mock);
        client.cancel_upload("test-upload-id").await?;
        Ok(())
    }

    #[tokio::test]
    async fn resume_upload() -> anyhow::Result<()> {
        let mut mock = MockStorage::new();
        mock.expect_query_write_status()
            .times(1)
            .returning(|_, _| Ok(WriteStatus::Persisted(0)));
        mock.expect_open_write_stream().times(1).returning(|_| {
            let mut stream = MockWriteStream::new();
            stream.expect_send().returning(|_| Ok(()));
            stream.expect_close().returning(|| Ok(()));
            stream.expect_recv().return_once(|| {
                let object = Object::new()
                    .set_size(5)
                    .set_checksums(ObjectChecksums::new().set_crc32c(crc32c::crc32c(b"hello")));
                Ok(Some(WriteStatus::Finalized(Box::new(object))))
            });
            Ok(Box::new(stream))
        });
        let client = Storage::from_stub(mock);
        let session = client.resume_upload("test-upload-id", WriteObjectSpec::new());
        let object = session.write("hello").await?;
        assert_eq!(object.size, 5);
        assert_eq!(session.state(), SessionState::Finalized);
        Ok(())
    }

    #[tokio::test]
    async fn open_bidi_write() -> anyhow::Result<()> {
        let mut mock = MockStorage::new();
        mock.expect_open_write_stream()
            .withf(|p| *p == WriteProtocol::Bidi)
            .times(1)
            .returning(|_| Ok(Box::new(MockWriteStream::new())));
        let client = Storage::from_stub(mock);
        let stream = client.open_bidi_write("test-upload-id", 262144).await?;
        assert_eq!(stream.upload_id(), "test-upload-id");
        assert_eq!(stream.offset(), 262144);
        Ok(())
    }
}
