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

//! The gRPC implementation of the [stub][crate::stub] traits.

mod convert;

use crate::google::storage::v2 as proto;
use crate::model::{CommonObjectRequestParams, StartResumableWriteRequest, WriteRequest, WriteStatus};
use crate::request_options::WriteProtocol;
use crate::stub::WriteStream;
use crate::{Error, Result};
use auth::credentials::{CacheableResource, Credentials};
use convert::{FromProto, ToProto};
use http::HeaderMap;
use http::uri::PathAndQuery;
use tonic::metadata::MetadataMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

type InnerClient = tonic::client::Grpc<tonic::transport::Channel>;

const SERVICE: &str = "google.storage.v2.Storage";
const REQUEST_PARAMS: &str = "x-goog-request-params";
const IDEMPOTENCY_TOKEN: &str = "x-goog-gcs-idempotency-token";

// The requests are small, they only wrap one chunk. A short queue keeps the
// memory used by each stream bounded.
const STREAM_QUEUE: usize = 2;

#[derive(Clone, Debug)]
pub(crate) struct Transport {
    inner: InnerClient,
    credentials: Credentials,
}

impl Transport {
    pub(crate) async fn new(endpoint: &str, credentials: Credentials) -> Result<Self> {
        use tonic::transport::{ClientTlsConfig, Endpoint};
        let mut builder = Endpoint::from_shared(endpoint.to_string()).map_err(Error::other)?;
        if endpoint.starts_with("https://") {
            builder = builder
                .tls_config(ClientTlsConfig::new().with_enabled_roots())
                .map_err(Error::other)?;
        }
        let channel = builder.connect().await.map_err(Error::io)?;
        Ok(Self {
            inner: tonic::client::Grpc::new(channel),
            credentials,
        })
    }

    async fn unary<Request, Response>(
        &self,
        method: &'static str,
        path: &'static str,
        request: tonic::Request<Request>,
    ) -> Result<Response>
    where
        Request: prost::Message + 'static,
        Response: prost::Message + Default + 'static,
    {
        let mut inner = self.inner.clone();
        let mut request = request;
        request
            .extensions_mut()
            .insert(tonic::GrpcMethod::new(SERVICE, method));
        with_auth(&mut request, auth_headers(&self.credentials).await?);
        inner.ready().await.map_err(Error::io)?;
        let codec = tonic_prost::ProstCodec::default();
        let response = inner
            .unary(request, PathAndQuery::from_static(path), codec)
            .await?;
        Ok(response.into_inner())
    }
}

impl crate::stub::Storage for Transport {
    async fn start_resumable_write(&self, request: StartResumableWriteRequest) -> Result<String> {
        let params = format!("bucket={}", request.write_object_spec.resource.bucket);
        let proto: proto::StartResumableWriteRequest = request.to_proto().map_err(Error::ser)?;
        let mut request = tonic::Request::new(proto);
        insert_header(&mut request, REQUEST_PARAMS, &params)?;
        // One token per attempt.
        insert_header(&mut request, IDEMPOTENCY_TOKEN, &uuid::Uuid::new_v4().to_string())?;
        let response: proto::StartResumableWriteResponse = self
            .unary(
                "StartResumableWrite",
                "/google.storage.v2.Storage/StartResumableWrite",
                request,
            )
            .await?;
        Ok(response.upload_id)
    }

    async fn query_write_status(
        &self,
        upload_id: String,
        params: Option<CommonObjectRequestParams>,
    ) -> Result<WriteStatus> {
        let proto = proto::QueryWriteStatusRequest {
            upload_id,
            common_object_request_params: params
                .map(|p| p.to_proto())
                .transpose()
                .map_err(Error::ser)?,
        };
        let response: proto::QueryWriteStatusResponse = self
            .unary(
                "QueryWriteStatus",
                "/google.storage.v2.Storage/QueryWriteStatus",
                tonic::Request::new(proto),
            )
            .await?;
        response.cnv().map_err(Error::deser)
    }

    async fn cancel_resumable_write(&self, upload_id: String) -> Result<()> {
        let proto = proto::CancelResumableWriteRequest { upload_id };
        let _: proto::CancelResumableWriteResponse = self
            .unary(
                "CancelResumableWrite",
                "/google.storage.v2.Storage/CancelResumableWrite",
                tonic::Request::new(proto),
            )
            .await?;
        Ok(())
    }

    async fn open_write_stream(&self, protocol: WriteProtocol) -> Result<Box<dyn WriteStream>> {
        let headers = auth_headers(&self.credentials).await?;
        let mut inner = self.inner.clone();
        inner.ready().await.map_err(Error::io)?;
        let stream: Box<dyn WriteStream> = match protocol {
            WriteProtocol::Bidi => Box::new(BidiWrite::open(inner, headers)),
            WriteProtocol::ClientStreaming => {
                Box::new(ClientStreamingWrite::open(inner, headers))
            }
        };
        Ok(stream)
    }
}

/// Fetches the authentication headers, refreshing the token if needed.
async fn auth_headers(credentials: &Credentials) -> Result<HeaderMap> {
    let headers = credentials
        .headers(http::Extensions::new())
        .await
        .map_err(Error::authentication)?;
    match headers {
        CacheableResource::New { data, .. } => Ok(data),
        CacheableResource::NotModified => {
            Err(Error::authentication("the credentials returned cached headers"))
        }
    }
}

/// Adds the authentication headers to the request metadata.
fn with_auth<T>(request: &mut tonic::Request<T>, auth: HeaderMap) {
    let mut headers = std::mem::take(request.metadata_mut()).into_headers();
    headers.extend(auth);
    *request.metadata_mut() = MetadataMap::from_headers(headers);
}

fn insert_header<T>(request: &mut tonic::Request<T>, name: &'static str, value: &str) -> Result<()> {
    let value: tonic::metadata::MetadataValue<tonic::metadata::Ascii> =
        value.parse().map_err(Error::ser)?;
    request.metadata_mut().insert(name, value);
    Ok(())
}

/// A `WriteObject` stream.
///
/// The RPC runs in a background task, so the messages can be sent before
/// the service returns any headers.
#[derive(Debug)]
struct ClientStreamingWrite {
    tx: Option<mpsc::Sender<proto::WriteObjectRequest>>,
    response: Option<JoinHandle<std::result::Result<proto::WriteObjectResponse, tonic::Status>>>,
}

impl ClientStreamingWrite {
    fn open(mut inner: InnerClient, auth: HeaderMap) -> Self {
        let (tx, rx) = mpsc::channel(STREAM_QUEUE);
        let response = tokio::spawn(async move {
            let mut request = tonic::Request::new(ReceiverStream::new(rx));
            with_auth(&mut request, auth);
            request
                .extensions_mut()
                .insert(tonic::GrpcMethod::new(SERVICE, "WriteObject"));
            let codec = tonic_prost::ProstCodec::default();
            inner
                .client_streaming(
                    request,
                    PathAndQuery::from_static("/google.storage.v2.Storage/WriteObject"),
                    codec,
                )
                .await
                .map(tonic::Response::into_inner)
        });
        Self {
            tx: Some(tx),
            response: Some(response),
        }
    }
}

#[async_trait::async_trait]
impl WriteStream for ClientStreamingWrite {
    async fn send(&mut self, request: WriteRequest) -> Result<()> {
        let proto: proto::WriteObjectRequest = request.to_proto().map_err(Error::ser)?;
        let Some(tx) = self.tx.as_ref() else {
            return Err(Error::other("the write stream is closed"));
        };
        tx.send(proto)
            .await
            .map_err(|_| Error::io("the write stream terminated unexpectedly"))
    }

    async fn recv(&mut self) -> Result<Option<WriteStatus>> {
        // The service only responds after the client closes the stream.
        self.tx = None;
        let Some(handle) = self.response.take() else {
            return Ok(None);
        };
        let response = handle.await.map_err(Error::io)??;
        response.cnv().map(Some).map_err(Error::deser)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

impl Drop for ClientStreamingWrite {
    fn drop(&mut self) {
        if let Some(handle) = self.response.take() {
            handle.abort();
        }
    }
}

type BidiStreaming = tonic::Streaming<proto::BidiWriteObjectResponse>;

#[derive(Debug)]
enum BidiResponses {
    Pending(JoinHandle<std::result::Result<BidiStreaming, tonic::Status>>),
    Open(BidiStreaming),
    Done,
}

/// A `BidiWriteObject` stream.
#[derive(Debug)]
struct BidiWrite {
    tx: Option<mpsc::Sender<proto::BidiWriteObjectRequest>>,
    responses: BidiResponses,
}

impl BidiWrite {
    fn open(mut inner: InnerClient, auth: HeaderMap) -> Self {
        let (tx, rx) = mpsc::channel(STREAM_QUEUE);
        let pending = tokio::spawn(async move {
            let mut request = tonic::Request::new(ReceiverStream::new(rx));
            with_auth(&mut request, auth);
            request
                .extensions_mut()
                .insert(tonic::GrpcMethod::new(SERVICE, "BidiWriteObject"));
            let codec = tonic_prost::ProstCodec::default();
            inner
                .streaming(
                    request,
                    PathAndQuery::from_static("/google.storage.v2.Storage/BidiWriteObject"),
                    codec,
                )
                .await
                .map(tonic::Response::into_inner)
        });
        Self {
            tx: Some(tx),
            responses: BidiResponses::Pending(pending),
        }
    }
}

#[async_trait::async_trait]
impl WriteStream for BidiWrite {
    async fn send(&mut self, request: WriteRequest) -> Result<()> {
        let proto: proto::BidiWriteObjectRequest = request.to_proto().map_err(Error::ser)?;
        let Some(tx) = self.tx.as_ref() else {
            return Err(Error::other("the write stream is closed"));
        };
        tx.send(proto)
            .await
            .map_err(|_| Error::io("the write stream terminated unexpectedly"))
    }

    async fn recv(&mut self) -> Result<Option<WriteStatus>> {
        loop {
            match std::mem::replace(&mut self.responses, BidiResponses::Done) {
                BidiResponses::Done => return Ok(None),
                BidiResponses::Pending(handle) => {
                    let stream = handle.await.map_err(Error::io)??;
                    self.responses = BidiResponses::Open(stream);
                }
                BidiResponses::Open(mut stream) => {
                    let Some(response) = stream.message().await? else {
                        return Ok(None);
                    };
                    self.responses = BidiResponses::Open(stream);
                    return response.cnv().map(Some).map_err(Error::deser);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

impl Drop for BidiWrite {
    fn drop(&mut self) {
        if let BidiResponses::Pending(handle) = &self.responses {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[tokio::test]
    async fn anonymous_credentials() -> anyhow::Result<()> {
        let credentials = auth::credentials::anonymous::Builder::new().build();
        let headers = auth_headers(&credentials).await?;
        assert!(headers.is_empty(), "{headers:?}");
        Ok(())
    }

    #[test]
    fn auth_headers_are_merged() -> anyhow::Result<()> {
        let mut request = tonic::Request::new(());
        insert_header(&mut request, REQUEST_PARAMS, "bucket=projects/_/buckets/b")?;
        let mut auth = HeaderMap::new();
        auth.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer test-token"),
        );
        auth.insert("x-goog-user-project", HeaderValue::from_static("test-project"));
        with_auth(&mut request, auth);

        let metadata = request.metadata();
        assert_eq!(
            metadata.get("authorization").map(|v| v.to_str()).transpose()?,
            Some("Bearer test-token")
        );
        assert_eq!(
            metadata.get("x-goog-user-project").map(|v| v.to_str()).transpose()?,
            Some("test-project")
        );
        assert_eq!(
            metadata.get(REQUEST_PARAMS).map(|v| v.to_str()).transpose()?,
            Some("bucket=projects/_/buckets/b")
        );
        Ok(())
    }
}
