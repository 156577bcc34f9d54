//! # Generic gRPC Transport
//!
//! Wraps `tonic::client::Grpc` so the client dispatcher can drive any of the four call shapes
//! with dynamic messages. It knows nothing about contracts: it gets a path, a request and a
//! [`MarshallerCodec`] and hands back the raw `tonic` response.
//!
//! * **Dynamic Pathing**: the HTTP/2 path (e.g. `/demo.Calculator/Sum`) is parsed at runtime.
//! * **Metadata Handling**: custom ASCII metadata given as string pairs is validated and copied
//!   into the request.
use super::codec::MarshallerCodec;
use crate::{BoxError, config::TransportSettings};
use futures_util::Stream;
use http_body::Body as HttpBody;
use serde_json::Value;
use std::str::FromStr;
use tonic::{
    Response, Status, Streaming,
    client::GrpcService,
    metadata::{
        MetadataKey, MetadataValue,
        errors::{InvalidMetadataKey, InvalidMetadataValue},
    },
};

#[derive(thiserror::Error, Debug)]
pub enum GrpcRequestError {
    #[error("Internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),
    #[error("Invalid metadata (header) key '{key}': '{source}'")]
    InvalidMetadataKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("Invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidMetadataValue {
        key: String,
        source: InvalidMetadataValue,
    },
    #[error("Invalid gRPC path '{0}'")]
    InvalidPath(String),
}

/// Result of a call that reached the transport: the inner `Err` is the status the server
/// (or `tonic` itself) answered with.
pub type TransportResult<T> = Result<Result<Response<T>, Status>, GrpcRequestError>;

#[derive(Debug, Clone)]
pub struct GrpcTransport<S> {
    client: tonic::client::Grpc<S>,
}

impl<S> GrpcTransport<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S, settings: &TransportSettings) -> Self {
        let client = tonic::client::Grpc::new(service)
            .max_decoding_message_size(settings.max_decoding_message_size)
            .max_encoding_message_size(settings.max_encoding_message_size);
        Self { client }
    }

    async fn ready(&mut self) -> Result<(), GrpcRequestError> {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))
    }

    /// Single request message, single response message.
    pub async fn unary(
        &mut self,
        path: &str,
        request: tonic::Request<Value>,
        codec: MarshallerCodec,
    ) -> TransportResult<Value> {
        let path = http_path(path)?;
        self.ready().await?;
        Ok(self.client.unary(request, path, codec).await)
    }

    /// Single request message, stream of response messages.
    pub async fn server_streaming(
        &mut self,
        path: &str,
        request: tonic::Request<Value>,
        codec: MarshallerCodec,
    ) -> TransportResult<Streaming<Value>> {
        let path = http_path(path)?;
        self.ready().await?;
        Ok(self.client.server_streaming(request, path, codec).await)
    }

    /// Stream of request messages, single response message.
    pub async fn client_streaming(
        &mut self,
        path: &str,
        request: tonic::Request<impl Stream<Item = Value> + Send + 'static>,
        codec: MarshallerCodec,
    ) -> TransportResult<Value> {
        let path = http_path(path)?;
        self.ready().await?;
        Ok(self.client.client_streaming(request, path, codec).await)
    }

    /// Streams in both directions.
    pub async fn streaming(
        &mut self,
        path: &str,
        request: tonic::Request<impl Stream<Item = Value> + Send + 'static>,
        codec: MarshallerCodec,
    ) -> TransportResult<Streaming<Value>> {
        let path = http_path(path)?;
        self.ready().await?;
        Ok(self.client.streaming(request, path, codec).await)
    }
}

pub(crate) fn http_path(path: &str) -> Result<http::uri::PathAndQuery, GrpcRequestError> {
    http::uri::PathAndQuery::from_str(path)
        .map_err(|_| GrpcRequestError::InvalidPath(path.to_string()))
}

/// Wraps `payload` into a request carrying the given custom ASCII metadata.
pub(crate) fn build_request<T>(
    payload: T,
    headers: &[(String, String)],
) -> Result<tonic::Request<T>, GrpcRequestError> {
    let mut request = tonic::Request::new(payload);
    for (k, v) in headers {
        let key =
            MetadataKey::from_str(k).map_err(|source| GrpcRequestError::InvalidMetadataKey {
                key: k.clone(),
                source,
            })?;
        let val = MetadataValue::from_str(v).map_err(|source| {
            GrpcRequestError::InvalidMetadataValue {
                key: k.clone(),
                source,
            }
        })?;
        request.metadata_mut().insert(key, val);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_validates_metadata() {
        let ok = build_request((), &[("x-tenant".to_string(), "blue".to_string())]).unwrap();
        assert_eq!(ok.metadata().get("x-tenant").unwrap().to_str().unwrap(), "blue");

        let bad_key = build_request((), &[("bad key".to_string(), "v".to_string())]);
        assert!(matches!(bad_key, Err(GrpcRequestError::InvalidMetadataKey { .. })));

        let bad_value = build_request((), &[("x-tenant".to_string(), "a\nb".to_string())]);
        assert!(matches!(bad_value, Err(GrpcRequestError::InvalidMetadataValue { .. })));
    }

    #[test]
    fn test_http_path() {
        assert_eq!(http_path("/demo.Calculator/Sum").unwrap().as_str(), "/demo.Calculator/Sum");
        assert!(matches!(http_path("not a path"), Err(GrpcRequestError::InvalidPath(_))));
    }
}
