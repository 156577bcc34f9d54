//! Server side of a bound operation: request decoding, the filter pipeline, the handler and
//! the mapping of results and errors back onto the wire.
use super::call::{Reply, ServerCall, ServerCallContext};
use crate::{
    BoxError,
    call::{CallError, CallSide, ItemStream},
    config::TransportSettings,
    fault::{FaultTypeResolver, ServerErrorHandlers, fault_to_status, unhandled_error_status},
    filter::{FilterContext, FilterPipeline, RequestContext, Terminal},
    grpc::metadata::{self, REQUEST_HEADERS_KEY, RESPONSE_HEADERS_KEY},
    marshaller::OperationMarshallers,
    message::Headers,
    reflection::{MethodType, OperationDescriptor},
};
use async_trait::async_trait;
use futures_util::{StreamExt, future::BoxFuture, stream::BoxStream};
use http_body::Body as HttpBody;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::{
    Request, Response, Status, Streaming,
    metadata::MetadataMap,
    server::{ClientStreamingService, Grpc, ServerStreamingService, StreamingService, UnaryService},
};

pub(crate) type Handler =
    Arc<dyn Fn(ServerCall) -> BoxFuture<'static, Result<Reply, BoxError>> + Send + Sync>;

type ResponseStream = BoxStream<'static, Result<Value, Status>>;

/// Everything bound for one operation on the server.
pub(crate) struct ServerOperation {
    pub descriptor: Arc<OperationDescriptor>,
    pub marshallers: OperationMarshallers,
    pub pipeline: FilterPipeline,
    pub error_handlers: ServerErrorHandlers,
    pub resolver: Arc<dyn FaultTypeResolver>,
    pub handler: Handler,
    pub settings: TransportSettings,
}

impl fmt::Debug for ServerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOperation")
            .field("path", &self.descriptor.path())
            .field("marshaller", &self.marshallers.factory.name())
            .field("pipeline", &self.pipeline)
            .field("error_handlers", &self.error_handlers)
            .finish_non_exhaustive()
    }
}

impl ServerOperation {
    /// Answers one HTTP request with the call shape of this operation.
    pub async fn serve<B>(self: Arc<Self>, request: http::Request<B>) -> http::Response<tonic::body::Body>
    where
        B: HttpBody + Send + 'static,
        B::Error: Into<BoxError> + Send + 'static,
    {
        let mut grpc = Grpc::new(self.marshallers.server_codec()).apply_max_message_size_config(
            Some(self.settings.max_decoding_message_size),
            Some(self.settings.max_encoding_message_size),
        );

        let call = OperationCall(self.clone());
        match self.descriptor.method_type() {
            MethodType::Unary => grpc.unary(call, request).await,
            MethodType::ClientStreaming => grpc.client_streaming(call, request).await,
            MethodType::ServerStreaming => grpc.server_streaming(call, request).await,
            MethodType::DuplexStreaming => grpc.streaming(call, request).await,
        }
    }

    /// Request headers carried by the request message.
    fn headers_from_message(&self, value: Value) -> Result<Headers, Status> {
        Headers::from_message(
            self.descriptor.request_accessor().as_ref(),
            self.descriptor.request_names(),
            value,
        )
        .map_err(|e| Status::invalid_argument(e.to_string()))
    }

    /// Request headers of streaming requests, carried in metadata. Absent headers leave every
    /// value at its default.
    fn headers_from_metadata(&self, metadata: &MetadataMap) -> Result<Headers, Status> {
        let value = match metadata::get_binary(metadata, REQUEST_HEADERS_KEY) {
            None => Value::Null,
            Some(Ok(bytes)) => self
                .marshallers
                .request
                .deserialize(&bytes)
                .map_err(|e| Status::invalid_argument(e.to_string()))?,
            Some(Err(e)) => {
                return Err(Status::invalid_argument(format!(
                    "Malformed request headers: {e}"
                )));
            }
        };
        self.headers_from_message(value)
    }

    fn request_stream(&self, items: Streaming<Value>) -> ItemStream {
        let items = items.map(|item| item.map_err(CallError::from)).boxed();
        match self.descriptor.request_stream() {
            Some(accessor) => accessor.normalize_items(items),
            None => items,
        }
    }

    /// Runs the filter pipeline around the handler.
    async fn run(
        &self,
        metadata: MetadataMap,
        request: RequestContext,
        token: CancellationToken,
    ) -> Result<FilterContext, Status> {
        let mut context = FilterContext::new(
            self.descriptor.clone(),
            CallSide::Server,
            token,
            metadata,
            request,
        );

        tracing::debug!(path = %self.descriptor.path(), "Call received");

        match self.pipeline.run(&mut context, self).await {
            Ok(()) => Ok(context),
            Err(error) => {
                tracing::debug!(path = %self.descriptor.path(), error = %error, "Call failed");
                Err(self.error_status(error))
            }
        }
    }

    /// Maps a failed call onto the status sent to the client.
    fn error_status(&self, error: CallError) -> Status {
        match error {
            CallError::Application(error) => self.fault_status(error),
            other => other.into_status(),
        }
    }

    /// Offers an application error to the error handlers; the first fault wins.
    fn fault_status(&self, error: BoxError) -> Status {
        if let Some(fault) = self
            .error_handlers
            .provide_fault(&self.descriptor, error.as_ref())
        {
            if let Some(status) = fault_to_status(
                &fault,
                error.as_ref(),
                self.marshallers.factory.as_ref(),
                self.resolver.as_ref(),
            ) {
                return status;
            }
        }

        unhandled_error_status(error, self.settings.include_error_details)
    }

    fn unary_response(&self, context: FilterContext) -> Result<Response<Value>, Status> {
        let message = context
            .response
            .headers
            .to_message(self.descriptor.response_accessor().as_ref())
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(message))
    }

    /// Streams the response items; response headers go out as initial metadata. Dropping the
    /// stream cancels the call.
    fn stream_response(
        self: &Arc<Self>,
        mut context: FilterContext,
        guard: DropGuard,
    ) -> Result<Response<ResponseStream>, Status> {
        let mut items = context.response.stream.take().ok_or_else(|| {
            Status::internal(format!(
                "Operation '{}' produced no response stream",
                self.descriptor.operation_name()
            ))
        })?;

        let mut metadata = MetadataMap::new();
        if !self.descriptor.response().is_empty() {
            let bytes = context
                .response
                .headers
                .to_message(self.descriptor.response_accessor().as_ref())
                .map_err(CallError::from)
                .and_then(|message| Ok(self.marshallers.response.serialize(&message)?))
                .map_err(|e| Status::internal(e.to_string()))?;
            metadata::insert_binary(&mut metadata, RESPONSE_HEADERS_KEY, &bytes);
        }

        let operation = self.clone();
        let token = context.cancellation().clone();
        let stream = async_stream::stream! {
            let _guard = guard;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    item = items.next() => item,
                };

                match next {
                    Some(Ok(value)) => yield Ok(value),
                    Some(Err(error)) => {
                        yield Err(operation.error_status(error));
                        break;
                    }
                    None => break,
                }
            }
        };

        let mut response = Response::new(stream.boxed());
        *response.metadata_mut() = metadata;
        Ok(response)
    }

    async fn unary_call(&self, request: Request<Value>) -> Result<Response<Value>, Status> {
        let (metadata, _, message) = request.into_parts();
        let headers = self.headers_from_message(message)?;

        let token = CancellationToken::new();
        let _guard = token.clone().drop_guard();

        let context = self
            .run(metadata, RequestContext { headers, stream: None }, token)
            .await?;
        self.unary_response(context)
    }

    async fn client_streaming_call(
        &self,
        request: Request<Streaming<Value>>,
    ) -> Result<Response<Value>, Status> {
        let (metadata, _, items) = request.into_parts();
        let headers = self.headers_from_metadata(&metadata)?;
        let stream = Some(self.request_stream(items));

        let token = CancellationToken::new();
        let _guard = token.clone().drop_guard();

        let context = self
            .run(metadata, RequestContext { headers, stream }, token)
            .await?;
        self.unary_response(context)
    }

    async fn server_streaming_call(
        self: Arc<Self>,
        request: Request<Value>,
    ) -> Result<Response<ResponseStream>, Status> {
        let (metadata, _, message) = request.into_parts();
        let headers = self.headers_from_message(message)?;

        let token = CancellationToken::new();
        let guard = token.clone().drop_guard();

        let context = self
            .run(metadata, RequestContext { headers, stream: None }, token)
            .await?;
        self.stream_response(context, guard)
    }

    async fn streaming_call(
        self: Arc<Self>,
        request: Request<Streaming<Value>>,
    ) -> Result<Response<ResponseStream>, Status> {
        let (metadata, _, items) = request.into_parts();
        let headers = self.headers_from_metadata(&metadata)?;
        let stream = Some(self.request_stream(items));

        let token = CancellationToken::new();
        let guard = token.clone().drop_guard();

        let context = self
            .run(metadata, RequestContext { headers, stream }, token)
            .await?;
        self.stream_response(context, guard)
    }
}

#[async_trait]
impl Terminal for ServerOperation {
    async fn call(&self, context: &mut FilterContext) -> Result<(), CallError> {
        let call = ServerCall::new(
            self.descriptor.clone(),
            context.request.headers.clone(),
            context.request.stream.take(),
            ServerCallContext::new(context.metadata.clone(), context.cancellation().clone()),
        );

        let (values, stream) = (self.handler)(call)
            .await
            .map_err(CallError::Application)?
            .into_parts();

        // A reply that does not fit the response shape is a server bug, not a bad request.
        context.response.headers = Headers::from_values(
            self.descriptor.response_accessor().as_ref(),
            self.descriptor.response_names(),
            values,
        )
        .map_err(|e| CallError::Status(Status::internal(e.to_string())))?;

        context.response.stream = match self.descriptor.response_stream() {
            Some(accessor) => stream.map(|items| accessor.normalize_items(items)),
            None => None,
        };

        Ok(())
    }
}

/// Adapts a bound operation to the `tonic` service trait of its call shape.
struct OperationCall(Arc<ServerOperation>);

impl UnaryService<Value> for OperationCall {
    type Response = Value;
    type Future = BoxFuture<'static, Result<Response<Value>, Status>>;

    fn call(&mut self, request: Request<Value>) -> Self::Future {
        let operation = self.0.clone();
        Box::pin(async move { operation.unary_call(request).await })
    }
}

impl ClientStreamingService<Value> for OperationCall {
    type Response = Value;
    type Future = BoxFuture<'static, Result<Response<Value>, Status>>;

    fn call(&mut self, request: Request<Streaming<Value>>) -> Self::Future {
        let operation = self.0.clone();
        Box::pin(async move { operation.client_streaming_call(request).await })
    }
}

impl ServerStreamingService<Value> for OperationCall {
    type Response = Value;
    type ResponseStream = ResponseStream;
    type Future = BoxFuture<'static, Result<Response<ResponseStream>, Status>>;

    fn call(&mut self, request: Request<Value>) -> Self::Future {
        Box::pin(self.0.clone().server_streaming_call(request))
    }
}

impl StreamingService<Value> for OperationCall {
    type Response = Value;
    type ResponseStream = ResponseStream;
    type Future = BoxFuture<'static, Result<Response<ResponseStream>, Status>>;

    fn call(&mut self, request: Request<Streaming<Value>>) -> Self::Future {
        Box::pin(self.0.clone().streaming_call(request))
    }
}
