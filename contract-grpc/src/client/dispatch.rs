//! The terminal step of the client pipeline: performs the transport call for each call shape.
use crate::{
    BoxError,
    call::{CallError, ItemStream},
    fault::{ClientErrorHandlers, ClientFaultDetail, FaultTypeResolver, fault_from_status},
    filter::{FilterContext, FilterPipeline, Terminal},
    grpc::{
        client::{GrpcRequestError, GrpcTransport},
        metadata::{self, REQUEST_HEADERS_KEY, RESPONSE_HEADERS_KEY},
    },
    marshaller::OperationMarshallers,
    message::Headers,
    reflection::{MethodType, OperationDescriptor},
};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use http_body::Body as HttpBody;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::{Response, Status, metadata::MetadataMap};

/// Everything bound for one operation on the client.
#[derive(Debug)]
pub(crate) struct ClientOperation {
    pub descriptor: Arc<OperationDescriptor>,
    pub marshallers: OperationMarshallers,
    pub pipeline: FilterPipeline,
    pub error_handlers: ClientErrorHandlers,
    pub resolver: Arc<dyn FaultTypeResolver>,
}

impl ClientOperation {
    /// Maps a failed status to the error the caller sees, running the client error handlers
    /// on typed faults.
    pub fn translate(&self, status: Status) -> CallError {
        if status.code() == tonic::Code::Cancelled {
            return CallError::Cancelled;
        }

        let Some(detail) =
            fault_from_status(&status, self.marshallers.factory.as_ref(), self.resolver.as_ref())
        else {
            return CallError::Status(status);
        };

        let fault = ClientFaultDetail {
            detail,
            original_error: status,
        };

        match self.error_handlers.throw_on_fault(&self.descriptor, &fault) {
            Err(error) => CallError::Application(error),
            Ok(()) => CallError::Status(fault.original_error),
        }
    }
}

/// The error that aborted the outbound write loop, if any.
type FailureSlot = Arc<Mutex<Option<CallError>>>;

fn recorded_failure(slot: &FailureSlot) -> Option<CallError> {
    slot.lock().take()
}

/// The recorded failure, or plain cancellation when the caller cancelled.
fn take_failure(slot: &FailureSlot) -> CallError {
    recorded_failure(slot).unwrap_or(CallError::Cancelled)
}

pub(crate) struct ClientTerminal<S> {
    pub transport: GrpcTransport<S>,
    pub operation: Arc<ClientOperation>,
    pub timeout: Option<Duration>,
}

#[async_trait]
impl<S> Terminal for ClientTerminal<S>
where
    S: tonic::client::GrpcService<tonic::body::Body> + Clone + Send + Sync + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    async fn call(&self, context: &mut FilterContext) -> Result<(), CallError> {
        let operation = self.operation.clone();
        let descriptor = operation.descriptor.clone();
        let marshallers = &operation.marshallers;

        let header_message = context
            .request
            .headers
            .to_message(descriptor.request_accessor().as_ref())?;

        let mut metadata = context.metadata.clone();
        let token = context.cancellation().clone();
        let failure: FailureSlot = Arc::new(Mutex::new(None));
        let call = PendingCall {
            operation: operation.clone(),
            token: token.clone(),
            failure: failure.clone(),
            timeout: self.timeout,
            deadline: self.timeout.map(|timeout| Instant::now() + timeout),
        };

        let mut transport = self.transport.clone();
        let codec = marshallers.client_codec();
        let path = descriptor.path().to_string();

        // Request headers of streaming requests travel in metadata.
        if descriptor.method_type().has_request_stream() && !descriptor.request().is_empty() {
            let bytes = marshallers.request.serialize(&header_message)?;
            metadata::insert_binary(&mut metadata, REQUEST_HEADERS_KEY, &bytes);
        }

        match descriptor.method_type() {
            MethodType::Unary => {
                let request = call.request(metadata, header_message);
                let response = call.wait(transport.unary(&path, request, codec)).await?;
                context.response.headers = response_message(&descriptor, response.into_inner())?;
            }
            MethodType::ClientStreaming => {
                let outbound = outbound(context, &descriptor, token, failure)?;
                let request = call.request(metadata, outbound);
                let response = call
                    .wait(transport.client_streaming(&path, request, codec))
                    .await?;
                context.response.headers = response_message(&descriptor, response.into_inner())?;
            }
            MethodType::ServerStreaming if descriptor.response().is_empty() => {
                // Nothing to wait for up front: the call starts when the stream is first polled.
                let request = call.request(metadata, header_message);
                let guard = token.clone().drop_guard();
                let items = async_stream::stream! {
                    let response = call.wait(transport.server_streaming(&path, request, codec)).await;
                    match response {
                        Ok(response) => {
                            let mut items = call.inbound(response.into_inner(), guard);
                            while let Some(item) = items.next().await {
                                yield item;
                            }
                        }
                        Err(error) => yield Err(error),
                    }
                };
                context.response.stream = Some(items.boxed());
            }
            MethodType::ServerStreaming => {
                let request = call.request(metadata, header_message);
                let guard = token.clone().drop_guard();
                let response = call
                    .wait(transport.server_streaming(&path, request, codec))
                    .await?;
                context.response.headers = response_headers(&operation, response.metadata())?;
                context.response.stream = Some(call.inbound(response.into_inner(), guard));
            }
            MethodType::DuplexStreaming => {
                let outbound = outbound(context, &descriptor, token.clone(), failure)?;
                let request = call.request(metadata, outbound);
                let guard = token.drop_guard();
                let response = call.wait(transport.streaming(&path, request, codec)).await?;
                context.response.headers = response_headers(&operation, response.metadata())?;
                context.response.stream = Some(call.inbound(response.into_inner(), guard));
            }
        }

        Ok(())
    }
}

/// Per-call state shared by the waiting and reading halves of a call.
struct PendingCall {
    operation: Arc<ClientOperation>,
    token: CancellationToken,
    failure: FailureSlot,
    timeout: Option<Duration>,
    /// Covers the whole call, including reading the response stream.
    deadline: Option<Instant>,
}

impl PendingCall {
    fn request<T>(&self, metadata: MetadataMap, payload: T) -> tonic::Request<T> {
        let mut request =
            tonic::Request::from_parts(metadata, tonic::Extensions::default(), payload);
        if let Some(timeout) = self.timeout {
            request.set_timeout(timeout);
        }
        request
    }

    fn cancelled(&self) -> CallError {
        take_failure(&self.failure)
    }

    /// Awaits a transport call, racing it against cancellation and the deadline.
    async fn wait<T>(
        &self,
        call: impl Future<Output = Result<Result<Response<T>, Status>, GrpcRequestError>>,
    ) -> Result<Response<T>, CallError> {
        let call = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, call)
                    .await
                    .unwrap_or_else(|_| Ok(Err(Status::deadline_exceeded("Deadline exceeded")))),
                None => call.await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(self.cancelled()),
            result = call => result,
        };

        // The peer may answer a request stream that ended early because its source failed.
        if let Some(error) = recorded_failure(&self.failure) {
            return Err(error);
        }

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(status)) => Err(self.operation.translate(status)),
            Err(error) => Err(error.into()),
        }
    }

    /// Lazily reads response items until the peer ends the stream, an error arrives or the
    /// call is cancelled. Dropping the stream cancels the call.
    fn inbound(
        &self,
        mut items: tonic::Streaming<Value>,
        guard: DropGuard,
    ) -> ItemStream {
        let operation = self.operation.clone();
        let token = self.token.clone();
        let failure = self.failure.clone();
        let deadline = self.deadline;

        let stream = async_stream::stream! {
            let _guard = guard;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => Some(Err(take_failure(&failure))),
                    _ = expired(deadline) => {
                        token.cancel();
                        Some(Err(CallError::Status(Status::deadline_exceeded("Deadline exceeded"))))
                    }
                    item = items.next() => item.map(|r| r.map_err(|status| operation.translate(status))),
                };

                match next {
                    Some(Ok(value)) => yield Ok(value),
                    Some(Err(error)) => {
                        yield Err(error);
                        break;
                    }
                    None => break,
                }
            }
        };

        stream.boxed()
    }
}

/// Resolves once `deadline` has passed, never without one.
async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The request stream of the call, type-checked and wrapped in the outbound write loop.
fn outbound(
    context: &mut FilterContext,
    descriptor: &OperationDescriptor,
    token: CancellationToken,
    failure: FailureSlot,
) -> Result<impl Stream<Item = Value> + Send + 'static, CallError> {
    let items = context.request.stream.take().ok_or_else(|| {
        CallError::InvalidInvocation(format!(
            "Operation '{}' needs a request stream",
            descriptor.operation_name()
        ))
    })?;

    let items = match descriptor.request_stream() {
        Some(accessor) => accessor.normalize_items(items),
        None => items,
    };

    Ok(write_loop(items, token, failure))
}

/// Forwards items until the source is exhausted, fails or the call is cancelled. A source
/// error is recorded and cancels the call so that the caller sees it instead of a response.
fn write_loop(
    mut items: ItemStream,
    token: CancellationToken,
    failure: FailureSlot,
) -> impl Stream<Item = Value> + Send + 'static {
    async_stream::stream! {
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                item = items.next() => item,
            };

            match next {
                Some(Ok(value)) => yield value,
                Some(Err(error)) => {
                    tracing::debug!(error = %error, "Request stream failed, aborting the call");
                    failure.lock().replace(error);
                    token.cancel();
                    break;
                }
                None => break,
            }
        }
    }
}

fn response_message(descriptor: &OperationDescriptor, value: Value) -> Result<Headers, CallError> {
    Ok(Headers::from_message(
        descriptor.response_accessor().as_ref(),
        descriptor.response_names(),
        value,
    )?)
}

/// Response headers of streaming responses, read from the initial metadata. Absent headers
/// leave every value at its default.
fn response_headers(operation: &ClientOperation, metadata: &MetadataMap) -> Result<Headers, CallError> {
    let descriptor = &operation.descriptor;

    let value = match metadata::get_binary(metadata, RESPONSE_HEADERS_KEY) {
        None => Value::Null,
        Some(Ok(bytes)) => operation.marshallers.response.deserialize(&bytes)?,
        Some(Err(e)) => {
            return Err(CallError::Status(Status::internal(format!(
                "Malformed response headers: {e}"
            ))));
        }
    };

    response_message(descriptor, value)
}
