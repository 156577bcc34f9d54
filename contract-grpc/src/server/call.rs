use crate::{
    BoxError,
    call::{CallError, ItemStream},
    message::{AccessError, Headers, decode_slot},
    reflection::OperationDescriptor,
    types::ContractType,
};
use futures_util::{Stream, StreamExt, stream::BoxStream};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;

/// Per-call state a handler can observe.
#[derive(Debug, Clone)]
pub struct ServerCallContext {
    metadata: MetadataMap,
    cancellation: CancellationToken,
}

impl ServerCallContext {
    pub(crate) fn new(metadata: MetadataMap, cancellation: CancellationToken) -> Self {
        Self {
            metadata,
            cancellation,
        }
    }

    /// Request metadata as seen after the server filters ran.
    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// Cancelled when the client cancels or the call is dropped.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// One incoming call, as handed to an operation handler.
pub struct ServerCall {
    operation: Arc<OperationDescriptor>,
    headers: Headers,
    stream: Option<ItemStream>,
    context: ServerCallContext,
}

impl ServerCall {
    pub(crate) fn new(
        operation: Arc<OperationDescriptor>,
        headers: Headers,
        stream: Option<ItemStream>,
        context: ServerCallContext,
    ) -> Self {
        Self {
            operation,
            headers,
            stream,
            context,
        }
    }

    pub fn operation(&self) -> &Arc<OperationDescriptor> {
        &self.operation
    }

    /// The request header values, by parameter name.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The header parameter called `name`.
    pub fn arg<T: ContractType>(&self, name: &str) -> Result<T, AccessError> {
        self.headers.decode(name)
    }

    /// The header parameter at position `index` of the full parameter list.
    pub fn get<T: ContractType>(&self, index: usize) -> Result<T, AccessError> {
        let position = self
            .operation
            .request_header_parameter_indices()
            .iter()
            .position(|i| *i == index)
            .ok_or(AccessError::IndexOutOfRange {
                index,
                len: self.operation.signature().parameters().len(),
            })?;

        let value = self
            .headers
            .get_index(position)
            .cloned()
            .unwrap_or(Value::Null);
        decode_slot(position, value)
    }

    /// The request stream. Present once, for client-streaming and duplex operations.
    pub fn take_stream(&mut self) -> Option<ItemStream> {
        self.stream.take()
    }

    /// The request stream deserialized into `T`.
    pub fn take_typed_stream<T: ContractType>(
        &mut self,
    ) -> Option<BoxStream<'static, Result<T, CallError>>> {
        self.take_stream().map(|items| {
            items
                .map(|item| item.and_then(|value| Ok(decode_slot::<T>(0, value)?)))
                .boxed()
        })
    }

    pub fn context(&self) -> &ServerCallContext {
        &self.context
    }

    /// Shorthand for the cancellation token of the call context.
    pub fn cancellation(&self) -> &CancellationToken {
        self.context.cancellation()
    }
}

impl fmt::Debug for ServerCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCall")
            .field("operation", &self.operation.path())
            .field("headers", &self.headers)
            .field("stream", &self.stream.is_some())
            .finish()
    }
}

/// What a handler answers with: the response header values and, for streaming responses,
/// the item stream.
#[derive(Default)]
pub struct Reply {
    values: Vec<Value>,
    stream: Option<ItemStream>,
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the next response header value.
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    /// Appends the next response header value from any serializable Rust value.
    pub fn arg<T: Serialize>(self, value: &T) -> Result<Self, BoxError> {
        Ok(self.value(serde_json::to_value(value)?))
    }

    pub fn stream(mut self, items: ItemStream) -> Self {
        self.stream = Some(items);
        self
    }

    /// Sets the response stream from a stream of serializable items.
    pub fn items<T, S>(self, items: S) -> Self
    where
        T: Serialize,
        S: Stream<Item = T> + Send + 'static,
    {
        let items = items
            .map(|item| {
                serde_json::to_value(&item)
                    .map_err(|e| CallError::Application(Box::new(e)))
            })
            .boxed();
        self.stream(items)
    }

    pub(crate) fn into_parts(self) -> (Vec<Value>, Option<ItemStream>) {
        (self.values, self.stream)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("values", &self.values)
            .field("stream", &self.stream.is_some())
            .finish()
    }
}
