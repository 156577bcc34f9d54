use crate::{
    call::{CallError, ItemStream},
    message::{Headers, decode_slot},
    reflection::OperationDescriptor,
    types::ContractType,
};
use futures_util::{Stream, StreamExt, stream::BoxStream};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub cancellation: Option<CancellationToken>,
    /// Sent as `grpc-timeout` and enforced locally while waiting for the response.
    pub timeout: Option<Duration>,
    /// Custom ASCII metadata.
    pub metadata: Vec<(String, String)>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

/// One positional argument, aligned with the method's parameter list.
pub enum Argument {
    Value(Value),
    Stream(ItemStream),
    Cancellation(CancellationToken),
    Options(CallOptions),
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Argument::Stream(_) => f.write_str("Stream(..)"),
            Argument::Cancellation(t) => f.debug_tuple("Cancellation").field(t).finish(),
            Argument::Options(o) => f.debug_tuple("Options").field(o).finish(),
        }
    }
}

/// The arguments of one call.
#[derive(Debug, Default)]
pub struct Invocation {
    arguments: Vec<Argument>,
}

impl Invocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn argument(mut self, argument: Argument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn value(self, value: impl Into<Value>) -> Self {
        self.argument(Argument::Value(value.into()))
    }

    /// Adds a value argument from any serializable Rust value.
    pub fn arg<T: Serialize>(self, value: &T) -> Result<Self, CallError> {
        let value = serde_json::to_value(value).map_err(|e| {
            CallError::InvalidInvocation(format!("Argument is not serializable: {e}"))
        })?;
        Ok(self.value(value))
    }

    pub fn stream(self, items: ItemStream) -> Self {
        self.argument(Argument::Stream(items))
    }

    /// Adds a stream argument from a stream of serializable items.
    pub fn items<T, S>(self, items: S) -> Self
    where
        T: Serialize,
        S: Stream<Item = T> + Send + 'static,
    {
        let items = items
            .map(|item| {
                serde_json::to_value(&item).map_err(|e| {
                    CallError::InvalidInvocation(format!("Stream item is not serializable: {e}"))
                })
            })
            .boxed();
        self.stream(items)
    }

    pub fn cancellation(self, token: CancellationToken) -> Self {
        self.argument(Argument::Cancellation(token))
    }

    pub fn options(self, options: CallOptions) -> Self {
        self.argument(Argument::Options(options))
    }

    pub(crate) fn into_arguments(self) -> Vec<Argument> {
        self.arguments
    }
}

/// What a call produced: the response headers and, for streaming responses, the item stream.
pub struct CallOutcome {
    operation: Arc<OperationDescriptor>,
    headers: Headers,
    stream: Option<ItemStream>,
}

impl CallOutcome {
    pub(crate) fn new(
        operation: Arc<OperationDescriptor>,
        headers: Headers,
        stream: Option<ItemStream>,
    ) -> Self {
        Self {
            operation,
            headers,
            stream,
        }
    }

    pub fn operation(&self) -> &Arc<OperationDescriptor> {
        &self.operation
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The single return value of the operation.
    pub fn value<T: ContractType>(&self) -> Result<T, CallError> {
        match self.headers.values() {
            [value] => Ok(decode_slot(0, value.clone())?),
            values => Err(CallError::InvalidInvocation(format!(
                "Operation '{}' returns {} values, not one",
                self.operation.operation_name(),
                values.len()
            ))),
        }
    }

    /// A named return value.
    pub fn header<T: ContractType>(&self, name: &str) -> Result<T, CallError> {
        Ok(self.headers.decode(name)?)
    }

    pub fn into_parts(self) -> (Headers, Option<ItemStream>) {
        (self.headers, self.stream)
    }

    /// The response items. Fails for operations without a response stream.
    pub fn into_stream(self) -> Result<ItemStream, CallError> {
        let operation = self.operation.operation_name().to_string();
        self.stream.ok_or_else(|| {
            CallError::InvalidInvocation(format!("Operation '{operation}' has no response stream"))
        })
    }

    /// The response items deserialized into `T`.
    pub fn into_typed_stream<T: ContractType>(
        self,
    ) -> Result<BoxStream<'static, Result<T, CallError>>, CallError> {
        Ok(self
            .into_stream()?
            .map(|item| item.and_then(|value| Ok(decode_slot::<T>(0, value)?)))
            .boxed())
    }
}

impl fmt::Debug for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOutcome")
            .field("operation", &self.operation.path())
            .field("headers", &self.headers)
            .field("stream", &self.stream.is_some())
            .finish()
    }
}

/// Arguments split by role.
pub(crate) struct BoundArguments {
    pub headers: Vec<Value>,
    pub stream: Option<ItemStream>,
    pub cancellation: Option<CancellationToken>,
    pub options: CallOptions,
}

impl BoundArguments {
    pub fn bind(operation: &OperationDescriptor, invocation: Invocation) -> Result<Self, CallError> {
        let parameters = operation.signature().parameters();
        let arguments = invocation.into_arguments();

        if arguments.len() != parameters.len() {
            return Err(CallError::InvalidInvocation(format!(
                "'{}' takes {} arguments but {} were given",
                operation.contract_method().signature,
                parameters.len(),
                arguments.len()
            )));
        }

        let mut bound = BoundArguments {
            headers: Vec::with_capacity(operation.request_header_parameter_indices().len()),
            stream: None,
            cancellation: None,
            options: CallOptions::default(),
        };

        for (index, argument) in arguments.into_iter().enumerate() {
            let role = if operation.request_stream_parameter_index() == Some(index) {
                "stream"
            } else if operation.cancellation_parameter_index() == Some(index) {
                "cancellation"
            } else if operation.call_options_parameter_index() == Some(index) {
                "options"
            } else {
                "value"
            };

            match (role, argument) {
                ("value", Argument::Value(value)) => bound.headers.push(value),
                ("stream", Argument::Stream(stream)) => bound.stream = Some(stream),
                ("cancellation", Argument::Cancellation(token)) => bound.cancellation = Some(token),
                ("options", Argument::Options(options)) => bound.options = options,
                (role, other) => {
                    return Err(CallError::InvalidInvocation(format!(
                        "Argument {index} of '{}' must be a {role}, got {other:?}",
                        operation.operation_name()
                    )));
                }
            }
        }

        Ok(bound)
    }

    /// The caller's token: the cancellation argument, else the one in the call options.
    pub fn caller_token(&self) -> Option<CancellationToken> {
        self.cancellation
            .clone()
            .or_else(|| self.options.cancellation.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_arg_serializes_value() {
        let invocation = Invocation::new().arg(&vec![1, 2]).unwrap();

        match invocation.into_arguments().as_slice() {
            [Argument::Value(value)] => assert_eq!(*value, serde_json::json!([1, 2])),
            other => panic!("Expected one value argument, got {other:?}"),
        }
    }

    #[test]
    fn test_arg_reports_serialization_failure() {
        let mut cells = BTreeMap::new();
        cells.insert((0, 0), 1);

        let result = Invocation::new().arg(&cells);

        assert!(matches!(result, Err(CallError::InvalidInvocation(_))));
    }
}
