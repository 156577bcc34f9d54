//! # Contract Client
//!
//! [`ContractClient`] consumes a contract over any `tonic` transport. It reflects the contract
//! once, binds every operation (marshallers, filter pipeline, error handlers) and then drives
//! calls through one generic dispatcher:
//!
//! 1. The positional arguments are split by role: header values, request stream, cancellation,
//!    call options.
//! 2. Header values are written into the request message through the operation's accessor.
//! 3. The filter pipeline runs; its terminal step performs the transport call matching the
//!    operation's call shape.
//! 4. The response headers and, for streaming responses, the lazy item stream come back in a
//!    [`CallOutcome`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use contract_grpc::client::{ContractClient, Invocation};
//! use contract_grpc::contract::{ContractDefinition, MethodSignature};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let contract = ContractDefinition::new("Calculator")
//!     .package("demo")
//!     .method(MethodSignature::new("Sum").param::<i32>("x").param::<i32>("y").returns::<i32>());
//!
//! let client = ContractClient::connect("http://localhost:50051", &contract).await?;
//! let outcome = client.invoke("Sum", Invocation::new().value(1).value(2)).await?;
//! assert_eq!(outcome.value::<i32>()?, 3);
//! # Ok(())
//! # }
//! ```
mod dispatch;
mod invocation;

pub use invocation::{Argument, CallOptions, CallOutcome, Invocation};

use crate::{
    BoxError,
    blocking,
    call::{CallError, CallSide},
    config::TransportSettings,
    contract::ContractDefinition,
    fault::{ClientErrorHandlers, FaultTypeRegistry, FaultTypeResolver},
    filter::{Filter, FilterCollection, FilterContext, FilterPipeline, RequestContext},
    grpc::client::{GrpcTransport, build_request},
    marshaller::{MarshallerFactory, OperationMarshallers, resolve_factory},
    message::Headers,
    reflection::{ContractDescription, ContractReflector, OperationDescriptor},
};
use dispatch::{ClientOperation, ClientTerminal};
use http_body::Body as HttpBody;
use invocation::BoundArguments;
use std::collections::HashMap;
use std::sync::Arc;
use tonic::transport::{Channel, Endpoint};

/// Errors that can occur when connecting to a gRPC server.
#[derive(Debug, thiserror::Error)]
pub enum ClientConnectError {
    #[error("Invalid URL '{0}': {1}")]
    InvalidUrl(String, #[source] tonic::transport::Error),
    #[error("Failed to connect to '{0}': {1}")]
    ConnectionFailed(String, #[source] tonic::transport::Error),
}

/// Client configuration shared by every contract a [`ClientFactory`] creates clients for.
#[derive(Debug, Clone, Default)]
pub struct ClientFactoryOptions {
    pub marshaller_factory: Option<Arc<dyn MarshallerFactory>>,
    pub filters: FilterCollection,
    pub error_handlers: ClientErrorHandlers,
    pub fault_type_resolver: Option<Arc<dyn FaultTypeResolver>>,
    pub settings: TransportSettings,
}

impl ClientFactoryOptions {
    pub fn with_marshaller_factory(mut self, factory: Arc<dyn MarshallerFactory>) -> Self {
        self.marshaller_factory = Some(factory);
        self
    }

    pub fn with_filter(mut self, order: i32, filter: impl Filter + 'static) -> Self {
        self.filters.add(order, filter);
        self
    }

    pub fn with_error_handlers(mut self, handlers: ClientErrorHandlers) -> Self {
        self.error_handlers = handlers;
        self
    }

    pub fn with_fault_type_resolver(mut self, resolver: Arc<dyn FaultTypeResolver>) -> Self {
        self.fault_type_resolver = Some(resolver);
        self
    }

    pub fn with_settings(mut self, settings: TransportSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Client configuration of one service. Takes precedence over [`ClientFactoryOptions`].
#[derive(Debug, Clone, Default)]
pub struct ServiceClientOptions {
    pub marshaller_factory: Option<Arc<dyn MarshallerFactory>>,
    pub filters: FilterCollection,
    pub error_handlers: ClientErrorHandlers,
    pub fault_type_resolver: Option<Arc<dyn FaultTypeResolver>>,
}

impl ServiceClientOptions {
    pub fn with_marshaller_factory(mut self, factory: Arc<dyn MarshallerFactory>) -> Self {
        self.marshaller_factory = Some(factory);
        self
    }

    pub fn with_filter(mut self, order: i32, filter: impl Filter + 'static) -> Self {
        self.filters.add(order, filter);
        self
    }

    pub fn with_error_handlers(mut self, handlers: ClientErrorHandlers) -> Self {
        self.error_handlers = handlers;
        self
    }

    pub fn with_fault_type_resolver(mut self, resolver: Arc<dyn FaultTypeResolver>) -> Self {
        self.fault_type_resolver = Some(resolver);
        self
    }
}

/// Creates [`ContractClient`]s sharing one configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientFactory {
    options: ClientFactoryOptions,
    services: HashMap<String, ServiceClientOptions>,
}

impl ClientFactory {
    pub fn new(options: ClientFactoryOptions) -> Self {
        Self {
            options,
            services: HashMap::new(),
        }
    }

    /// Options for the service called `service_name` (e.g. `demo.Calculator`).
    pub fn configure_service(
        mut self,
        service_name: impl Into<String>,
        options: ServiceClientOptions,
    ) -> Self {
        self.services.insert(service_name.into(), options);
        self
    }

    pub fn create_client<S>(&self, contract: &ContractDefinition, service: S) -> ContractClient<S>
    where
        S: tonic::client::GrpcService<tonic::body::Body> + Clone + Send + Sync + 'static,
        S::Future: Send,
        S::Error: Into<BoxError>,
        S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
        <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
    {
        let description = ContractReflector::reflect(contract);
        let default_service = ServiceClientOptions::default();
        let mut operations = HashMap::new();

        for descriptor in description.operations() {
            let service_options = self
                .services
                .get(descriptor.service_name())
                .or_else(|| self.services.get(description.service_name()))
                .unwrap_or(&default_service);

            match self.bind_operation(descriptor.clone(), service_options) {
                Ok(operation) => {
                    operations.insert(descriptor.operation_name().to_string(), Arc::new(operation));
                }
                Err(error) => {
                    tracing::warn!(
                        service = %descriptor.service_name(),
                        operation = %descriptor.operation_name(),
                        error = %error,
                        "Operation excluded from the client"
                    );
                }
            }
        }

        tracing::info!(
            service = %description.service_name(),
            operations = operations.len(),
            "Contract client bound"
        );

        ContractClient {
            inner: Arc::new(ClientInner {
                description,
                operations,
                settings: self.options.settings.clone(),
            }),
            transport: GrpcTransport::new(service, &self.options.settings),
        }
    }

    fn bind_operation(
        &self,
        descriptor: Arc<OperationDescriptor>,
        service: &ServiceClientOptions,
    ) -> Result<ClientOperation, CallError> {
        let operation_options = descriptor.signature().options();

        let factory = resolve_factory(
            operation_options.marshaller_factory.as_ref(),
            service.marshaller_factory.as_ref(),
            self.options.marshaller_factory.as_ref(),
        );
        let marshallers = OperationMarshallers::new(&descriptor, factory)?;

        let pipeline = FilterPipeline::build(&[
            &self.options.filters,
            &service.filters,
            &operation_options.filters,
        ]);

        let resolver = service
            .fault_type_resolver
            .clone()
            .or_else(|| self.options.fault_type_resolver.clone())
            .unwrap_or_else(|| Arc::new(FaultTypeRegistry::new()));

        Ok(ClientOperation {
            descriptor,
            marshallers,
            pipeline,
            error_handlers: service.error_handlers.chain(&self.options.error_handlers),
            resolver,
        })
    }
}

#[derive(Debug)]
struct ClientInner {
    description: ContractDescription,
    operations: HashMap<String, Arc<ClientOperation>>,
    settings: TransportSettings,
}

/// Calls the operations of one contract.
///
/// Cheap to clone; clones share the bound operation table.
#[derive(Debug, Clone)]
pub struct ContractClient<S = Channel> {
    inner: Arc<ClientInner>,
    transport: GrpcTransport<S>,
}

impl ContractClient<Channel> {
    /// Connects to a gRPC server and binds `contract` with the default configuration.
    ///
    /// # Arguments
    ///
    /// * `addr` - The server URI (e.g., `http://localhost:50051`).
    pub async fn connect(
        addr: &str,
        contract: &ContractDefinition,
    ) -> Result<Self, ClientConnectError> {
        let endpoint = Endpoint::new(addr.to_string())
            .map_err(|e| ClientConnectError::InvalidUrl(addr.to_string(), e))?;

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| ClientConnectError::ConnectionFailed(addr.to_string(), e))?;

        Ok(Self::new(contract, channel))
    }
}

impl<S> ContractClient<S>
where
    S: tonic::client::GrpcService<tonic::body::Body> + Clone + Send + Sync + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Binds `contract` over `service` with the default configuration.
    pub fn new(contract: &ContractDefinition, service: S) -> Self {
        ClientFactory::default().create_client(contract, service)
    }

    pub fn description(&self) -> &ContractDescription {
        &self.inner.description
    }

    /// Looks a bound operation up by operation name or by path.
    pub fn operation(&self, name: &str) -> Option<&Arc<OperationDescriptor>> {
        self.find(name).map(|op| &op.descriptor)
    }

    fn find(&self, name: &str) -> Option<&Arc<ClientOperation>> {
        self.inner.operations.get(name).or_else(|| {
            self.inner
                .operations
                .values()
                .find(|op| op.descriptor.path() == name)
        })
    }

    /// Calls the operation named `operation` (operation name or path).
    ///
    /// Operations declared [`blocking`](crate::contract::MethodSignature::blocking) are
    /// refused here and go through [`invoke_blocking`](Self::invoke_blocking).
    pub async fn invoke(
        &self,
        operation: &str,
        invocation: Invocation,
    ) -> Result<CallOutcome, CallError> {
        let bound_operation = self
            .find(operation)
            .cloned()
            .ok_or_else(|| CallError::OperationNotFound(operation.to_string()))?;

        if !bound_operation.descriptor.is_async() {
            return Err(CallError::InvalidInvocation(format!(
                "Operation '{}' is blocking, use invoke_blocking",
                bound_operation.descriptor.operation_name()
            )));
        }

        self.dispatch(bound_operation, invocation).await
    }

    async fn dispatch(
        &self,
        bound_operation: Arc<ClientOperation>,
        invocation: Invocation,
    ) -> Result<CallOutcome, CallError> {
        let descriptor = bound_operation.descriptor.clone();

        let arguments = BoundArguments::bind(&descriptor, invocation)?;
        let token = arguments
            .caller_token()
            .map(|token| token.child_token())
            .unwrap_or_default();
        let timeout = arguments
            .options
            .timeout
            .or_else(|| self.inner.settings.default_timeout());

        let (metadata, _, ()) = build_request((), &arguments.options.metadata)?.into_parts();

        let headers = Headers::from_values(
            descriptor.request_accessor().as_ref(),
            descriptor.request_names(),
            arguments.headers,
        )?;

        let mut context = FilterContext::new(
            descriptor.clone(),
            CallSide::Client,
            token,
            metadata,
            RequestContext {
                headers,
                stream: arguments.stream,
            },
        );

        let terminal = ClientTerminal {
            transport: self.transport.clone(),
            operation: bound_operation.clone(),
            timeout,
        };

        tracing::debug!(path = %descriptor.path(), method_type = %descriptor.method_type(), "Call started");

        let result = bound_operation.pipeline.run(&mut context, &terminal).await;

        match &result {
            Ok(()) => tracing::debug!(path = %descriptor.path(), "Call completed"),
            Err(CallError::Cancelled) => tracing::debug!(path = %descriptor.path(), "Call cancelled"),
            Err(error) => tracing::debug!(path = %descriptor.path(), error = %error, "Call failed"),
        }
        result?;

        Ok(CallOutcome::new(
            descriptor,
            context.response.headers,
            context.response.stream,
        ))
    }

    /// Blocking flavour of [`invoke`](Self::invoke) for operations without a response stream,
    /// whether or not they are declared blocking.
    ///
    /// Fails with [`BlockingError::CurrentThreadRuntime`](crate::blocking::BlockingError) when
    /// called from a current-thread runtime.
    pub fn invoke_blocking(
        &self,
        operation: &str,
        invocation: Invocation,
    ) -> Result<CallOutcome, CallError> {
        let bound_operation = self
            .find(operation)
            .cloned()
            .ok_or_else(|| CallError::OperationNotFound(operation.to_string()))?;

        if bound_operation.descriptor.method_type().has_response_stream() {
            return Err(CallError::InvalidInvocation(format!(
                "Operation '{}' returns a stream and cannot be called blocking",
                bound_operation.descriptor.operation_name()
            )));
        }

        blocking::block_on(self.dispatch(bound_operation, invocation))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MethodSignature;
    use crate::marshaller::JsonMarshallerFactory;
    use crate::server::{Reply, ServiceHost};
    use tracing_test::traced_test;

    fn contract() -> ContractDefinition {
        ContractDefinition::new("Grid")
            .package("demo")
            .method(MethodSignature::new("Size").returns::<i32>())
            .method(MethodSignature::new("Cells").returns::<Vec<Vec<i32>>>())
    }

    fn empty_host() -> ServiceHost {
        ServiceHost::builder().build().unwrap()
    }

    #[traced_test]
    #[test]
    fn test_unmarshallable_operation_is_excluded() {
        let client = ContractClient::new(&contract(), empty_host());

        assert!(client.operation("Size").is_some());
        assert!(client.operation("Cells").is_none());
        assert_eq!(client.description().operations().len(), 2);
        assert!(logs_contain("Operation excluded from the client"));
    }

    #[test]
    fn test_service_marshaller_overrides_default() {
        let client = ClientFactory::default()
            .configure_service(
                "demo.Grid",
                ServiceClientOptions::default()
                    .with_marshaller_factory(Arc::new(JsonMarshallerFactory)),
            )
            .create_client(&contract(), empty_host());

        assert!(client.operation("Cells").is_some());
        assert!(client.operation("/demo.Grid/Cells").is_some());
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let client = ContractClient::new(&contract(), empty_host());

        let result = client.invoke("Rows", Invocation::new()).await;

        assert!(matches!(result, Err(CallError::OperationNotFound(name)) if name == "Rows"));
    }

    fn blocking_contract() -> ContractDefinition {
        ContractDefinition::new("Clock")
            .package("demo")
            .method(MethodSignature::new("Now").returns::<u64>().blocking())
    }

    fn clock_host() -> ServiceHost {
        let description = ContractReflector::reflect(&blocking_contract());
        ServiceHost::builder()
            .bind_named(&description, "Now", |_call| async {
                Ok::<_, BoxError>(Reply::new().value(42u64))
            })
            .and_then(|builder| builder.build())
            .unwrap()
    }

    #[tokio::test]
    async fn test_blocking_operation_refuses_invoke() {
        let client = ContractClient::new(&blocking_contract(), clock_host());

        let result = client.invoke("Now", Invocation::new()).await;

        assert!(matches!(result, Err(CallError::InvalidInvocation(_))));
    }

    #[test]
    fn test_blocking_operation_through_invoke_blocking() {
        let client = ContractClient::new(&blocking_contract(), clock_host());

        let outcome = client.invoke_blocking("Now", Invocation::new()).unwrap();

        assert_eq!(outcome.value::<u64>().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_invalid_metadata_is_rejected_before_sending() {
        let contract = ContractDefinition::new("Grid").method(
            MethodSignature::new("Size")
                .call_options("options")
                .returns::<i32>(),
        );
        let client = ContractClient::new(&contract, empty_host());

        let options = CallOptions::new().with_metadata("bad key", "value");
        let result = client
            .invoke("Size", Invocation::new().options(options))
            .await;

        assert!(matches!(result, Err(CallError::Request(_))));
    }
}
