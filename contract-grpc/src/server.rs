//! # Service Host
//!
//! [`ServiceHost`] exposes contract operations as a `tower` service speaking gRPC. Handlers are
//! bound to the operations of a reflected contract through a [`ServiceHostBuilder`]; the host
//! then routes every request by path, decodes the request headers, runs the server filter
//! pipeline around the handler and encodes the [`Reply`].
//!
//! The host is a plain `Service<http::Request<B>>`, so it can be mounted on any HTTP/2 server
//! or handed to a [`ContractClient`](crate::client::ContractClient) as an in-memory transport.
//!
//! ```rust
//! use contract_grpc::BoxError;
//! use contract_grpc::contract::{ContractDefinition, MethodSignature};
//! use contract_grpc::reflection::ContractReflector;
//! use contract_grpc::server::{Reply, ServiceHostBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let contract = ContractDefinition::new("Calculator")
//!     .method(MethodSignature::new("Sum").param::<i32>("x").param::<i32>("y").returns::<i32>());
//! let description = ContractReflector::reflect(&contract);
//!
//! let _host = ServiceHostBuilder::default()
//!     .bind_named(&description, "Sum", |call| async move {
//!         let sum = call.arg::<i32>("x")? + call.arg::<i32>("y")?;
//!         Ok::<_, BoxError>(Reply::new().value(sum))
//!     })?
//!     .build()?;
//! # Ok(())
//! # }
//! ```
mod call;
mod dispatch;

pub use call::{Reply, ServerCall, ServerCallContext};

use crate::{
    BoxError,
    config::TransportSettings,
    fault::{FaultTypeRegistry, FaultTypeResolver, ServerErrorHandlers},
    filter::{Filter, FilterCollection, FilterPipeline},
    marshaller::{MarshalError, MarshallerFactory, OperationMarshallers, resolve_factory},
    reflection::{ContractDescription, OperationDescriptor},
};
use dispatch::{Handler, ServerOperation};
use futures_util::future::BoxFuture;
use http_body::Body as HttpBody;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::Status;

#[derive(Debug, thiserror::Error)]
pub enum ServiceBuildError {
    #[error("Operation '{operation}' is not part of service '{service}'")]
    UnknownOperation { service: String, operation: String },
    #[error("Path '{0}' is bound more than once")]
    DuplicatePath(String),
    #[error("Failed to build the marshallers of '{path}': {source}")]
    Marshal {
        path: String,
        #[source]
        source: MarshalError,
    },
}

/// Server configuration shared by every bound operation.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    pub marshaller_factory: Option<Arc<dyn MarshallerFactory>>,
    pub filters: FilterCollection,
    pub error_handlers: ServerErrorHandlers,
    pub fault_type_resolver: Option<Arc<dyn FaultTypeResolver>>,
    pub settings: TransportSettings,
}

impl ServerOptions {
    pub fn with_marshaller_factory(mut self, factory: Arc<dyn MarshallerFactory>) -> Self {
        self.marshaller_factory = Some(factory);
        self
    }

    pub fn with_filter(mut self, order: i32, filter: impl Filter + 'static) -> Self {
        self.filters.add(order, filter);
        self
    }

    pub fn with_error_handlers(mut self, handlers: ServerErrorHandlers) -> Self {
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

/// Server configuration of one service. Takes precedence over [`ServerOptions`].
#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    pub marshaller_factory: Option<Arc<dyn MarshallerFactory>>,
    pub filters: FilterCollection,
    pub error_handlers: ServerErrorHandlers,
    pub fault_type_resolver: Option<Arc<dyn FaultTypeResolver>>,
}

impl ServiceOptions {
    pub fn with_marshaller_factory(mut self, factory: Arc<dyn MarshallerFactory>) -> Self {
        self.marshaller_factory = Some(factory);
        self
    }

    pub fn with_filter(mut self, order: i32, filter: impl Filter + 'static) -> Self {
        self.filters.add(order, filter);
        self
    }

    pub fn with_error_handlers(mut self, handlers: ServerErrorHandlers) -> Self {
        self.error_handlers = handlers;
        self
    }

    pub fn with_fault_type_resolver(mut self, resolver: Arc<dyn FaultTypeResolver>) -> Self {
        self.fault_type_resolver = Some(resolver);
        self
    }
}

struct Binding {
    descriptor: Arc<OperationDescriptor>,
    handler: Handler,
}

/// Binds handlers to operations and builds a [`ServiceHost`].
#[derive(Default)]
pub struct ServiceHostBuilder {
    options: ServerOptions,
    services: HashMap<String, ServiceOptions>,
    bindings: Vec<Binding>,
}

impl ServiceHostBuilder {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options,
            services: HashMap::new(),
            bindings: Vec::new(),
        }
    }

    /// Options for the service called `service_name` (e.g. `demo.Calculator`).
    pub fn configure_service(
        mut self,
        service_name: impl Into<String>,
        options: ServiceOptions,
    ) -> Self {
        self.services.insert(service_name.into(), options);
        self
    }

    /// Binds `handler` to `operation`.
    pub fn bind<F, Fut>(mut self, operation: Arc<OperationDescriptor>, handler: F) -> Self
    where
        F: Fn(ServerCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, BoxError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(
            move |call: ServerCall| -> BoxFuture<'static, Result<Reply, BoxError>> {
                Box::pin(handler(call))
            },
        );
        self.bindings.push(Binding {
            descriptor: operation,
            handler,
        });
        self
    }

    /// Binds `handler` to the operation of `description` called `operation` (operation name
    /// or path).
    pub fn bind_named<F, Fut>(
        self,
        description: &ContractDescription,
        operation: &str,
        handler: F,
    ) -> Result<Self, ServiceBuildError>
    where
        F: Fn(ServerCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, BoxError>> + Send + 'static,
    {
        let descriptor = description
            .find(operation)
            .or_else(|| description.find_by_path(operation))
            .cloned()
            .ok_or_else(|| ServiceBuildError::UnknownOperation {
                service: description.service_name().to_string(),
                operation: operation.to_string(),
            })?;

        Ok(self.bind(descriptor, handler))
    }

    pub fn build(self) -> Result<ServiceHost, ServiceBuildError> {
        let default_service = ServiceOptions::default();
        let mut routes = HashMap::with_capacity(self.bindings.len());

        for Binding {
            descriptor,
            handler,
        } in self.bindings
        {
            let path = descriptor.path().to_string();
            if routes.contains_key(&path) {
                return Err(ServiceBuildError::DuplicatePath(path));
            }

            let service = self
                .services
                .get(descriptor.service_name())
                .unwrap_or(&default_service);
            let operation_options = descriptor.signature().options();

            let factory = resolve_factory(
                operation_options.marshaller_factory.as_ref(),
                service.marshaller_factory.as_ref(),
                self.options.marshaller_factory.as_ref(),
            );
            let marshallers = OperationMarshallers::new(&descriptor, factory).map_err(|source| {
                ServiceBuildError::Marshal {
                    path: path.clone(),
                    source,
                }
            })?;

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

            tracing::debug!(%path, method_type = %descriptor.method_type(), "Operation bound");

            let operation = ServerOperation {
                descriptor,
                marshallers,
                pipeline,
                error_handlers: service.error_handlers.chain(&self.options.error_handlers),
                resolver,
                handler,
                settings: self.options.settings.clone(),
            };
            routes.insert(path, Arc::new(operation));
        }

        tracing::info!(routes = routes.len(), "Service host built");

        Ok(ServiceHost {
            routes: Arc::new(routes),
        })
    }
}

/// A `tower` service dispatching gRPC requests to bound operation handlers.
#[derive(Debug, Clone)]
pub struct ServiceHost {
    routes: Arc<HashMap<String, Arc<ServerOperation>>>,
}

impl ServiceHost {
    pub fn builder() -> ServiceHostBuilder {
        ServiceHostBuilder::default()
    }

    /// Bound paths, in no particular order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

impl<B> tonic::codegen::Service<http::Request<B>> for ServiceHost
where
    B: HttpBody + Send + 'static,
    B::Error: Into<BoxError> + Send + 'static,
{
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        let path = request.uri().path().to_string();

        match self.routes.get(&path).cloned() {
            Some(operation) => Box::pin(async move { Ok(operation.serve(request).await) }),
            None => {
                tracing::debug!(%path, "No operation bound to path");
                let status = Status::unimplemented(format!("Path '{path}' is not bound"));
                Box::pin(async move { Ok(status.into_http()) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{ContractDefinition, MethodSignature};
    use crate::call::CallError;
    use crate::client::{ContractClient, Invocation};
    use crate::reflection::ContractReflector;
    use tonic::codegen::Service;

    fn contract() -> ContractDefinition {
        ContractDefinition::new("Echo").package("demo").method(
            MethodSignature::new("Say")
                .param::<String>("text")
                .returns::<String>(),
        )
    }

    fn description() -> ContractDescription {
        ContractReflector::reflect(&contract())
    }

    async fn echo(call: ServerCall) -> Result<Reply, BoxError> {
        Ok(Reply::new().value(call.arg::<String>("text")?))
    }

    #[test]
    fn test_unknown_operation() {
        let result = ServiceHost::builder().bind_named(&description(), "Shout", echo);

        assert!(matches!(
            result,
            Err(ServiceBuildError::UnknownOperation { service, operation })
                if service == "demo.Echo" && operation == "Shout"
        ));
    }

    #[test]
    fn test_duplicate_path() {
        let description = description();
        let result = ServiceHost::builder()
            .bind_named(&description, "Say", echo)
            .and_then(|builder| builder.bind_named(&description, "/demo.Echo/Say", echo))
            .and_then(ServiceHostBuilder::build);

        assert!(matches!(result, Err(ServiceBuildError::DuplicatePath(path)) if path == "/demo.Echo/Say"));
    }

    #[test]
    fn test_routes_by_path() {
        let host = ServiceHost::builder()
            .bind_named(&description(), "Say", echo)
            .and_then(ServiceHostBuilder::build)
            .unwrap();

        assert_eq!(host.paths().collect::<Vec<_>>(), vec!["/demo.Echo/Say"]);
    }

    #[tokio::test]
    async fn test_unbound_path_is_unimplemented() {
        let mut host = ServiceHost::builder().build().unwrap();

        let request = http::Request::builder()
            .uri("/demo.Echo/Whisper")
            .body(tonic::body::Body::empty())
            .unwrap();
        let response = host.call(request).await.unwrap();

        let status = Status::from_header_map(response.headers()).unwrap();
        assert_eq!(status.code(), tonic::Code::Unimplemented);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_internal() {
        let host = ServiceHost::builder()
            .bind_named(&description(), "Say", |_call| async {
                Ok::<_, BoxError>(Reply::new().value("one").value("two"))
            })
            .and_then(ServiceHostBuilder::build)
            .unwrap();
        let client = ContractClient::new(&contract(), host);

        let result = client.invoke("Say", Invocation::new().value("hi")).await;

        match result {
            Err(CallError::Status(status)) => assert_eq!(status.code(), tonic::Code::Internal),
            other => panic!("Expected an internal status, got {other:?}"),
        }
    }
}
