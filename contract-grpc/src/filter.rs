//! # Filters
//!
//! Ordered middleware around every call, on both sides of the wire.
//!
//! A [`Filter`] receives the mutable [`FilterContext`] of the call and a [`Next`] handle. It may
//! inspect or rewrite the request headers, wrap the request stream, call `next.run(context)`
//! to continue the chain (or skip it), then inspect or rewrite the response.
//!
//! Registrations from the global, service and operation scopes are concatenated and sorted by
//! order once, when an operation is bound, into an immutable [`FilterPipeline`]. Lower orders run
//! first on the way in and last on the way out; equal orders keep their registration order.
//!
//! ```rust
//! use async_trait::async_trait;
//! use contract_grpc::call::CallError;
//! use contract_grpc::filter::{Filter, FilterContext, Next};
//!
//! #[derive(Debug)]
//! struct Audit;
//!
//! #[async_trait]
//! impl Filter for Audit {
//!     async fn invoke(&self, context: &mut FilterContext, next: Next<'_>) -> Result<(), CallError> {
//!         tracing::info!(operation = %context.operation().path(), "call started");
//!         next.run(context).await
//!     }
//! }
//! ```
use crate::{
    call::{CallError, CallSide, ItemStream},
    message::Headers,
    reflection::OperationDescriptor,
};
use async_trait::async_trait;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;

#[async_trait]
pub trait Filter: Send + Sync {
    async fn invoke(&self, context: &mut FilterContext, next: Next<'_>) -> Result<(), CallError>;
}

/// The request half of a call as filters see it.
#[derive(Default)]
pub struct RequestContext {
    pub headers: Headers,
    /// Present for client-streaming and duplex operations.
    pub stream: Option<ItemStream>,
}

/// The response half of a call. Filled in by the terminal step of the pipeline.
#[derive(Default)]
pub struct ResponseContext {
    pub headers: Headers,
    /// Present for server-streaming and duplex operations.
    pub stream: Option<ItemStream>,
}

/// Per-call state shared by every filter of the pipeline.
pub struct FilterContext {
    operation: Arc<OperationDescriptor>,
    side: CallSide,
    cancellation: CancellationToken,
    pub metadata: MetadataMap,
    pub request: RequestContext,
    pub response: ResponseContext,
}

impl FilterContext {
    pub(crate) fn new(
        operation: Arc<OperationDescriptor>,
        side: CallSide,
        cancellation: CancellationToken,
        metadata: MetadataMap,
        request: RequestContext,
    ) -> Self {
        let response = ResponseContext {
            headers: Headers::empty_for(operation.response_names()),
            stream: None,
        };
        Self {
            operation,
            side,
            cancellation,
            metadata,
            request,
            response,
        }
    }

    pub fn operation(&self) -> &Arc<OperationDescriptor> {
        &self.operation
    }

    pub fn side(&self) -> CallSide {
        self.side
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

impl Debug for FilterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterContext")
            .field("operation", &self.operation.path())
            .field("side", &self.side)
            .field("request_headers", &self.request.headers)
            .field("response_headers", &self.response.headers)
            .finish_non_exhaustive()
    }
}

/// The last step of a pipeline: the transport call on a client, the handler on a server.
#[async_trait]
pub(crate) trait Terminal: Send + Sync {
    async fn call(&self, context: &mut FilterContext) -> Result<(), CallError>;
}

/// The rest of the pipeline after the current filter.
pub struct Next<'a> {
    filters: &'a [Arc<dyn Filter>],
    terminal: &'a dyn Terminal,
}

impl Next<'_> {
    pub async fn run(self, context: &mut FilterContext) -> Result<(), CallError> {
        match self.filters.split_first() {
            Some((filter, rest)) => {
                let next = Next {
                    filters: rest,
                    terminal: self.terminal,
                };
                filter.invoke(context, next).await
            }
            None => self.terminal.call(context).await,
        }
    }
}

type FilterFactory = Arc<dyn Fn() -> Arc<dyn Filter> + Send + Sync>;

#[derive(Clone)]
struct FilterRegistration {
    order: i32,
    factory: FilterFactory,
}

/// Filter registrations of one scope.
#[derive(Clone, Default)]
pub struct FilterCollection {
    registrations: Vec<FilterRegistration>,
}

impl FilterCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a shared filter instance.
    pub fn add(&mut self, order: i32, filter: impl Filter + 'static) -> &mut Self {
        let filter: Arc<dyn Filter> = Arc::new(filter);
        self.add_factory(order, move || filter.clone())
    }

    /// Registers a factory, invoked once for every operation the filter is bound to.
    pub fn add_factory<F>(&mut self, order: i32, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Filter> + Send + Sync + 'static,
    {
        self.registrations.push(FilterRegistration {
            order,
            factory: Arc::new(factory),
        });
        self
    }

    /// Builder flavour of [`add`](Self::add).
    pub fn with(mut self, order: i32, filter: impl Filter + 'static) -> Self {
        self.add(order, filter);
        self
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

impl Debug for FilterCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.registrations.iter().map(|r| r.order))
            .finish()
    }
}

/// The sorted, immutable filter chain of one operation.
#[derive(Clone, Default)]
pub struct FilterPipeline {
    filters: Arc<[Arc<dyn Filter>]>,
}

impl FilterPipeline {
    /// Concatenates `scopes` in order and sorts the result by filter order, stably.
    pub fn build(scopes: &[&FilterCollection]) -> Self {
        let mut registrations: Vec<&FilterRegistration> = scopes
            .iter()
            .flat_map(|scope| scope.registrations.iter())
            .collect();
        registrations.sort_by_key(|r| r.order);

        let filters = registrations.into_iter().map(|r| (r.factory)()).collect();
        Self { filters }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub(crate) async fn run(
        &self,
        context: &mut FilterContext,
        terminal: &dyn Terminal,
    ) -> Result<(), CallError> {
        Next {
            filters: &self.filters,
            terminal,
        }
        .run(context)
        .await
    }
}

impl Debug for FilterPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("len", &self.filters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{ContractDefinition, MethodSignature};
    use crate::reflection::ContractReflector;
    use parking_lot::Mutex;

    #[derive(Clone)]
    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Filter for Recording {
        async fn invoke(&self, context: &mut FilterContext, next: Next<'_>) -> Result<(), CallError> {
            self.log.lock().push(format!("in {}", self.name));
            let result = next.run(context).await;
            self.log.lock().push(format!("out {}", self.name));
            result
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Filter for ShortCircuit {
        async fn invoke(&self, _context: &mut FilterContext, _next: Next<'_>) -> Result<(), CallError> {
            Err(CallError::InvalidInvocation("stopped".to_string()))
        }
    }

    struct RecordingTerminal(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Terminal for RecordingTerminal {
        async fn call(&self, _context: &mut FilterContext) -> Result<(), CallError> {
            self.0.lock().push("terminal".to_string());
            Ok(())
        }
    }

    fn context() -> FilterContext {
        let contract = ContractDefinition::new("Svc")
            .method(MethodSignature::new("Ping").returns::<bool>());
        let operation = ContractReflector::reflect(&contract).operations()[0].clone();

        FilterContext::new(
            operation,
            CallSide::Client,
            CancellationToken::new(),
            MetadataMap::new(),
            RequestContext::default(),
        )
    }

    #[tokio::test]
    async fn test_order_and_unwinding() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let filter = |name| Recording {
            name,
            log: log.clone(),
        };

        let mut global = FilterCollection::new();
        global.add(3, filter("three"));
        let mut service = FilterCollection::new();
        service.add(1, filter("one"));
        let operation = FilterCollection::new().with(2, filter("two"));

        let pipeline = FilterPipeline::build(&[&global, &service, &operation]);
        pipeline
            .run(&mut context(), &RecordingTerminal(log.clone()))
            .await
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec!["in one", "in two", "in three", "terminal", "out three", "out two", "out one"]
        );
    }

    #[tokio::test]
    async fn test_ties_keep_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let global = FilterCollection::new().with(0, Recording {
            name: "global",
            log: log.clone(),
        });
        let operation = FilterCollection::new().with(0, Recording {
            name: "operation",
            log: log.clone(),
        });

        FilterPipeline::build(&[&global, &operation])
            .run(&mut context(), &RecordingTerminal(log.clone()))
            .await
            .unwrap();

        assert_eq!(log.lock()[..2], ["in global", "in operation"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let filters = FilterCollection::new().with(0, ShortCircuit);

        let result = FilterPipeline::build(&[&filters])
            .run(&mut context(), &RecordingTerminal(log.clone()))
            .await;

        assert!(matches!(result, Err(CallError::InvalidInvocation(_))));
        assert!(log.lock().is_empty());
    }
}
