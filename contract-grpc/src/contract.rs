//! # Contract Definitions
//!
//! A contract is the Rust-side description of a service interface: its name, the contracts it
//! extends and the signature of every method. Definitions are plain data built once, usually in
//! a function next to the trait or module implementing the service, and handed to the
//! [`ContractReflector`](crate::reflection::ContractReflector) which turns them into operation
//! descriptors.
//!
//! ## Example
//!
//! ```rust
//! use contract_grpc::contract::{ContractDefinition, MethodSignature};
//!
//! let calculator = ContractDefinition::new("Calculator")
//!     .package("demo")
//!     .method(
//!         MethodSignature::new("Sum")
//!             .param::<i32>("x")
//!             .param::<i32>("y")
//!             .returns::<i32>(),
//!     )
//!     .method(
//!         MethodSignature::new("MultiplyBy")
//!             .stream_param::<i32>("values")
//!             .param::<i32>("multiplier")
//!             .cancellation("token")
//!             .returns_stream::<i32>(),
//!     );
//!
//! assert_eq!(calculator.service_name(), "demo.Calculator");
//! ```
use crate::{
    filter::{Filter, FilterCollection},
    marshaller::MarshallerFactory,
    message::{MessageAccessor, TupleAccessor, TupleMessage},
    types::{ContractType, TypeDescriptor},
};
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Describes a service contract and the contracts it extends.
#[derive(Clone, Debug)]
pub struct ContractDefinition {
    name: String,
    package: Option<String>,
    generic_arguments: Vec<TypeDescriptor>,
    bases: Vec<Arc<ContractDefinition>>,
    methods: Vec<MethodSignature>,
}

impl ContractDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            package: None,
            generic_arguments: Vec::new(),
            bases: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// Closes one generic parameter of the contract, e.g. `Repository<Person>`.
    pub fn generic_argument(mut self, ty: TypeDescriptor) -> Self {
        self.generic_arguments.push(ty);
        self
    }

    /// Declares that this contract inherits every operation of `base`.
    pub fn extends(mut self, base: impl Into<Arc<ContractDefinition>>) -> Self {
        self.bases.push(base.into());
        self
    }

    pub fn method(mut self, method: MethodSignature) -> Self {
        self.methods.push(method);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn package_name(&self) -> Option<&str> {
        self.package.as_deref()
    }

    pub fn generic_arguments(&self) -> &[TypeDescriptor] {
        &self.generic_arguments
    }

    pub fn bases(&self) -> &[Arc<ContractDefinition>] {
        &self.bases
    }

    pub fn methods(&self) -> &[MethodSignature] {
        &self.methods
    }

    /// The gRPC service name, e.g. `demo.Repository-Person`.
    pub fn service_name(&self) -> String {
        let name = generic_name(&self.name, &self.generic_arguments);
        match &self.package {
            Some(package) if !package.is_empty() => format!("{package}.{name}"),
            _ => name,
        }
    }
}

/// Appends `-{TypeName}` for every generic argument.
pub(crate) fn generic_name(name: &str, generic_arguments: &[TypeDescriptor]) -> String {
    generic_arguments
        .iter()
        .fold(name.to_string(), |acc, ty| format!("{acc}-{}", ty.type_name()))
}

/// The role of a method parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    /// Sent once, as part of the request headers.
    Value(TypeDescriptor),
    /// A lazily produced sequence of items.
    Stream(TypeDescriptor),
    /// Call cancellation, never marshalled.
    Cancellation,
    /// Per-call options (metadata, timeout, cancellation), never marshalled.
    CallOptions,
}

impl ParameterKind {
    pub fn is_context(&self) -> bool {
        matches!(self, ParameterKind::Cancellation | ParameterKind::CallOptions)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    name: String,
    kind: ParameterKind,
}

impl Parameter {
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ParameterKind {
        &self.kind
    }
}

/// One component of a method's return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReturnComponent {
    Value { name: String, ty: TypeDescriptor },
    Stream(TypeDescriptor),
}

/// Builds a compiled accessor once the slot names of a shape are known.
#[derive(Clone)]
pub struct AccessorFactory {
    types: Vec<TypeDescriptor>,
    build: Arc<dyn Fn(Vec<String>) -> Arc<dyn MessageAccessor> + Send + Sync>,
}

impl AccessorFactory {
    /// A factory producing [`TupleAccessor<T>`].
    pub fn tuple<T: TupleMessage>() -> Self {
        Self {
            types: T::types(),
            build: Arc::new(|names| Arc::new(TupleAccessor::<T>::new(names))),
        }
    }

    pub fn types(&self) -> &[TypeDescriptor] {
        &self.types
    }

    pub(crate) fn build(&self, names: Vec<String>) -> Arc<dyn MessageAccessor> {
        (self.build)(names)
    }
}

impl Debug for AccessorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessorFactory")
            .field("types", &self.types)
            .finish_non_exhaustive()
    }
}

/// Per-operation configuration, attached to the signature instead of discovered at runtime.
#[derive(Clone, Debug, Default)]
pub struct OperationOptions {
    pub marshaller_factory: Option<Arc<dyn MarshallerFactory>>,
    pub filters: FilterCollection,
    pub request_accessor: Option<AccessorFactory>,
    pub response_accessor: Option<AccessorFactory>,
}

/// The signature of one contract method.
#[derive(Clone, Debug)]
pub struct MethodSignature {
    name: String,
    generic_arguments: Vec<TypeDescriptor>,
    parameters: Vec<Parameter>,
    returns: Vec<ReturnComponent>,
    is_async: bool,
    options: OperationOptions,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            generic_arguments: Vec::new(),
            parameters: Vec::new(),
            returns: Vec::new(),
            is_async: true,
            options: OperationOptions::default(),
        }
    }

    pub fn parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn param<T: ContractType>(self, name: impl Into<String>) -> Self {
        self.parameter(Parameter::new(name, ParameterKind::Value(T::type_descriptor())))
    }

    pub fn stream_param<T: ContractType>(self, name: impl Into<String>) -> Self {
        self.parameter(Parameter::new(name, ParameterKind::Stream(T::type_descriptor())))
    }

    pub fn cancellation(self, name: impl Into<String>) -> Self {
        self.parameter(Parameter::new(name, ParameterKind::Cancellation))
    }

    pub fn call_options(self, name: impl Into<String>) -> Self {
        self.parameter(Parameter::new(name, ParameterKind::CallOptions))
    }

    pub fn return_component(mut self, component: ReturnComponent) -> Self {
        self.returns.push(component);
        self
    }

    /// A single return value named `result`.
    pub fn returns<T: ContractType>(self) -> Self {
        self.returns_value::<T>("result")
    }

    /// A named return value; several of them form a tuple.
    pub fn returns_value<T: ContractType>(self, name: impl Into<String>) -> Self {
        self.return_component(ReturnComponent::Value {
            name: name.into(),
            ty: T::type_descriptor(),
        })
    }

    pub fn returns_stream<T: ContractType>(self) -> Self {
        self.return_component(ReturnComponent::Stream(T::type_descriptor()))
    }

    pub fn generic_argument(mut self, ty: TypeDescriptor) -> Self {
        self.generic_arguments.push(ty);
        self
    }

    /// Marks the method as a blocking (non-async) call. Clients then only call it through
    /// `ContractClient::invoke_blocking`; servers are unaffected.
    pub fn blocking(mut self) -> Self {
        self.is_async = false;
        self
    }

    pub fn with_marshaller_factory(mut self, factory: Arc<dyn MarshallerFactory>) -> Self {
        self.options.marshaller_factory = Some(factory);
        self
    }

    pub fn with_filter(mut self, order: i32, filter: impl Filter + 'static) -> Self {
        self.options.filters.add(order, filter);
        self
    }

    /// Backs the request message with a compiled tuple accessor instead of the reflective one.
    pub fn compiled_request<T: TupleMessage>(mut self) -> Self {
        self.options.request_accessor = Some(AccessorFactory::tuple::<T>());
        self
    }

    /// Backs the response message with a compiled tuple accessor instead of the reflective one.
    pub fn compiled_response<T: TupleMessage>(mut self) -> Self {
        self.options.response_accessor = Some(AccessorFactory::tuple::<T>());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generic_arguments(&self) -> &[TypeDescriptor] {
        &self.generic_arguments
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn return_components(&self) -> &[ReturnComponent] {
        &self.returns
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn options(&self) -> &OperationOptions {
        &self.options
    }

    /// Identity used to detect re-declared operations across inherited contracts.
    ///
    /// Parameter names do not take part, only the method name, its generic arguments and
    /// the parameter kinds.
    pub(crate) fn signature_key(&self) -> SignatureKey {
        SignatureKey {
            name: self.name.clone(),
            generic_arguments: self.generic_arguments.clone(),
            parameters: self.parameters.iter().map(|p| p.kind.clone()).collect(),
        }
    }

    /// Human readable signature, e.g. `Sum(x: Int32, y: Int32) -> Int32`.
    pub fn display_signature(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|p| {
                let ty = match &p.kind {
                    ParameterKind::Value(ty) => ty.type_name(),
                    ParameterKind::Stream(ty) => format!("Stream<{ty}>"),
                    ParameterKind::Cancellation => "CancellationToken".to_string(),
                    ParameterKind::CallOptions => "CallOptions".to_string(),
                };
                format!("{}: {ty}", p.name)
            })
            .collect::<Vec<_>>()
            .join(", ");

        let returns = self
            .returns
            .iter()
            .map(|c| match c {
                ReturnComponent::Value { ty, .. } => ty.type_name(),
                ReturnComponent::Stream(ty) => format!("Stream<{ty}>"),
            })
            .collect::<Vec<_>>();

        let returns = match returns.len() {
            0 => "()".to_string(),
            1 => returns[0].clone(),
            _ => format!("({})", returns.join(", ")),
        };

        format!(
            "{}({params}) -> {returns}",
            generic_name(&self.name, &self.generic_arguments)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SignatureKey {
    name: String,
    generic_arguments: Vec<TypeDescriptor>,
    parameters: Vec<ParameterKind>,
}
