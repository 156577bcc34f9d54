//! # Typed Faults
//!
//! Application errors cross the wire as a typed *fault detail*: a value plus its
//! [`TypeDescriptor`]. The server side turns a handler error into a detail through its
//! [`ServerErrorHandlers`]; the detail is marshalled with the operation's marshaller factory and
//! sent as a failed status carrying two metadata entries:
//!
//! * `x-contract-fault-type`: the type tag, produced by a [`FaultTypeResolver`].
//! * `x-contract-fault-detail-bin`: the marshalled value.
//!
//! The client reverses the process and offers the detail to its [`ClientErrorHandlers`], which
//! may turn it into an application error. A tag the client cannot resolve, or a payload it cannot
//! decode, is not an error: the call simply fails with the original status.
use crate::{
    BoxError,
    call::CallError,
    grpc::metadata::{self, FAULT_DETAIL_KEY, FAULT_TYPE_KEY},
    marshaller::{MarshalError, MarshallerFactory},
    reflection::OperationDescriptor,
    types::{ContractType, TypeDescriptor},
};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tonic::{Code, Status, metadata::MetadataMap};

/// Message of statuses produced from unhandled application errors.
pub const GENERIC_ERROR_MESSAGE: &str = "Exception was thrown by handler.";

/// A typed error payload.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultDetail {
    ty: TypeDescriptor,
    value: Value,
}

impl FaultDetail {
    pub fn new<T: ContractType>(detail: &T) -> Result<Self, MarshalError> {
        let value = serde_json::to_value(detail).map_err(|e| MarshalError::Encode {
            ty: T::type_descriptor().type_name(),
            message: e.to_string(),
        })?;
        Ok(Self {
            ty: T::type_descriptor(),
            value,
        })
    }

    pub fn from_value(ty: TypeDescriptor, value: Value) -> Self {
        Self { ty, value }
    }

    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is<T: ContractType>(&self) -> bool {
        self.ty == T::type_descriptor()
    }

    /// The detail as a `T`, or `None` when it carries another type.
    pub fn decode<T: ContractType>(&self) -> Option<T> {
        if !self.is::<T>() {
            return None;
        }
        serde_json::from_value(self.value.clone()).ok()
    }
}

/// What a server error handler produces.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerFaultDetail {
    pub detail: FaultDetail,
    /// Status message. Defaults to the display of the handled error.
    pub message: Option<String>,
}

impl ServerFaultDetail {
    pub fn new(detail: FaultDetail) -> Self {
        Self {
            detail,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// What a client error handler is offered.
#[derive(Debug, Clone)]
pub struct ClientFaultDetail {
    pub detail: FaultDetail,
    pub original_error: Status,
}

/// Maps fault detail types to wire tags and back.
pub trait FaultTypeResolver: Send + Sync + Debug {
    fn serialize_detail_type(&self, ty: &TypeDescriptor) -> Option<String>;

    fn deserialize_detail_type(&self, tag: &str) -> Option<TypeDescriptor>;
}

/// Resolver backed by explicit registrations. Tags default to the type name.
///
/// The primitive types and `String` are registered up front.
#[derive(Debug, Clone)]
pub struct FaultTypeRegistry {
    by_tag: HashMap<String, TypeDescriptor>,
    by_type: HashMap<TypeDescriptor, String>,
}

impl Default for FaultTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultTypeRegistry {
    pub fn new() -> Self {
        Self {
            by_tag: HashMap::new(),
            by_type: HashMap::new(),
        }
        .register::<bool>()
        .register::<i32>()
        .register::<i64>()
        .register::<u32>()
        .register::<u64>()
        .register::<f32>()
        .register::<f64>()
        .register::<String>()
    }

    pub fn register<T: ContractType>(self) -> Self {
        let ty = T::type_descriptor();
        let tag = ty.type_name();
        self.register_as(tag, ty)
    }

    pub fn register_as(mut self, tag: impl Into<String>, ty: TypeDescriptor) -> Self {
        let tag = tag.into();
        self.by_tag.insert(tag.clone(), ty.clone());
        self.by_type.insert(ty, tag);
        self
    }
}

impl FaultTypeResolver for FaultTypeRegistry {
    fn serialize_detail_type(&self, ty: &TypeDescriptor) -> Option<String> {
        Some(
            self.by_type
                .get(ty)
                .cloned()
                .unwrap_or_else(|| ty.type_name()),
        )
    }

    fn deserialize_detail_type(&self, tag: &str) -> Option<TypeDescriptor> {
        self.by_tag.get(tag).cloned()
    }
}

/// Turns a handler error into a typed fault, or declines with `None`.
pub trait ServerErrorHandler: Send + Sync {
    fn provide_fault(
        &self,
        operation: &OperationDescriptor,
        error: &(dyn Error + Send + Sync + 'static),
    ) -> Option<ServerFaultDetail>;
}

struct FnServerErrorHandler<F>(F);

impl<F> ServerErrorHandler for FnServerErrorHandler<F>
where
    F: Fn(&OperationDescriptor, &(dyn Error + Send + Sync + 'static)) -> Option<ServerFaultDetail>
        + Send
        + Sync,
{
    fn provide_fault(
        &self,
        operation: &OperationDescriptor,
        error: &(dyn Error + Send + Sync + 'static),
    ) -> Option<ServerFaultDetail> {
        (self.0)(operation, error)
    }
}

/// Ordered server error handlers; the first one returning a fault wins.
#[derive(Clone, Default)]
pub struct ServerErrorHandlers {
    handlers: Vec<Arc<dyn ServerErrorHandler>>,
}

impl ServerErrorHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, handler: impl ServerErrorHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn add_fn<F>(self, handler: F) -> Self
    where
        F: Fn(&OperationDescriptor, &(dyn Error + Send + Sync + 'static)) -> Option<ServerFaultDetail>
            + Send
            + Sync
            + 'static,
    {
        self.add(FnServerErrorHandler(handler))
    }

    /// This list followed by `other`.
    pub(crate) fn chain(&self, other: &ServerErrorHandlers) -> ServerErrorHandlers {
        ServerErrorHandlers {
            handlers: self.handlers.iter().chain(&other.handlers).cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn provide_fault(
        &self,
        operation: &OperationDescriptor,
        error: &(dyn Error + Send + Sync + 'static),
    ) -> Option<ServerFaultDetail> {
        self.handlers
            .iter()
            .find_map(|handler| handler.provide_fault(operation, error))
    }
}

impl Debug for ServerErrorHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerErrorHandlers")
            .field("len", &self.handlers.len())
            .finish()
    }
}

/// Turns a received fault into an application error by returning `Err`.
pub trait ClientErrorHandler: Send + Sync {
    fn throw_on_fault(
        &self,
        operation: &OperationDescriptor,
        fault: &ClientFaultDetail,
    ) -> Result<(), BoxError>;
}

struct FnClientErrorHandler<F>(F);

impl<F> ClientErrorHandler for FnClientErrorHandler<F>
where
    F: Fn(&OperationDescriptor, &ClientFaultDetail) -> Result<(), BoxError> + Send + Sync,
{
    fn throw_on_fault(
        &self,
        operation: &OperationDescriptor,
        fault: &ClientFaultDetail,
    ) -> Result<(), BoxError> {
        (self.0)(operation, fault)
    }
}

/// Ordered client error handlers; the first `Err` wins.
#[derive(Clone, Default)]
pub struct ClientErrorHandlers {
    handlers: Vec<Arc<dyn ClientErrorHandler>>,
}

impl ClientErrorHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, handler: impl ClientErrorHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn add_fn<F>(self, handler: F) -> Self
    where
        F: Fn(&OperationDescriptor, &ClientFaultDetail) -> Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.add(FnClientErrorHandler(handler))
    }

    pub(crate) fn chain(&self, other: &ClientErrorHandlers) -> ClientErrorHandlers {
        ClientErrorHandlers {
            handlers: self.handlers.iter().chain(&other.handlers).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn throw_on_fault(
        &self,
        operation: &OperationDescriptor,
        fault: &ClientFaultDetail,
    ) -> Result<(), BoxError> {
        self.handlers
            .iter()
            .try_for_each(|handler| handler.throw_on_fault(operation, fault))
    }
}

impl Debug for ClientErrorHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientErrorHandlers")
            .field("len", &self.handlers.len())
            .finish()
    }
}

/// Builds the failed status carrying `fault`.
///
/// Returns `None` when the detail cannot be tagged or marshalled; the caller then falls back to
/// an untyped status.
pub(crate) fn fault_to_status(
    fault: &ServerFaultDetail,
    error: &(dyn Error + Send + Sync + 'static),
    factory: &dyn MarshallerFactory,
    resolver: &dyn FaultTypeResolver,
) -> Option<Status> {
    let ty = fault.detail.ty();

    let Some(tag) = resolver.serialize_detail_type(ty) else {
        tracing::warn!(fault_type = %ty, "No type tag for fault detail");
        return None;
    };

    let bytes = match factory
        .create_marshaller(ty)
        .and_then(|m| m.serialize(fault.detail.value()))
    {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(fault_type = %ty, error = %e, "Failed to marshal fault detail");
            return None;
        }
    };

    let mut metadata = MetadataMap::new();
    if let Err(e) = metadata::insert_ascii(&mut metadata, FAULT_TYPE_KEY, &tag) {
        tracing::warn!(%tag, error = %e, "Fault type tag is not valid metadata");
        return None;
    }
    metadata::insert_binary(&mut metadata, FAULT_DETAIL_KEY, &bytes);

    let message = fault.message.clone().unwrap_or_else(|| error.to_string());
    Some(Status::with_metadata(Code::Internal, message, metadata))
}

/// Reads the fault detail of a failed status, if it carries one this side understands.
pub(crate) fn fault_from_status(
    status: &Status,
    factory: &dyn MarshallerFactory,
    resolver: &dyn FaultTypeResolver,
) -> Option<FaultDetail> {
    let tag = metadata::get_ascii(status.metadata(), FAULT_TYPE_KEY)?;

    let Some(ty) = resolver.deserialize_detail_type(tag) else {
        tracing::warn!(%tag, "Unknown fault type tag, keeping the original status");
        return None;
    };

    let bytes = match metadata::get_binary(status.metadata(), FAULT_DETAIL_KEY) {
        Some(Ok(bytes)) => bytes,
        Some(Err(e)) => {
            tracing::warn!(%tag, error = %e, "Malformed fault detail metadata");
            return None;
        }
        None => {
            tracing::warn!(%tag, "Fault type tag without a detail payload");
            return None;
        }
    };

    match factory.create_marshaller(&ty).and_then(|m| m.deserialize(&bytes)) {
        Ok(value) => Some(FaultDetail::from_value(ty, value)),
        Err(e) => {
            tracing::warn!(%tag, error = %e, "Failed to unmarshal fault detail");
            None
        }
    }
}

/// The status of an application error no handler claimed.
pub(crate) fn unhandled_error_status(error: BoxError, include_details: bool) -> Status {
    let error = match error.downcast::<Status>() {
        Ok(status) => return *status,
        Err(error) => error,
    };

    let error = match error.downcast::<CallError>() {
        Ok(call_error) => return call_error.into_status(),
        Err(error) => error,
    };

    if !include_details {
        return Status::unknown(GENERIC_ERROR_MESSAGE);
    }

    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    Status::unknown(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshaller::ProtobufMarshallerFactory;
    use crate::types::StructDescriptor;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
    struct Overdraft {
        account: String,
        missing: i64,
    }

    impl ContractType for Overdraft {
        fn type_descriptor() -> TypeDescriptor {
            StructDescriptor::new("Overdraft")
                .field_of::<String>("account")
                .field_of::<i64>("missing")
                .into_type()
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("insufficient funds")]
    struct InsufficientFunds;

    #[test]
    fn test_registry_tags() {
        let registry = FaultTypeRegistry::new()
            .register::<Overdraft>()
            .register_as("bank.Limit", TypeDescriptor::UInt32);

        assert_eq!(
            registry.serialize_detail_type(&Overdraft::type_descriptor()),
            Some("Overdraft".to_string())
        );
        assert_eq!(
            registry.deserialize_detail_type("bank.Limit"),
            Some(TypeDescriptor::UInt32)
        );
        assert_eq!(registry.deserialize_detail_type("Int32"), Some(TypeDescriptor::Int32));
        assert_eq!(registry.deserialize_detail_type("Unregistered"), None);
    }

    #[test]
    fn test_fault_status_round_trip() {
        let factory = ProtobufMarshallerFactory::new();
        let registry = FaultTypeRegistry::new().register::<Overdraft>();

        let detail = Overdraft {
            account: "ES-1".to_string(),
            missing: 250,
        };
        let fault = ServerFaultDetail::new(FaultDetail::new(&detail).unwrap());

        let status = fault_to_status(&fault, &InsufficientFunds, &factory, &registry).unwrap();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "insufficient funds");

        let decoded = fault_from_status(&status, &factory, &registry).unwrap();
        assert_eq!(decoded.decode::<Overdraft>(), Some(detail));
        assert_eq!(decoded.decode::<String>(), None);
    }

    #[test]
    fn test_unknown_tag_is_no_match() {
        let factory = ProtobufMarshallerFactory::new();
        let server = FaultTypeRegistry::new().register::<Overdraft>();
        let client = FaultTypeRegistry::new();

        let fault = ServerFaultDetail::new(FaultDetail::from_value(
            Overdraft::type_descriptor(),
            json!({ "account": "x", "missing": 1 }),
        ));
        let status = fault_to_status(&fault, &InsufficientFunds, &factory, &server).unwrap();

        assert!(fault_from_status(&status, &factory, &client).is_none());
    }

    #[test]
    fn test_unhandled_errors() {
        let status = unhandled_error_status(Box::new(InsufficientFunds), false);
        assert_eq!(status.code(), Code::Unknown);
        assert_eq!(status.message(), GENERIC_ERROR_MESSAGE);

        let status = unhandled_error_status(Box::new(InsufficientFunds), true);
        assert_eq!(status.message(), "insufficient funds");

        let status = unhandled_error_status(Box::new(Status::not_found("no account")), false);
        assert_eq!(status.code(), Code::NotFound);

        let status = unhandled_error_status(Box::new(CallError::Cancelled), false);
        assert_eq!(status.code(), Code::Cancelled);
    }
}
