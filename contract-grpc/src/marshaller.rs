//! # Marshallers
//!
//! A [`Marshaller`] turns one value of one [`TypeDescriptor`] into bytes and back. Message
//! shapes, stream items and fault details all go through a marshaller; the dispatcher never
//! looks at a payload otherwise.
//!
//! Marshallers are produced by a [`MarshallerFactory`]. The factory in effect for an operation
//! is chosen by precedence: the operation's own factory, then the service's, then the global
//! one and finally the built-in [`ProtobufMarshallerFactory`] (see [`resolve_factory`]).
mod json;
mod protobuf;

pub use json::{JsonMarshaller, JsonMarshallerFactory};
pub use protobuf::{ProtobufMarshaller, ProtobufMarshallerFactory};

use crate::{
    grpc::codec::MarshallerCodec,
    reflection::OperationDescriptor,
    types::{ContractType, TypeDescriptor, TypeMismatch},
};
use bytes::Bytes;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarshalError {
    #[error("Type '{0}' cannot be marshalled: {1}")]
    Unsupported(String, String),
    #[error("Failed to build a schema for '{ty}': {message}")]
    Descriptor { ty: String, message: String },
    #[error("Failed to encode a value of type '{ty}': {message}")]
    Encode { ty: String, message: String },
    #[error("Failed to decode a value of type '{ty}': {message}")]
    Decode { ty: String, message: String },
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatch),
}

/// Serializes values of a single type.
///
/// `deserialize(serialize(v))` yields the normalized form of `v`: a `null` comes back as the
/// type's default value.
pub trait Marshaller: Send + Sync + Debug {
    fn ty(&self) -> &TypeDescriptor;

    fn serialize(&self, value: &Value) -> Result<Bytes, MarshalError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, MarshalError>;
}

/// Produces marshallers. Must be deterministic: equal descriptors yield marshallers that
/// produce identical bytes.
pub trait MarshallerFactory: Send + Sync + Debug {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn create_marshaller(&self, ty: &TypeDescriptor) -> Result<Arc<dyn Marshaller>, MarshalError>;
}

static DEFAULT_FACTORY: Lazy<Arc<dyn MarshallerFactory>> =
    Lazy::new(|| Arc::new(ProtobufMarshallerFactory::new()));

/// The built-in factory, shared process wide.
pub fn default_factory() -> Arc<dyn MarshallerFactory> {
    DEFAULT_FACTORY.clone()
}

/// Picks the factory in effect: operation, then service, then global, then the default.
pub fn resolve_factory(
    operation: Option<&Arc<dyn MarshallerFactory>>,
    service: Option<&Arc<dyn MarshallerFactory>>,
    global: Option<&Arc<dyn MarshallerFactory>>,
) -> Arc<dyn MarshallerFactory> {
    operation
        .or(service)
        .or(global)
        .cloned()
        .unwrap_or_else(default_factory)
}

/// A marshaller bound to a Rust type.
#[derive(Debug)]
pub struct TypedMarshaller<T> {
    inner: Arc<dyn Marshaller>,
    _ty: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedMarshaller<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _ty: PhantomData,
        }
    }
}

impl<T: ContractType> TypedMarshaller<T> {
    pub fn new(factory: &dyn MarshallerFactory) -> Result<Self, MarshalError> {
        Ok(Self {
            inner: factory.create_marshaller(&T::type_descriptor())?,
            _ty: PhantomData,
        })
    }

    pub fn serialize(&self, value: &T) -> Result<Bytes, MarshalError> {
        let value = serde_json::to_value(value).map_err(|e| MarshalError::Encode {
            ty: self.inner.ty().type_name(),
            message: e.to_string(),
        })?;
        self.inner.serialize(&value)
    }

    pub fn deserialize(&self, bytes: &[u8]) -> Result<T, MarshalError> {
        let value = self.inner.deserialize(bytes)?;
        serde_json::from_value(value).map_err(|e| MarshalError::Decode {
            ty: self.inner.ty().type_name(),
            message: e.to_string(),
        })
    }
}

/// Every marshaller one operation needs, built once when the operation is bound.
#[derive(Debug, Clone)]
pub(crate) struct OperationMarshallers {
    pub factory: Arc<dyn MarshallerFactory>,
    pub request: Arc<dyn Marshaller>,
    pub request_item: Option<Arc<dyn Marshaller>>,
    pub response: Arc<dyn Marshaller>,
    pub response_item: Option<Arc<dyn Marshaller>>,
}

impl OperationMarshallers {
    pub fn new(
        operation: &OperationDescriptor,
        factory: Arc<dyn MarshallerFactory>,
    ) -> Result<Self, MarshalError> {
        let request = factory.create_marshaller(&operation.request().to_type())?;
        let response = factory.create_marshaller(&operation.response().to_type())?;
        let request_item = operation
            .request_stream()
            .map(|s| factory.create_marshaller(s.item_type()))
            .transpose()?;
        let response_item = operation
            .response_stream()
            .map(|s| factory.create_marshaller(s.item_type()))
            .transpose()?;

        Ok(Self {
            factory,
            request,
            request_item,
            response,
            response_item,
        })
    }

    /// What travels as gRPC request messages: stream items, or the header message.
    fn outbound(&self) -> Arc<dyn Marshaller> {
        self.request_item.clone().unwrap_or_else(|| self.request.clone())
    }

    /// What travels as gRPC response messages: stream items, or the response message.
    fn inbound(&self) -> Arc<dyn Marshaller> {
        self.response_item
            .clone()
            .unwrap_or_else(|| self.response.clone())
    }

    pub fn client_codec(&self) -> MarshallerCodec {
        MarshallerCodec::new(self.outbound(), self.inbound())
    }

    pub fn server_codec(&self) -> MarshallerCodec {
        MarshallerCodec::new(self.inbound(), self.outbound())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StructDescriptor;
    use serde_json::json;

    fn address() -> TypeDescriptor {
        StructDescriptor::new("Address")
            .field_of::<String>("street")
            .field_of::<u32>("number")
            .into_type()
    }

    fn person() -> TypeDescriptor {
        StructDescriptor::new("Person")
            .field_of::<String>("name")
            .field_of::<i64>("id")
            .field_of::<bool>("active")
            .field_of::<f64>("score")
            .field("home", address())
            .field("previous", TypeDescriptor::list(address()))
            .field_of::<Vec<i32>>("lucky")
            .into_type()
    }

    fn factories() -> Vec<Arc<dyn MarshallerFactory>> {
        vec![
            Arc::new(ProtobufMarshallerFactory::new()),
            Arc::new(JsonMarshallerFactory),
        ]
    }

    #[test]
    fn test_round_trip_nested_struct() {
        let value = json!({
            "name": "Ada",
            "id": 9_007_199_254_740_993i64,
            "active": true,
            "score": 1.5,
            "home": { "street": "Main", "number": 7 },
            "previous": [{ "street": "Old", "number": 1 }, { "street": "", "number": 0 }],
            "lucky": [3, -5, 0]
        });

        for factory in factories() {
            let marshaller = factory.create_marshaller(&person()).unwrap();
            let bytes = marshaller.serialize(&value).unwrap();
            assert_eq!(marshaller.deserialize(&bytes).unwrap(), value, "{}", factory.name());
        }
    }

    #[test]
    fn test_nulls_come_back_as_defaults() {
        let expected = json!({
            "name": "",
            "id": 0,
            "active": false,
            "score": 0.0,
            "home": { "street": "", "number": 0 },
            "previous": [],
            "lucky": []
        });

        for factory in factories() {
            let marshaller = factory.create_marshaller(&person()).unwrap();
            let bytes = marshaller.serialize(&json!({ "home": null })).unwrap();
            assert_eq!(
                marshaller.deserialize(&bytes).unwrap(),
                expected,
                "{}",
                factory.name()
            );
        }
    }

    #[test]
    fn test_round_trip_primitives() {
        let cases = [
            (TypeDescriptor::Int32, json!(-42)),
            (TypeDescriptor::UInt64, json!(u64::MAX)),
            (TypeDescriptor::String, json!("héllo")),
            (TypeDescriptor::Bool, json!(true)),
            (TypeDescriptor::list(TypeDescriptor::Double), json!([0.5, -2.25])),
        ];

        for factory in factories() {
            for (ty, value) in &cases {
                let marshaller = factory.create_marshaller(ty).unwrap();
                let bytes = marshaller.serialize(value).unwrap();
                assert_eq!(&marshaller.deserialize(&bytes).unwrap(), value);
            }
        }
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        for factory in factories() {
            let marshaller = factory.create_marshaller(&TypeDescriptor::Int32).unwrap();
            assert!(matches!(
                marshaller.serialize(&json!("seven")),
                Err(MarshalError::TypeMismatch(_))
            ));
        }
    }

    #[test]
    fn test_independent_factories_produce_identical_bytes() {
        let value = json!({ "name": "Ada", "home": { "street": "Main", "number": 7 } });

        let a = ProtobufMarshallerFactory::new().create_marshaller(&person()).unwrap();
        let b = ProtobufMarshallerFactory::new().create_marshaller(&person()).unwrap();

        assert_eq!(a.serialize(&value).unwrap(), b.serialize(&value).unwrap());
    }

    #[test]
    fn test_lists_of_lists_are_unsupported_by_protobuf() {
        let nested = TypeDescriptor::of::<Vec<Vec<i32>>>();
        let result = ProtobufMarshallerFactory::new().create_marshaller(&nested);
        assert!(matches!(result, Err(MarshalError::Unsupported(..))));

        // JSON has no such limitation.
        let marshaller = JsonMarshallerFactory.create_marshaller(&nested).unwrap();
        let bytes = marshaller.serialize(&json!([[1], [2, 3]])).unwrap();
        assert_eq!(marshaller.deserialize(&bytes).unwrap(), json!([[1], [2, 3]]));
    }

    #[test]
    fn test_typed_marshaller() {
        let marshaller = TypedMarshaller::<Vec<String>>::new(&ProtobufMarshallerFactory::new()).unwrap();
        let value = vec!["a".to_string(), "b".to_string()];
        let bytes = marshaller.serialize(&value).unwrap();
        assert_eq!(marshaller.deserialize(&bytes).unwrap(), value);
    }

    #[test]
    fn test_factory_precedence() {
        let operation: Arc<dyn MarshallerFactory> = Arc::new(JsonMarshallerFactory);
        let service: Arc<dyn MarshallerFactory> = Arc::new(ProtobufMarshallerFactory::new());

        assert_eq!(resolve_factory(Some(&operation), Some(&service), None).name(), "json");
        assert_eq!(resolve_factory(None, Some(&service), Some(&operation)).name(), "protobuf");
        assert_eq!(resolve_factory(None, None, Some(&operation)).name(), "json");
        assert_eq!(resolve_factory(None, None, None).name(), "protobuf");
    }
}
