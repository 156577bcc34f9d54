//! # Message Shapes
//!
//! Every operation exchanges two synthesized messages: the request message (its header
//! parameters) and the response message (its non-stream return components). A
//! [`MessageShape`] is the ordered list of `(name, type)` slots of one such message; the slot
//! order mirrors declaration order and is part of the wire contract.
//!
//! ## Accessors
//!
//! A [`MessageAccessor`] gives positional get/set access to an instance of a shape without any
//! per-contract code. Two implementations satisfy the same contract:
//!
//! * **[`RecordAccessor`]**: derived at runtime from the shape, stores values in a [`RecordMessage`].
//! * **[`TupleAccessor`]**: compiled, backed by a plain Rust tuple such as `(i32, String)`.
//!
//! The rest of the crate only sees `Arc<dyn MessageAccessor>` and never knows which one backs a
//! descriptor.
mod record;
mod tuple;

pub use record::{RecordAccessor, RecordMessage};
pub use tuple::{TupleAccessor, TupleMessage};
pub(crate) use tuple::decode_slot;

use crate::{
    call::{CallError, ItemStream},
    types::{ContractType, StructDescriptor, TypeDescriptor, TypeMismatch},
};
use futures_util::StreamExt;
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// Errors raised while reading or writing message slots.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccessError {
    #[error("Slot index {index} is out of range for a message with {len} slots")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Message has no slot named '{0}'")]
    UnknownName(String),
    #[error("Slot {index} rejected its value: {source}")]
    TypeMismatch {
        index: usize,
        #[source]
        source: TypeMismatch,
    },
    #[error("Slot {index} could not be converted: {message}")]
    Conversion { index: usize, message: String },
    #[error("The accessor was given a message instance of another shape")]
    WrongMessage,
    #[error("Expected a message object, found '{0}'")]
    NotAnObject(String),
}

/// One slot of a message shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Slot {
    name: String,
    ty: TypeDescriptor,
}

impl Slot {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }
}

/// The ordered slots of one direction of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageShape {
    name: String,
    slots: Vec<Slot>,
}

impl MessageShape {
    pub fn new(name: impl Into<String>, slots: Vec<Slot>) -> Self {
        Self {
            name: name.into(),
            slots,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.name.clone()).collect()
    }

    pub fn types(&self) -> Vec<TypeDescriptor> {
        self.slots.iter().map(|s| s.ty.clone()).collect()
    }

    /// The struct type marshallers use for this message. Field order is slot order.
    pub fn to_type(&self) -> TypeDescriptor {
        self.slots
            .iter()
            .fold(StructDescriptor::new(&self.name), |s, slot| {
                s.field(&slot.name, slot.ty.clone())
            })
            .into_type()
    }

    /// The reflective accessor for this shape.
    pub fn record_accessor(&self) -> Arc<dyn MessageAccessor> {
        Arc::new(RecordAccessor::new(self))
    }
}

/// Positional access to instances of one message shape.
///
/// Indices are in `[0, names().len())` and stable for the lifetime of the accessor.
/// Implementations must be reentrant across distinct message instances.
pub trait MessageAccessor: Send + Sync + Debug {
    /// Slot names, for diagnostics and for the JSON object form of a message.
    fn names(&self) -> &[String];

    /// A fresh instance where every slot holds its type's default.
    fn create_new(&self) -> Box<dyn Any + Send>;

    fn get_value(&self, message: &(dyn Any + Send), index: usize) -> Result<Value, AccessError>;

    fn set_value(
        &self,
        message: &mut (dyn Any + Send),
        index: usize,
        value: Value,
    ) -> Result<(), AccessError>;

    /// The JSON object form of `message`, keyed by slot name.
    fn to_value(&self, message: &(dyn Any + Send)) -> Result<Value, AccessError> {
        let mut object = Map::new();
        for (index, name) in self.names().iter().enumerate() {
            object.insert(name.clone(), self.get_value(message, index)?);
        }
        Ok(Value::Object(object))
    }

    /// Builds an instance from its JSON object form. Missing slots keep their default.
    fn from_value(&self, value: Value) -> Result<Box<dyn Any + Send>, AccessError> {
        let mut message = self.create_new();
        let mut object = match value {
            Value::Object(object) => object,
            Value::Null => Map::new(),
            other => return Err(AccessError::NotAnObject(other.to_string())),
        };

        for (index, name) in self.names().iter().enumerate() {
            if let Some(v) = object.remove(name) {
                self.set_value(message.as_mut(), index, v)?;
            }
        }

        Ok(message)
    }
}

/// Ordered, named header values of one call direction.
///
/// This is what filters see: the request header parameters by parameter name, or the
/// response header values by return component name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Headers {
    names: Arc<[String]>,
    values: Vec<Value>,
}

impl Headers {
    pub(crate) fn new(names: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { names, values }
    }

    /// Headers with every slot set to `null`.
    pub(crate) fn empty_for(names: Arc<[String]>) -> Self {
        let values = vec![Value::Null; names.len()];
        Self { names, values }
    }

    /// Writes positional `values` into a new message, type-checking each one, and reads the
    /// canonical values back.
    pub(crate) fn from_values(
        accessor: &dyn MessageAccessor,
        names: Arc<[String]>,
        values: Vec<Value>,
    ) -> Result<Self, AccessError> {
        let mut message = accessor.create_new();
        for (index, value) in values.into_iter().enumerate() {
            accessor.set_value(message.as_mut(), index, value)?;
        }
        let values = (0..accessor.names().len())
            .map(|index| accessor.get_value(message.as_ref(), index))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { names, values })
    }

    /// Reads every slot of `value` through `accessor`.
    pub(crate) fn from_message(
        accessor: &dyn MessageAccessor,
        names: Arc<[String]>,
        value: Value,
    ) -> Result<Self, AccessError> {
        let message = accessor.from_value(value)?;
        let values = (0..accessor.names().len())
            .map(|index| accessor.get_value(message.as_ref(), index))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { names, values })
    }

    /// Writes every slot into a new message and returns its JSON object form.
    pub(crate) fn to_message(&self, accessor: &dyn MessageAccessor) -> Result<Value, AccessError> {
        let mut message = accessor.create_new();
        for (index, value) in self.values.iter().enumerate() {
            accessor.set_value(message.as_mut(), index, value.clone())?;
        }
        accessor.to_value(message.as_ref())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.names.iter().map(String::as_str).zip(self.values.iter())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.position(name).map(|index| &self.values[index])
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Replaces the value of the header called `name`.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), AccessError> {
        let index = self
            .position(name)
            .ok_or_else(|| AccessError::UnknownName(name.to_string()))?;
        self.values[index] = value.into();
        Ok(())
    }

    pub fn set_index(&mut self, index: usize, value: impl Into<Value>) -> Result<(), AccessError> {
        let len = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or(AccessError::IndexOutOfRange { index, len })?;
        *slot = value.into();
        Ok(())
    }

    /// Deserializes the header called `name` into `T`.
    pub fn decode<T: ContractType>(&self, name: &str) -> Result<T, AccessError> {
        let index = self
            .position(name)
            .ok_or_else(|| AccessError::UnknownName(name.to_string()))?;
        decode_slot(index, self.values[index].clone())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// The per-item side of a streaming parameter or return component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamAccessor {
    item: TypeDescriptor,
}

impl StreamAccessor {
    pub fn new(item: TypeDescriptor) -> Self {
        Self { item }
    }

    pub fn item_type(&self) -> &TypeDescriptor {
        &self.item
    }

    /// Type-checks every item of `items`; the first mismatch ends the stream with an error.
    pub fn normalize_items(&self, items: ItemStream) -> ItemStream {
        let item = self.item.clone();
        items
            .scan(false, move |failed, next| {
                if *failed {
                    return std::future::ready(None);
                }
                let next = next.and_then(|value| {
                    item.normalize(value).map_err(|source| {
                        CallError::Access(AccessError::TypeMismatch { index: 0, source })
                    })
                });
                *failed = next.is_err();
                std::future::ready(Some(next))
            })
            .boxed()
    }
}
