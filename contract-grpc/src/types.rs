//! # Contract Types
//!
//! Runtime type information for every value that crosses a contract boundary.
//!
//! A [`TypeDescriptor`] plays the role that interface metadata plays in reflective runtimes:
//! it tells the message shape synthesizer which slots exist, tells marshallers how to lay
//! values out on the wire and tells the fault pipeline which type tag a detail carries.
//!
//! Values themselves are dynamic `serde_json::Value`s. A descriptor can [normalize](TypeDescriptor::normalize)
//! a value: type-check it, replace `null` by the type's default and fill missing struct fields.
//!
//! Rust types opt in through [`ContractType`], which is implemented for the primitives,
//! `String` and `Vec<T>`. User structs implement it by hand:
//!
//! ```rust
//! use contract_grpc::types::{ContractType, StructDescriptor, TypeDescriptor};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Default)]
//! struct Person {
//!     name: String,
//!     age: i32,
//! }
//!
//! impl ContractType for Person {
//!     fn type_descriptor() -> TypeDescriptor {
//!         StructDescriptor::new("Person")
//!             .field_of::<String>("name")
//!             .field_of::<i32>("age")
//!             .into_type()
//!     }
//! }
//! ```
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// A value did not match the type it was checked against.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Value '{value}' does not match type '{expected}'")]
pub struct TypeMismatch {
    pub expected: String,
    pub value: String,
}

impl TypeMismatch {
    fn new(expected: &TypeDescriptor, value: &Value) -> Self {
        Self {
            expected: expected.type_name(),
            value: value.to_string(),
        }
    }
}

/// Describes the shape of a value exchanged by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Bool,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float,
    Double,
    String,
    List(Box<TypeDescriptor>),
    Struct(Arc<StructDescriptor>),
}

/// A named record with ordered fields.
///
/// Field order is part of the wire contract: marshallers number fields by position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructDescriptor {
    name: String,
    fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDescriptor {
    name: String,
    ty: TypeDescriptor,
}

impl FieldDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }
}

impl StructDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Appends a field with an explicit descriptor.
    pub fn field(mut self, name: impl Into<String>, ty: TypeDescriptor) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            ty,
        });
        self
    }

    /// Appends a field whose descriptor comes from a [`ContractType`].
    pub fn field_of<T: ContractType>(self, name: impl Into<String>) -> Self {
        self.field(name, T::type_descriptor())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn into_type(self) -> TypeDescriptor {
        TypeDescriptor::Struct(Arc::new(self))
    }
}

impl TypeDescriptor {
    /// Shorthand for `T::type_descriptor()`.
    pub fn of<T: ContractType>() -> Self {
        T::type_descriptor()
    }

    pub fn list(item: TypeDescriptor) -> Self {
        TypeDescriptor::List(Box::new(item))
    }

    /// The stable name of this type, used for diagnostics, generic operation names
    /// and as the default fault type tag.
    pub fn type_name(&self) -> String {
        match self {
            TypeDescriptor::Bool => "Boolean".to_string(),
            TypeDescriptor::Int32 => "Int32".to_string(),
            TypeDescriptor::Int64 => "Int64".to_string(),
            TypeDescriptor::UInt32 => "UInt32".to_string(),
            TypeDescriptor::UInt64 => "UInt64".to_string(),
            TypeDescriptor::Float => "Single".to_string(),
            TypeDescriptor::Double => "Double".to_string(),
            TypeDescriptor::String => "String".to_string(),
            TypeDescriptor::List(item) => format!("ListOf{}", item.type_name()),
            TypeDescriptor::Struct(s) => s.name.clone(),
        }
    }

    pub fn as_struct(&self) -> Option<&StructDescriptor> {
        match self {
            TypeDescriptor::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// The value a `null` of this type is replaced with.
    pub fn default_value(&self) -> Value {
        match self {
            TypeDescriptor::Bool => Value::Bool(false),
            TypeDescriptor::Int32
            | TypeDescriptor::Int64
            | TypeDescriptor::UInt32
            | TypeDescriptor::UInt64 => Value::from(0),
            TypeDescriptor::Float | TypeDescriptor::Double => Value::from(0.0),
            TypeDescriptor::String => Value::String(String::new()),
            TypeDescriptor::List(_) => Value::Array(Vec::new()),
            TypeDescriptor::Struct(s) => Value::Object(
                s.fields
                    .iter()
                    .map(|f| (f.name.clone(), f.ty.default_value()))
                    .collect(),
            ),
        }
    }

    /// Checks `value` against this type and returns its canonical form.
    ///
    /// `null` becomes [`default_value`](Self::default_value), integers are range checked,
    /// struct values keep exactly the declared fields.
    pub fn normalize(&self, value: Value) -> Result<Value, TypeMismatch> {
        if value.is_null() {
            return Ok(self.default_value());
        }

        let mismatch = |value: &Value| TypeMismatch::new(self, value);

        match self {
            TypeDescriptor::Bool => match value {
                Value::Bool(_) => Ok(value),
                other => Err(mismatch(&other)),
            },
            TypeDescriptor::Int32 => value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Value::from)
                .ok_or_else(|| mismatch(&value)),
            TypeDescriptor::Int64 => value.as_i64().map(Value::from).ok_or_else(|| mismatch(&value)),
            TypeDescriptor::UInt32 => value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(Value::from)
                .ok_or_else(|| mismatch(&value)),
            TypeDescriptor::UInt64 => value.as_u64().map(Value::from).ok_or_else(|| mismatch(&value)),
            TypeDescriptor::Float => value
                .as_f64()
                .map(|v| v as f32)
                // JSON numbers are finite, so an infinite `f32` means the value is out of range.
                .filter(|v| v.is_finite())
                .map(Value::from)
                .ok_or_else(|| mismatch(&value)),
            TypeDescriptor::Double => value.as_f64().map(Value::from).ok_or_else(|| mismatch(&value)),
            TypeDescriptor::String => match value {
                Value::String(_) => Ok(value),
                other => Err(mismatch(&other)),
            },
            TypeDescriptor::List(item) => match value {
                Value::Array(items) => items
                    .into_iter()
                    .map(|v| item.normalize(v))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                other => Err(mismatch(&other)),
            },
            TypeDescriptor::Struct(s) => match value {
                Value::Object(mut object) => {
                    let mut normalized = Map::new();
                    for field in &s.fields {
                        let v = object.remove(&field.name).unwrap_or(Value::Null);
                        normalized.insert(field.name.clone(), field.ty.normalize(v)?);
                    }
                    Ok(Value::Object(normalized))
                }
                other => Err(mismatch(&other)),
            },
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name())
    }
}

/// A Rust type that can travel through a contract.
pub trait ContractType: Serialize + DeserializeOwned + Send + 'static {
    fn type_descriptor() -> TypeDescriptor;
}

macro_rules! primitive_contract_type {
    ($($ty:ty => $descriptor:ident),* $(,)?) => {
        $(
            impl ContractType for $ty {
                fn type_descriptor() -> TypeDescriptor {
                    TypeDescriptor::$descriptor
                }
            }
        )*
    };
}

primitive_contract_type! {
    bool => Bool,
    i32 => Int32,
    i64 => Int64,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float,
    f64 => Double,
    String => String,
}

impl<T: ContractType> ContractType for Vec<T> {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::list(T::type_descriptor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point() -> TypeDescriptor {
        StructDescriptor::new("Point")
            .field_of::<i32>("x")
            .field_of::<i32>("y")
            .into_type()
    }

    #[test]
    fn test_null_normalizes_to_default() {
        assert_eq!(TypeDescriptor::Int32.normalize(Value::Null).unwrap(), json!(0));
        assert_eq!(TypeDescriptor::String.normalize(Value::Null).unwrap(), json!(""));
        assert_eq!(
            point().normalize(Value::Null).unwrap(),
            json!({ "x": 0, "y": 0 })
        );
    }

    #[test]
    fn test_struct_normalization_fills_and_drops_fields() {
        let value = point().normalize(json!({ "x": 4, "z": true })).unwrap();
        assert_eq!(value, json!({ "x": 4, "y": 0 }));
    }

    #[test]
    fn test_range_checks() {
        assert!(TypeDescriptor::Int32.normalize(json!(i64::MAX)).is_err());
        assert!(TypeDescriptor::UInt32.normalize(json!(-1)).is_err());
        assert!(TypeDescriptor::Bool.normalize(json!("yes")).is_err());
        assert_eq!(TypeDescriptor::Int64.normalize(json!(i64::MAX)).unwrap(), json!(i64::MAX));
    }

    #[test]
    fn test_float_out_of_range_is_rejected() {
        assert!(TypeDescriptor::Float.normalize(json!(1e300)).is_err());
        assert!(TypeDescriptor::Float.normalize(json!(-1e300)).is_err());
        assert_eq!(TypeDescriptor::Float.normalize(json!(0.5)).unwrap(), json!(0.5));
        assert_eq!(TypeDescriptor::Double.normalize(json!(1e300)).unwrap(), json!(1e300));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(TypeDescriptor::of::<Vec<f64>>().type_name(), "ListOfDouble");
        assert_eq!(TypeDescriptor::of::<f32>().type_name(), "Single");
        assert_eq!(point().type_name(), "Point");
    }
}
