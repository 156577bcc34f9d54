use super::{AccessError, MessageAccessor};
use crate::types::{ContractType, TypeDescriptor};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

/// A Rust tuple usable as the compiled storage of a message.
///
/// Implemented for tuples of up to eight [`ContractType`]s, including `()`.
pub trait TupleMessage: Default + Send + 'static {
    /// Slot types, in position order.
    fn types() -> Vec<TypeDescriptor>;

    fn get(&self, index: usize) -> Result<Value, AccessError>;

    fn set(&mut self, index: usize, value: Value) -> Result<(), AccessError>;
}

pub(crate) fn encode_slot<T: ContractType>(index: usize, value: &T) -> Result<Value, AccessError> {
    serde_json::to_value(value).map_err(|e| AccessError::Conversion {
        index,
        message: e.to_string(),
    })
}

/// Type-checks `value` against `T` (a `null` becomes `T`'s default) and deserializes it.
pub(crate) fn decode_slot<T: ContractType>(index: usize, value: Value) -> Result<T, AccessError> {
    let value = T::type_descriptor()
        .normalize(value)
        .map_err(|source| AccessError::TypeMismatch { index, source })?;

    serde_json::from_value(value).map_err(|e| AccessError::Conversion {
        index,
        message: e.to_string(),
    })
}

macro_rules! tuple_message {
    ($($name:ident : $idx:tt),*) => {
        impl<$($name: ContractType + Default),*> TupleMessage for ($($name,)*) {
            fn types() -> Vec<TypeDescriptor> {
                vec![$($name::type_descriptor()),*]
            }

            fn get(&self, index: usize) -> Result<Value, AccessError> {
                match index {
                    $($idx => encode_slot(index, &self.$idx),)*
                    _ => Err(AccessError::IndexOutOfRange { index, len: Self::types().len() }),
                }
            }

            fn set(&mut self, index: usize, value: Value) -> Result<(), AccessError> {
                match index {
                    $($idx => {
                        self.$idx = decode_slot(index, value)?;
                        Ok(())
                    })*
                    _ => {
                        drop(value);
                        Err(AccessError::IndexOutOfRange { index, len: Self::types().len() })
                    }
                }
            }
        }
    };
}

tuple_message!();
tuple_message!(A: 0);
tuple_message!(A: 0, B: 1);
tuple_message!(A: 0, B: 1, C: 2);
tuple_message!(A: 0, B: 1, C: 2, D: 3);
tuple_message!(A: 0, B: 1, C: 2, D: 3, E: 4);
tuple_message!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
tuple_message!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
tuple_message!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

/// Compiled accessor over a [`TupleMessage`].
pub struct TupleAccessor<T> {
    names: Vec<String>,
    _message: PhantomData<fn() -> T>,
}

impl<T: TupleMessage> TupleAccessor<T> {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names,
            _message: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TupleAccessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TupleAccessor")
            .field("message", &std::any::type_name::<T>())
            .field("names", &self.names)
            .finish()
    }
}

impl<T: TupleMessage> MessageAccessor for TupleAccessor<T> {
    fn names(&self) -> &[String] {
        &self.names
    }

    fn create_new(&self) -> Box<dyn Any + Send> {
        Box::new(T::default())
    }

    fn get_value(&self, message: &(dyn Any + Send), index: usize) -> Result<Value, AccessError> {
        message
            .downcast_ref::<T>()
            .ok_or(AccessError::WrongMessage)?
            .get(index)
    }

    fn set_value(
        &self,
        message: &mut (dyn Any + Send),
        index: usize,
        value: Value,
    ) -> Result<(), AccessError> {
        message
            .downcast_mut::<T>()
            .ok_or(AccessError::WrongMessage)?
            .set(index, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tuple_types() {
        assert!(<()>::types().is_empty());
        assert_eq!(
            <(i32, String, Vec<bool>)>::types(),
            vec![
                TypeDescriptor::Int32,
                TypeDescriptor::String,
                TypeDescriptor::list(TypeDescriptor::Bool)
            ]
        );
    }

    #[test]
    fn test_null_sets_default() {
        let mut message = (7i32, "seven".to_string());
        message.set(0, Value::Null).unwrap();
        message.set(1, Value::Null).unwrap();
        assert_eq!(message, (0, String::new()));
    }

    #[test]
    fn test_out_of_range() {
        let mut message = (1i64,);
        assert_eq!(message.get(0).unwrap(), json!(1));
        assert!(matches!(
            message.set(1, json!(2)),
            Err(AccessError::IndexOutOfRange { index: 1, len: 1 })
        ));
    }
}
