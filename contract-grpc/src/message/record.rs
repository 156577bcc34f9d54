use super::{AccessError, MessageAccessor, MessageShape};
use crate::types::TypeDescriptor;
use serde_json::Value;
use std::any::Any;

/// Instance of a message backed by a [`RecordAccessor`]: one value per slot.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMessage {
    values: Vec<Value>,
}

impl RecordMessage {
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Reflective accessor derived from a [`MessageShape`] at runtime.
///
/// Values are type-checked against the slot type on write.
#[derive(Debug, Clone)]
pub struct RecordAccessor {
    names: Vec<String>,
    types: Vec<TypeDescriptor>,
}

impl RecordAccessor {
    pub fn new(shape: &MessageShape) -> Self {
        Self {
            names: shape.names(),
            types: shape.types(),
        }
    }

    fn check_index(&self, index: usize) -> Result<(), AccessError> {
        if index < self.types.len() {
            Ok(())
        } else {
            Err(AccessError::IndexOutOfRange {
                index,
                len: self.types.len(),
            })
        }
    }

    fn downcast<'a>(&self, message: &'a (dyn Any + Send)) -> Result<&'a RecordMessage, AccessError> {
        message
            .downcast_ref::<RecordMessage>()
            .filter(|m| m.values.len() == self.types.len())
            .ok_or(AccessError::WrongMessage)
    }
}

impl MessageAccessor for RecordAccessor {
    fn names(&self) -> &[String] {
        &self.names
    }

    fn create_new(&self) -> Box<dyn Any + Send> {
        Box::new(RecordMessage {
            values: self.types.iter().map(TypeDescriptor::default_value).collect(),
        })
    }

    fn get_value(&self, message: &(dyn Any + Send), index: usize) -> Result<Value, AccessError> {
        self.check_index(index)?;
        Ok(self.downcast(message)?.values[index].clone())
    }

    fn set_value(
        &self,
        message: &mut (dyn Any + Send),
        index: usize,
        value: Value,
    ) -> Result<(), AccessError> {
        self.check_index(index)?;

        let value = self.types[index]
            .normalize(value)
            .map_err(|source| AccessError::TypeMismatch { index, source })?;

        let len = self.types.len();
        let record = message
            .downcast_mut::<RecordMessage>()
            .filter(|m| m.values.len() == len)
            .ok_or(AccessError::WrongMessage)?;

        record.values[index] = value;
        Ok(())
    }
}
