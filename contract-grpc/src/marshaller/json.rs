use super::{MarshalError, Marshaller, MarshallerFactory};
use crate::types::TypeDescriptor;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;

/// Marshals values as UTF-8 JSON documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMarshallerFactory;

impl MarshallerFactory for JsonMarshallerFactory {
    fn name(&self) -> &str {
        "json"
    }

    fn create_marshaller(&self, ty: &TypeDescriptor) -> Result<Arc<dyn Marshaller>, MarshalError> {
        Ok(Arc::new(JsonMarshaller { ty: ty.clone() }))
    }
}

#[derive(Debug, Clone)]
pub struct JsonMarshaller {
    ty: TypeDescriptor,
}

impl Marshaller for JsonMarshaller {
    fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    fn serialize(&self, value: &Value) -> Result<Bytes, MarshalError> {
        let value = self.ty.normalize(value.clone())?;
        serde_json::to_vec(&value)
            .map(Bytes::from)
            .map_err(|e| MarshalError::Encode {
                ty: self.ty.type_name(),
                message: e.to_string(),
            })
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, MarshalError> {
        // An empty frame carries the default value.
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(bytes).map_err(|e| MarshalError::Decode {
                ty: self.ty.type_name(),
                message: e.to_string(),
            })?
        };

        Ok(self.ty.normalize(value)?)
    }
}
