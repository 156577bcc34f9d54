//! Protobuf marshalling driven by schemas synthesized at runtime.
//!
//! For every type a `FileDescriptorProto` is generated on the fly: struct fields are numbered
//! by position starting at 1, nested structs become nested messages and any non-struct type is
//! wrapped in a message with a single `value` field. The schema is loaded into a
//! [`DescriptorPool`] and values are transcoded through [`DynamicMessage`].
use super::{MarshalError, Marshaller, MarshallerFactory};
use crate::types::{FieldDescriptor, StructDescriptor, TypeDescriptor};
use bytes::Bytes;
use parking_lot::Mutex;
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor, SerializeOptions};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    field_descriptor_proto::{Label, Type},
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

const PACKAGE: &str = "contract_grpc.runtime";
const WRAPPER_MESSAGE: &str = "_Wrapper";
const WRAPPER_FIELD: &str = "value";

/// The default factory. Marshallers are cached per descriptor.
#[derive(Debug, Default)]
pub struct ProtobufMarshallerFactory {
    cache: Mutex<HashMap<TypeDescriptor, Arc<dyn Marshaller>>>,
}

impl ProtobufMarshallerFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MarshallerFactory for ProtobufMarshallerFactory {
    fn name(&self) -> &str {
        "protobuf"
    }

    fn create_marshaller(&self, ty: &TypeDescriptor) -> Result<Arc<dyn Marshaller>, MarshalError> {
        if let Some(marshaller) = self.cache.lock().get(ty) {
            return Ok(marshaller.clone());
        }

        let marshaller: Arc<dyn Marshaller> = Arc::new(ProtobufMarshaller::new(ty)?);
        self.cache.lock().insert(ty.clone(), marshaller.clone());
        Ok(marshaller)
    }
}

#[derive(Debug)]
pub struct ProtobufMarshaller {
    ty: TypeDescriptor,
    message: MessageDescriptor,
    wrapped: bool,
}

impl ProtobufMarshaller {
    pub fn new(ty: &TypeDescriptor) -> Result<Self, MarshalError> {
        let mut schema = SchemaBuilder::new(ty);

        let (root, wrapped) = match ty {
            TypeDescriptor::Struct(s) => (schema.add_struct(s)?, false),
            other => {
                let wrapper = StructDescriptor::new(WRAPPER_MESSAGE).field(WRAPPER_FIELD, other.clone());
                (schema.add_struct(&wrapper)?, true)
            }
        };

        let file = schema.into_file();
        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_proto(file)
            .map_err(|e| MarshalError::Descriptor {
                ty: ty.type_name(),
                message: e.to_string(),
            })?;

        let message = pool
            .get_message_by_name(&format!("{PACKAGE}.{root}"))
            .ok_or_else(|| MarshalError::Descriptor {
                ty: ty.type_name(),
                message: format!("message '{root}' missing from the generated schema"),
            })?;

        Ok(Self {
            ty: ty.clone(),
            message,
            wrapped,
        })
    }

    pub fn message_descriptor(&self) -> &MessageDescriptor {
        &self.message
    }
}

impl Marshaller for ProtobufMarshaller {
    fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    fn serialize(&self, value: &Value) -> Result<Bytes, MarshalError> {
        let value = self.ty.normalize(value.clone())?;
        let value = if self.wrapped {
            Value::Object([(WRAPPER_FIELD.to_string(), value)].into_iter().collect())
        } else {
            value
        };

        let message = DynamicMessage::deserialize(self.message.clone(), value).map_err(|e| {
            MarshalError::Encode {
                ty: self.ty.type_name(),
                message: e.to_string(),
            }
        })?;

        Ok(Bytes::from(message.encode_to_vec()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, MarshalError> {
        let decode_error = |message: String| MarshalError::Decode {
            ty: self.ty.type_name(),
            message,
        };

        let message = DynamicMessage::decode(self.message.clone(), bytes)
            .map_err(|e| decode_error(e.to_string()))?;

        let options = SerializeOptions::new()
            .stringify_64_bit_integers(false)
            .skip_default_fields(false)
            .use_proto_field_name(true);

        let mut value = message
            .serialize_with_options(serde_json::value::Serializer, &options)
            .map_err(|e| decode_error(e.to_string()))?;

        if self.wrapped {
            value = value
                .get_mut(WRAPPER_FIELD)
                .map(Value::take)
                .unwrap_or(Value::Null);
        }

        Ok(self.ty.normalize(value)?)
    }
}

/// Collects the message definitions reachable from one root type.
struct SchemaBuilder {
    file_name: String,
    messages: Vec<DescriptorProto>,
    seen: HashMap<String, StructDescriptor>,
}

impl SchemaBuilder {
    fn new(root: &TypeDescriptor) -> Self {
        Self {
            file_name: format!("{}.proto", message_name(&root.type_name())),
            messages: Vec::new(),
            seen: HashMap::new(),
        }
    }

    fn add_struct(&mut self, descriptor: &StructDescriptor) -> Result<String, MarshalError> {
        let name = message_name(descriptor.name());

        if let Some(existing) = self.seen.get(&name) {
            if existing == descriptor {
                return Ok(name);
            }
            return Err(MarshalError::Unsupported(
                descriptor.name().to_string(),
                "another struct with a different layout uses the same name".to_string(),
            ));
        }
        self.seen.insert(name.clone(), descriptor.clone());

        let field = descriptor
            .fields()
            .iter()
            .enumerate()
            .map(|(index, field)| self.field(index, field))
            .collect::<Result<Vec<_>, _>>()?;

        self.messages.push(DescriptorProto {
            name: Some(name.clone()),
            field,
            ..Default::default()
        });

        Ok(name)
    }

    fn field(&mut self, index: usize, field: &FieldDescriptor) -> Result<FieldDescriptorProto, MarshalError> {
        let (label, item) = match field.ty() {
            TypeDescriptor::List(item) => (Label::Repeated, item.as_ref()),
            other => (Label::Optional, other),
        };

        let (ty, type_name) = match item {
            TypeDescriptor::Bool => (Type::Bool, None),
            TypeDescriptor::Int32 => (Type::Int32, None),
            TypeDescriptor::Int64 => (Type::Int64, None),
            TypeDescriptor::UInt32 => (Type::Uint32, None),
            TypeDescriptor::UInt64 => (Type::Uint64, None),
            TypeDescriptor::Float => (Type::Float, None),
            TypeDescriptor::Double => (Type::Double, None),
            TypeDescriptor::String => (Type::String, None),
            TypeDescriptor::Struct(s) => {
                let name = self.add_struct(s)?;
                (Type::Message, Some(format!(".{PACKAGE}.{name}")))
            }
            TypeDescriptor::List(_) => {
                return Err(MarshalError::Unsupported(
                    field.ty().type_name(),
                    format!("field '{}' is a list of lists", field.name()),
                ));
            }
        };

        let number = i32::try_from(index + 1).map_err(|_| {
            MarshalError::Unsupported(field.name().to_string(), "too many fields".to_string())
        })?;

        Ok(FieldDescriptorProto {
            name: Some(field.name().to_string()),
            number: Some(number),
            label: Some(label as i32),
            r#type: Some(ty as i32),
            type_name,
            ..Default::default()
        })
    }

    fn into_file(self) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some(self.file_name),
            package: Some(PACKAGE.to_string()),
            message_type: self.messages,
            syntax: Some("proto3".to_string()),
            ..Default::default()
        }
    }
}

/// Protobuf identifiers only allow `[A-Za-z0-9_]` and cannot start with a digit.
fn message_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if sanitized.is_empty() || sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_are_numbered_by_position() {
        let ty = StructDescriptor::new("demo.Calculator.Sum.Request")
            .field_of::<i32>("x")
            .field_of::<i32>("y")
            .into_type();

        let marshaller = ProtobufMarshaller::new(&ty).unwrap();
        let message = marshaller.message_descriptor();

        assert_eq!(message.name(), "demo_Calculator_Sum_Request");
        let numbers: Vec<_> = message.fields().map(|f| (f.name().to_string(), f.number())).collect();
        assert_eq!(numbers, vec![("x".to_string(), 1), ("y".to_string(), 2)]);
    }

    #[test]
    fn test_factory_caches_marshallers() {
        let factory = ProtobufMarshallerFactory::new();
        let a = factory.create_marshaller(&TypeDescriptor::Int32).unwrap();
        let b = factory.create_marshaller(&TypeDescriptor::Int32).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_conflicting_struct_names() {
        let a = StructDescriptor::new("Item").field_of::<i32>("x").into_type();
        let b = StructDescriptor::new("Item").field_of::<String>("x").into_type();
        let outer = StructDescriptor::new("Outer").field("a", a).field("b", b).into_type();

        assert!(matches!(
            ProtobufMarshaller::new(&outer),
            Err(MarshalError::Unsupported(..))
        ));
    }

    #[test]
    fn test_message_name_sanitizing() {
        assert_eq!(message_name("Repository-Int64"), "Repository_Int64");
        assert_eq!(message_name("9lives"), "_9lives");
    }
}
