//! # Contract Reflection
//!
//! Turns a [`ContractDefinition`] into the table of [`OperationDescriptor`]s both dispatchers
//! work from. The table is built once per contract and never changes afterwards.
//!
//! ## How it works
//!
//! 1. **Flattening**: the contracts a definition extends are visited depth first in declaration
//!    order, each one once, followed by the definition's own methods. A method re-declared with
//!    the same signature replaces the earlier declaration and takes its later position.
//! 2. **Classification**: a stream parameter makes the request a stream, a stream return
//!    component makes the response a stream. Together they select one of the four gRPC call
//!    shapes ([`MethodType`]).
//! 3. **Shape synthesis**: the remaining value parameters form the request message, the value
//!    return components form the response message, both in declaration order.
//!
//! Methods that cannot be mapped are rejected with a [`BindingDiagnostic`] and a warning; the
//! rest of the contract is unaffected.
use crate::{
    contract::{
        ContractDefinition, MethodSignature, ParameterKind, ReturnComponent, SignatureKey,
        generic_name,
    },
    message::{MessageAccessor, MessageShape, Slot, StreamAccessor},
    types::TypeDescriptor,
};
use once_cell::sync::OnceCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// The four gRPC call shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodType {
    Unary,
    ClientStreaming,
    ServerStreaming,
    DuplexStreaming,
}

impl MethodType {
    pub fn from_streams(request_stream: bool, response_stream: bool) -> Self {
        match (request_stream, response_stream) {
            (false, false) => MethodType::Unary,
            (true, false) => MethodType::ClientStreaming,
            (false, true) => MethodType::ServerStreaming,
            (true, true) => MethodType::DuplexStreaming,
        }
    }

    pub fn has_request_stream(&self) -> bool {
        matches!(self, MethodType::ClientStreaming | MethodType::DuplexStreaming)
    }

    pub fn has_response_stream(&self) -> bool {
        matches!(self, MethodType::ServerStreaming | MethodType::DuplexStreaming)
    }
}

impl fmt::Display for MethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MethodType::Unary => "unary",
            MethodType::ClientStreaming => "client streaming",
            MethodType::ServerStreaming => "server streaming",
            MethodType::DuplexStreaming => "duplex streaming",
        };
        f.write_str(name)
    }
}

/// Why a method could not be turned into an operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindingError {
    #[error("More than one stream parameter")]
    MultipleStreamParameters,
    #[error("More than one stream return component")]
    MultipleStreamResults,
    #[error("More than one {0} parameter")]
    DuplicateContextParameter(&'static str),
    #[error("'{0}' is an infrastructure member and cannot be an operation")]
    InfrastructureMember(String),
    #[error("Path '{0}' is already taken by another operation")]
    DuplicatePath(String),
    #[error("Name '{0}' is not a valid identifier")]
    InvalidName(String),
    #[error("Name '{0}' is used by more than one {1} slot")]
    DuplicateName(String, &'static str),
    #[error("Compiled {direction} accessor has slot types [{found}] but the message needs [{expected}]")]
    AccessorMismatch {
        direction: &'static str,
        expected: String,
        found: String,
    },
}

/// A method that was excluded from a contract.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingDiagnostic {
    pub service_name: String,
    pub method: String,
    pub signature: String,
    pub error: BindingError,
}

impl fmt::Display for BindingDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: cannot bind '{}': {}",
            self.service_name, self.signature, self.error
        )
    }
}

/// Identity of the method behind an operation, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractMethod {
    pub name: String,
    pub declaring_contract: String,
    pub generic_arguments: Vec<TypeDescriptor>,
    pub signature: String,
}

/// Everything the dispatchers need to know about one operation.
pub struct OperationDescriptor {
    service_name: String,
    operation_name: String,
    path: String,
    declaring_contract: String,
    method_type: MethodType,
    signature: MethodSignature,
    contract_method: OnceCell<ContractMethod>,

    header_indices: Vec<usize>,
    request_parameter_indices: Vec<usize>,
    request_stream_index: Option<usize>,
    cancellation_index: Option<usize>,
    call_options_index: Option<usize>,

    request: MessageShape,
    response: MessageShape,
    request_names: Arc<[String]>,
    response_names: Arc<[String]>,
    request_accessor: Arc<dyn MessageAccessor>,
    response_accessor: Arc<dyn MessageAccessor>,
    request_stream: Option<StreamAccessor>,
    response_stream: Option<StreamAccessor>,
}

impl OperationDescriptor {
    /// The method behind this operation. Resolved on first use.
    pub fn contract_method(&self) -> &ContractMethod {
        self.contract_method.get_or_init(|| ContractMethod {
            name: self.signature.name().to_string(),
            declaring_contract: self.declaring_contract.clone(),
            generic_arguments: self.signature.generic_arguments().to_vec(),
            signature: self.signature.display_signature(),
        })
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn is_async(&self) -> bool {
        self.signature.is_async()
    }

    pub fn method_type(&self) -> MethodType {
        self.method_type
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// `/{service}/{operation}`
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Positions of the parameters carried by the request message.
    pub fn request_header_parameter_indices(&self) -> &[usize] {
        &self.header_indices
    }

    /// Header positions plus the stream position, in declaration order.
    pub fn request_parameter_indices(&self) -> &[usize] {
        &self.request_parameter_indices
    }

    pub fn request_stream_parameter_index(&self) -> Option<usize> {
        self.request_stream_index
    }

    pub fn cancellation_parameter_index(&self) -> Option<usize> {
        self.cancellation_index
    }

    pub fn call_options_parameter_index(&self) -> Option<usize> {
        self.call_options_index
    }

    pub fn request(&self) -> &MessageShape {
        &self.request
    }

    pub fn response(&self) -> &MessageShape {
        &self.response
    }

    pub fn request_accessor(&self) -> &Arc<dyn MessageAccessor> {
        &self.request_accessor
    }

    pub fn response_accessor(&self) -> &Arc<dyn MessageAccessor> {
        &self.response_accessor
    }

    pub fn request_stream(&self) -> Option<&StreamAccessor> {
        self.request_stream.as_ref()
    }

    pub fn response_stream(&self) -> Option<&StreamAccessor> {
        self.response_stream.as_ref()
    }

    pub(crate) fn request_names(&self) -> Arc<[String]> {
        self.request_names.clone()
    }

    pub(crate) fn response_names(&self) -> Arc<[String]> {
        self.response_names.clone()
    }
}

impl fmt::Debug for OperationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("path", &self.path)
            .field("method_type", &self.method_type)
            .field("request", &self.request)
            .field("response", &self.response)
            .field("request_stream", &self.request_stream)
            .field("response_stream", &self.response_stream)
            .finish_non_exhaustive()
    }
}

/// The operation table of one contract.
#[derive(Debug, Clone)]
pub struct ContractDescription {
    service_name: String,
    operations: Vec<Arc<OperationDescriptor>>,
    diagnostics: Vec<BindingDiagnostic>,
}

impl ContractDescription {
    /// Service name of the reflected contract itself.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn operations(&self) -> &[Arc<OperationDescriptor>] {
        &self.operations
    }

    /// Methods that were rejected.
    pub fn diagnostics(&self) -> &[BindingDiagnostic] {
        &self.diagnostics
    }

    /// Looks an operation up by its operation name, e.g. `Sum` or `Get-Int64`.
    pub fn find(&self, operation_name: &str) -> Option<&Arc<OperationDescriptor>> {
        self.operations
            .iter()
            .find(|op| op.operation_name == operation_name)
    }

    pub fn find_by_path(&self, path: &str) -> Option<&Arc<OperationDescriptor>> {
        self.operations.iter().find(|op| op.path == path)
    }
}

/// Builds [`ContractDescription`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContractReflector;

impl ContractReflector {
    pub fn reflect(contract: &ContractDefinition) -> ContractDescription {
        let service_name = contract.service_name();

        let mut diagnostics = Vec::new();
        let mut operations: Vec<Arc<OperationDescriptor>> = Vec::new();
        let mut paths = HashSet::new();

        for (declaring, method) in flatten(contract) {
            let declaring_service = declaring.service_name();

            let result = build_operation(declaring, &declaring_service, method).and_then(|op| {
                if paths.insert(op.path.clone()) {
                    Ok(op)
                } else {
                    Err(BindingError::DuplicatePath(op.path.clone()))
                }
            });

            match result {
                Ok(op) => operations.push(Arc::new(op)),
                Err(error) => {
                    let diagnostic = BindingDiagnostic {
                        service_name: declaring_service,
                        method: method.name().to_string(),
                        signature: method.display_signature(),
                        error,
                    };
                    tracing::warn!(
                        service = %diagnostic.service_name,
                        operation = %diagnostic.method,
                        error = %diagnostic.error,
                        "Operation rejected"
                    );
                    diagnostics.push(diagnostic);
                }
            }
        }

        tracing::debug!(
            service = %service_name,
            operations = operations.len(),
            rejected = diagnostics.len(),
            "Contract reflected"
        );

        ContractDescription {
            service_name,
            operations,
            diagnostics,
        }
    }
}

/// Every method of `contract` and its bases, with the contract declaring it.
fn flatten(contract: &ContractDefinition) -> Vec<(&ContractDefinition, &MethodSignature)> {
    fn visit<'a>(
        contract: &'a ContractDefinition,
        visited: &mut HashSet<String>,
        out: &mut Vec<(&'a ContractDefinition, &'a MethodSignature)>,
    ) {
        for base in contract.bases() {
            if visited.insert(base.service_name()) {
                visit(base, visited, out);
            }
        }
        out.extend(contract.methods().iter().map(|m| (contract, m)));
    }

    let mut visited = HashSet::from([contract.service_name()]);
    let mut declared = Vec::new();
    visit(contract, &mut visited, &mut declared);

    // Re-declarations replace the earlier entry and move to the later position.
    let mut slots: Vec<Option<(&ContractDefinition, &MethodSignature)>> = Vec::new();
    let mut positions: HashMap<SignatureKey, usize> = HashMap::new();
    for (declaring, method) in declared {
        if let Some(previous) = positions.insert(method.signature_key(), slots.len()) {
            slots[previous] = None;
        }
        slots.push(Some((declaring, method)));
    }

    slots.into_iter().flatten().collect()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => chars.all(|c| c.is_alphanumeric() || c == '_'),
        _ => false,
    }
}

fn is_infrastructure_member(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "dispose" | "dispose_async" | "disposeasync"
    )
}

fn check_unique<'a>(
    names: impl IntoIterator<Item = &'a str>,
    direction: &'static str,
) -> Result<(), BindingError> {
    let mut seen = HashSet::new();
    for name in names {
        if !is_identifier(name) {
            return Err(BindingError::InvalidName(name.to_string()));
        }
        if !seen.insert(name) {
            return Err(BindingError::DuplicateName(name.to_string(), direction));
        }
    }
    Ok(())
}

fn type_list(types: &[TypeDescriptor]) -> String {
    types
        .iter()
        .map(TypeDescriptor::type_name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn accessor_for(
    shape: &MessageShape,
    compiled: Option<&crate::contract::AccessorFactory>,
    direction: &'static str,
) -> Result<Arc<dyn MessageAccessor>, BindingError> {
    match compiled {
        None => Ok(shape.record_accessor()),
        Some(factory) if factory.types() == shape.types().as_slice() => {
            Ok(factory.build(shape.names()))
        }
        Some(factory) => Err(BindingError::AccessorMismatch {
            direction,
            expected: type_list(&shape.types()),
            found: type_list(factory.types()),
        }),
    }
}

fn build_operation(
    declaring: &ContractDefinition,
    service_name: &str,
    method: &MethodSignature,
) -> Result<OperationDescriptor, BindingError> {
    if !is_identifier(method.name()) {
        return Err(BindingError::InvalidName(method.name().to_string()));
    }
    if is_infrastructure_member(method.name()) {
        return Err(BindingError::InfrastructureMember(method.name().to_string()));
    }

    let mut header_indices = Vec::new();
    let mut request_parameter_indices = Vec::new();
    let mut request_stream = None;
    let mut cancellation_index = None;
    let mut call_options_index = None;
    let mut request_slots = Vec::new();

    for (index, parameter) in method.parameters().iter().enumerate() {
        match parameter.kind() {
            ParameterKind::Value(ty) => {
                header_indices.push(index);
                request_parameter_indices.push(index);
                request_slots.push(Slot::new(parameter.name(), ty.clone()));
            }
            ParameterKind::Stream(ty) => {
                if request_stream.is_some() {
                    return Err(BindingError::MultipleStreamParameters);
                }
                request_parameter_indices.push(index);
                request_stream = Some((index, StreamAccessor::new(ty.clone())));
            }
            ParameterKind::Cancellation => {
                if cancellation_index.replace(index).is_some() {
                    return Err(BindingError::DuplicateContextParameter("cancellation"));
                }
            }
            ParameterKind::CallOptions => {
                if call_options_index.replace(index).is_some() {
                    return Err(BindingError::DuplicateContextParameter("call options"));
                }
            }
        }
    }

    let mut response_stream = None;
    let mut response_slots = Vec::new();
    for component in method.return_components() {
        match component {
            ReturnComponent::Value { name, ty } => {
                response_slots.push(Slot::new(name, ty.clone()));
            }
            ReturnComponent::Stream(ty) => {
                if response_stream.is_some() {
                    return Err(BindingError::MultipleStreamResults);
                }
                response_stream = Some(StreamAccessor::new(ty.clone()));
            }
        }
    }

    check_unique(method.parameters().iter().map(|p| p.name()), "request")?;
    check_unique(response_slots.iter().map(Slot::name), "response")?;

    let operation_name = generic_name(method.name(), method.generic_arguments());
    let path = format!("/{service_name}/{operation_name}");

    let request = MessageShape::new(format!("{service_name}.{operation_name}.Request"), request_slots);
    let response = MessageShape::new(format!("{service_name}.{operation_name}.Response"), response_slots);

    let options = method.options();
    let request_accessor = accessor_for(&request, options.request_accessor.as_ref(), "request")?;
    let response_accessor =
        accessor_for(&response, options.response_accessor.as_ref(), "response")?;

    let method_type = MethodType::from_streams(request_stream.is_some(), response_stream.is_some());
    let (request_stream_index, request_stream) = request_stream.unzip();

    Ok(OperationDescriptor {
        service_name: service_name.to_string(),
        operation_name,
        path,
        declaring_contract: declaring.name().to_string(),
        method_type,
        signature: method.clone(),
        contract_method: OnceCell::new(),
        header_indices,
        request_parameter_indices,
        request_stream_index,
        cancellation_index,
        call_options_index,
        request_names: request.names().into(),
        response_names: response.names().into(),
        request,
        response,
        request_accessor,
        response_accessor,
        request_stream,
        response_stream,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StructDescriptor;
    use tracing_test::traced_test;

    fn calculator() -> ContractDefinition {
        ContractDefinition::new("Calculator")
            .package("demo")
            .method(MethodSignature::new("Sum").param::<i32>("x").param::<i32>("y").returns::<i32>())
            .method(
                MethodSignature::new("SumAll")
                    .stream_param::<i32>("values")
                    .cancellation("token")
                    .returns::<i64>(),
            )
            .method(
                MethodSignature::new("Range")
                    .param::<i32>("from")
                    .param::<i32>("count")
                    .returns_value::<String>("label")
                    .returns_stream::<i32>(),
            )
            .method(
                MethodSignature::new("MultiplyBy")
                    .stream_param::<i32>("values")
                    .param::<i32>("multiplier")
                    .cancellation("token")
                    .returns_stream::<i32>(),
            )
    }

    #[test]
    fn test_classification() {
        let description = ContractReflector::reflect(&calculator());
        assert!(description.diagnostics().is_empty());

        let types: Vec<_> = description
            .operations()
            .iter()
            .map(|op| (op.operation_name().to_string(), op.method_type()))
            .collect();

        assert_eq!(
            types,
            vec![
                ("Sum".to_string(), MethodType::Unary),
                ("SumAll".to_string(), MethodType::ClientStreaming),
                ("Range".to_string(), MethodType::ServerStreaming),
                ("MultiplyBy".to_string(), MethodType::DuplexStreaming),
            ]
        );
    }

    #[test]
    fn test_duplex_indices_and_shapes() {
        let description = ContractReflector::reflect(&calculator());
        let op = description.find("MultiplyBy").unwrap();

        assert_eq!(op.path(), "/demo.Calculator/MultiplyBy");
        assert_eq!(op.request_header_parameter_indices(), &[1]);
        assert_eq!(op.request_parameter_indices(), &[0, 1]);
        assert_eq!(op.request_stream_parameter_index(), Some(0));
        assert_eq!(op.cancellation_parameter_index(), Some(2));
        assert_eq!(op.call_options_parameter_index(), None);
        assert_eq!(op.request().names(), vec!["multiplier".to_string()]);
        assert!(op.response().is_empty());
        assert_eq!(op.request_stream().unwrap().item_type(), &TypeDescriptor::Int32);
        assert_eq!(op.response_stream().unwrap().item_type(), &TypeDescriptor::Int32);
        assert_eq!(
            op.contract_method().signature,
            "MultiplyBy(values: Stream<Int32>, multiplier: Int32, token: CancellationToken) -> Stream<Int32>"
        );
    }

    #[test]
    fn test_server_streaming_response_headers() {
        let description = ContractReflector::reflect(&calculator());
        let op = description.find("Range").unwrap();

        assert_eq!(op.request().name(), "demo.Calculator.Range.Request");
        assert_eq!(op.response().names(), vec!["label".to_string()]);
        assert_eq!(op.response().types(), vec![TypeDescriptor::String]);
    }

    #[traced_test]
    #[test]
    fn test_ambiguous_signatures_are_rejected() {
        let contract = ContractDefinition::new("Broken")
            .method(
                MethodSignature::new("TwoStreams")
                    .stream_param::<i32>("a")
                    .stream_param::<i32>("b")
                    .returns::<i32>(),
            )
            .method(
                MethodSignature::new("TwoResults")
                    .returns_stream::<i32>()
                    .returns_stream::<i32>(),
            )
            .method(
                MethodSignature::new("TwoTokens")
                    .cancellation("a")
                    .cancellation("b")
                    .returns::<i32>(),
            )
            .method(MethodSignature::new("Dispose"))
            .method(MethodSignature::new("Ping").returns::<bool>());

        let description = ContractReflector::reflect(&contract);

        let errors: Vec<_> = description.diagnostics().iter().map(|d| d.error.clone()).collect();
        assert_eq!(
            errors,
            vec![
                BindingError::MultipleStreamParameters,
                BindingError::MultipleStreamResults,
                BindingError::DuplicateContextParameter("cancellation"),
                BindingError::InfrastructureMember("Dispose".to_string()),
            ]
        );
        assert_eq!(description.operations().len(), 1);
        assert!(description.find("Ping").is_some());
        assert!(logs_contain("Operation rejected"));
    }

    #[test]
    fn test_inheritance_flattening_and_override() {
        let base = ContractDefinition::new("Base")
            .package("demo")
            .method(MethodSignature::new("Ping").returns::<bool>())
            .method(MethodSignature::new("Echo").param::<String>("text").returns::<String>());

        let derived = ContractDefinition::new("Derived")
            .package("demo")
            .extends(base)
            .method(MethodSignature::new("Own").returns::<i32>())
            .method(MethodSignature::new("Ping").returns::<bool>());

        let description = ContractReflector::reflect(&derived);
        let paths: Vec<_> = description.operations().iter().map(|op| op.path().to_string()).collect();

        assert_eq!(
            paths,
            vec!["/demo.Base/Echo", "/demo.Derived/Own", "/demo.Derived/Ping"]
        );
        assert_eq!(
            description.find("Echo").unwrap().contract_method().declaring_contract,
            "Base"
        );
    }

    #[test]
    fn test_diamond_base_visited_once() {
        let root = Arc::new(
            ContractDefinition::new("Root").method(MethodSignature::new("Ping").returns::<bool>()),
        );
        let left = ContractDefinition::new("Left").extends(root.clone());
        let right = ContractDefinition::new("Right").extends(root);
        let bottom = ContractDefinition::new("Bottom").extends(left).extends(right);

        let description = ContractReflector::reflect(&bottom);
        assert_eq!(description.operations().len(), 1);
        assert!(description.diagnostics().is_empty());
    }

    #[test]
    fn test_generic_operations() {
        let person = StructDescriptor::new("Person").field_of::<String>("name").into_type();

        let repository = ContractDefinition::new("Repository")
            .generic_argument(person.clone())
            .method(
                MethodSignature::new("Get")
                    .generic_argument(TypeDescriptor::Int64)
                    .param::<i64>("id")
                    .return_component(ReturnComponent::Value {
                        name: "result".to_string(),
                        ty: person,
                    }),
            )
            .method(
                MethodSignature::new("Get")
                    .generic_argument(TypeDescriptor::String)
                    .param::<String>("id")
                    .returns::<bool>(),
            );

        let description = ContractReflector::reflect(&repository);
        let paths: Vec<_> = description.operations().iter().map(|op| op.path().to_string()).collect();

        assert_eq!(
            paths,
            vec!["/Repository-Person/Get-Int64", "/Repository-Person/Get-String"]
        );
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let contract = ContractDefinition::new("Overloads")
            .method(MethodSignature::new("Add").param::<i32>("x").returns::<i32>())
            .method(MethodSignature::new("Add").param::<i64>("x").returns::<i64>());

        let description = ContractReflector::reflect(&contract);
        assert_eq!(description.operations().len(), 1);
        assert_eq!(
            description.diagnostics()[0].error,
            BindingError::DuplicatePath("/Overloads/Add".to_string())
        );
    }

    #[test]
    fn test_compiled_accessor_must_match_shape() {
        let contract = ContractDefinition::new("Calc")
            .method(
                MethodSignature::new("Sum")
                    .param::<i32>("x")
                    .param::<i32>("y")
                    .returns::<i32>()
                    .compiled_request::<(i32, i32)>()
                    .compiled_response::<(i32,)>(),
            )
            .method(
                MethodSignature::new("Bad")
                    .param::<i32>("x")
                    .returns::<i32>()
                    .compiled_request::<(String,)>(),
            );

        let description = ContractReflector::reflect(&contract);
        assert!(description.find("Sum").is_some());
        assert!(matches!(
            description.diagnostics()[0].error,
            BindingError::AccessorMismatch { direction: "request", .. }
        ));
    }

    #[test]
    fn test_invalid_names() {
        let contract = ContractDefinition::new("Names")
            .method(MethodSignature::new("has space").returns::<i32>())
            .method(MethodSignature::new("Dup").param::<i32>("a").param::<i32>("a"));

        let errors: Vec<_> = ContractReflector::reflect(&contract)
            .diagnostics()
            .iter()
            .map(|d| d.error.clone())
            .collect();

        assert_eq!(
            errors,
            vec![
                BindingError::InvalidName("has space".to_string()),
                BindingError::DuplicateName("a".to_string(), "request"),
            ]
        );
    }

    #[test]
    fn test_reflection_is_stable() {
        let a = ContractReflector::reflect(&calculator());
        let b = ContractReflector::reflect(&calculator());

        for (x, y) in a.operations().iter().zip(b.operations()) {
            assert_eq!(x.path(), y.path());
            assert_eq!(x.request(), y.request());
            assert_eq!(x.response(), y.response());
        }
    }
}
