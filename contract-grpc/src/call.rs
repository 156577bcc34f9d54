//! Types shared by every call, on either side of the wire.
use crate::{
    BoxError, blocking::BlockingError, grpc::client::GrpcRequestError, marshaller::MarshalError,
    message::AccessError,
};
use futures_util::stream::BoxStream;
use serde_json::Value;
use tonic::{Code, Status};

/// The lazily produced items of a stream parameter or stream return component.
///
/// An `Err` item terminates the stream.
pub type ItemStream = BoxStream<'static, Result<Value, CallError>>;

/// Which end of the call a filter runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallSide {
    Client,
    Server,
}

/// Every way a call can fail.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("The call was cancelled")]
    Cancelled,
    #[error("The call failed with status '{}': {}", .0.code(), .0.message())]
    Status(Status),
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Request(#[from] GrpcRequestError),
    #[error("Operation '{0}' is not part of this contract")]
    OperationNotFound(String),
    #[error("Invalid invocation: {0}")]
    InvalidInvocation(String),
    #[error("Application error: {0}")]
    Application(#[source] BoxError),
    #[error(transparent)]
    Blocking(#[from] BlockingError),
}

impl From<Status> for CallError {
    fn from(status: Status) -> Self {
        if status.code() == Code::Cancelled {
            CallError::Cancelled
        } else {
            CallError::Status(status)
        }
    }
}

impl CallError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CallError::Cancelled)
    }

    /// The status a server answers with when this error ends a call.
    pub(crate) fn into_status(self) -> Status {
        match self {
            CallError::Cancelled => Status::cancelled("The call was cancelled"),
            CallError::Status(status) => status,
            CallError::Access(e) => Status::invalid_argument(e.to_string()),
            CallError::Marshal(e) => Status::internal(e.to_string()),
            CallError::OperationNotFound(op) => {
                Status::unimplemented(format!("Operation '{op}' is not implemented"))
            }
            other => Status::internal(other.to_string()),
        }
    }
}
