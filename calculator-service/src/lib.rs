//! # Calculator Service
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide a contract, its handlers and
//! a ready-made [`ServiceHost`] for integration testing `contract-grpc`.
//! It is not intended for production use.
//!
//! The contract covers the four call shapes:
//!
//! * `Sum(x, y) -> result` (unary, inherited from `demo.Arithmetic`)
//! * `Divide(dividend, divisor) -> result` (unary, raises a [`DivideByZeroFault`])
//! * `SumAll(values: stream) -> result` (client streaming)
//! * `Range(start, count) -> (total, stream)` (server streaming with a response header)
//! * `Ticks(interval_ms, cancellation) -> stream` (server streaming, endless until cancelled)
//! * `MultiplyBy(values: stream, multiplier) -> stream` (duplex)
//!
//! Results leaving the `i32` range raise an [`OverflowFault`].
use contract_grpc::{
    BoxError, CallError,
    contract::{ContractDefinition, MethodSignature},
    fault::{FaultDetail, FaultTypeRegistry, ServerErrorHandlers, ServerFaultDetail},
    reflection::ContractReflector,
    server::{Reply, ServerOptions, ServiceBuildError, ServiceHost, ServiceHostBuilder},
    types::{ContractType, StructDescriptor, TypeDescriptor},
};
use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const PACKAGE: &str = "demo";

/// Fault detail sent when `Divide` is called with a zero divisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivideByZeroFault {
    pub dividend: i32,
}

impl ContractType for DivideByZeroFault {
    fn type_descriptor() -> TypeDescriptor {
        StructDescriptor::new("DivideByZeroFault")
            .field_of::<i32>("dividend")
            .into_type()
    }
}

/// Fault detail sent when a result does not fit the `i32` range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverflowFault {
    pub operation: String,
}

impl ContractType for OverflowFault {
    fn type_descriptor() -> TypeDescriptor {
        StructDescriptor::new("OverflowFault")
            .field_of::<String>("operation")
            .into_type()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CalculatorError {
    #[error("Cannot divide {dividend} by zero")]
    DivideByZero { dividend: i32 },
    #[error("Range count must not be negative, got {0}")]
    NegativeCount(i32),
    #[error("{0} overflowed the integer range")]
    Overflow(&'static str),
}

/// The base contract, declaring `Sum`.
pub fn arithmetic() -> ContractDefinition {
    ContractDefinition::new("Arithmetic").package(PACKAGE).method(
        MethodSignature::new("Sum")
            .param::<i32>("x")
            .param::<i32>("y")
            .returns::<i32>(),
    )
}

pub fn contract() -> ContractDefinition {
    ContractDefinition::new("Calculator")
        .package(PACKAGE)
        .extends(arithmetic())
        .method(
            MethodSignature::new("Divide")
                .param::<i32>("dividend")
                .param::<i32>("divisor")
                .returns::<i32>(),
        )
        .method(
            MethodSignature::new("SumAll")
                .stream_param::<i32>("values")
                .returns::<i64>(),
        )
        .method(
            MethodSignature::new("Range")
                .param::<i32>("start")
                .param::<i32>("count")
                .returns_value::<i64>("total")
                .returns_stream::<i32>(),
        )
        .method(
            MethodSignature::new("Ticks")
                .param::<u32>("interval_ms")
                .cancellation("token")
                .returns_stream::<u64>(),
        )
        .method(
            MethodSignature::new("MultiplyBy")
                .stream_param::<i32>("values")
                .param::<i32>("multiplier")
                .returns_stream::<i32>(),
        )
}

/// Maps [`CalculatorError::DivideByZero`] to a [`DivideByZeroFault`] and
/// [`CalculatorError::Overflow`] to an [`OverflowFault`].
pub fn error_handlers() -> ServerErrorHandlers {
    ServerErrorHandlers::new().add_fn(|_operation, error| {
        let detail = match error.downcast_ref::<CalculatorError>()? {
            CalculatorError::DivideByZero { dividend } => FaultDetail::new(&DivideByZeroFault {
                dividend: *dividend,
            }),
            CalculatorError::Overflow(operation) => FaultDetail::new(&OverflowFault {
                operation: operation.to_string(),
            }),
            CalculatorError::NegativeCount(_) => return None,
        };
        Some(ServerFaultDetail::new(detail.ok()?).with_message(error.to_string()))
    })
}

/// Resolver knowing the fault details of this service.
pub fn fault_types() -> FaultTypeRegistry {
    FaultTypeRegistry::new()
        .register::<DivideByZeroFault>()
        .register::<OverflowFault>()
}

/// Binds every calculator handler on top of `options`.
pub fn host_builder(options: ServerOptions) -> Result<ServiceHostBuilder, ServiceBuildError> {
    let description = ContractReflector::reflect(&contract());

    ServiceHostBuilder::new(options)
        .bind_named(&description, "Sum", |call| async move {
            let sum = call
                .arg::<i32>("x")?
                .checked_add(call.arg::<i32>("y")?)
                .ok_or(CalculatorError::Overflow("Sum"))?;
            Ok::<_, BoxError>(Reply::new().value(sum))
        })?
        .bind_named(&description, "Divide", |call| async move {
            let dividend = call.arg::<i32>("dividend")?;
            let divisor = call.arg::<i32>("divisor")?;
            if divisor == 0 {
                return Err(CalculatorError::DivideByZero { dividend }.into());
            }
            let quotient = dividend
                .checked_div(divisor)
                .ok_or(CalculatorError::Overflow("Divide"))?;
            Ok::<_, BoxError>(Reply::new().value(quotient))
        })?
        .bind_named(&description, "SumAll", |mut call| async move {
            let mut values = call
                .take_typed_stream::<i32>()
                .ok_or("SumAll needs a request stream")?;

            let mut total = 0i64;
            while let Some(value) = values.next().await {
                total += i64::from(value?);
            }
            Ok::<_, BoxError>(Reply::new().value(total))
        })?
        .bind_named(&description, "Range", |call| async move {
            let start = call.arg::<i32>("start")?;
            let count = call.arg::<i32>("count")?;
            if count < 0 {
                return Err(CalculatorError::NegativeCount(count).into());
            }

            let end = start
                .checked_add(count)
                .ok_or(CalculatorError::Overflow("Range"))?;
            let values: Vec<i32> = (start..end).collect();
            let total: i64 = values.iter().copied().map(i64::from).sum();
            Ok::<_, BoxError>(Reply::new().value(total).items(stream::iter(values)))
        })?
        .bind_named(&description, "Ticks", |call| async move {
            let interval = Duration::from_millis(u64::from(call.arg::<u32>("interval_ms")?));
            let cancelled = call.cancellation().clone().cancelled_owned();

            let ticks = stream::unfold(0u64, move |tick| async move {
                tokio::time::sleep(interval).await;
                Some((tick, tick + 1))
            })
            .take_until(cancelled);
            Ok::<_, BoxError>(Reply::new().items(ticks))
        })?
        .bind_named(&description, "MultiplyBy", |mut call| async move {
            let multiplier = call.arg::<i32>("multiplier")?;
            let values = call
                .take_typed_stream::<i32>()
                .ok_or("MultiplyBy needs a request stream")?;

            let products = values.map(move |value| -> Result<serde_json::Value, CallError> {
                let product = value?
                    .checked_mul(multiplier)
                    .ok_or_else(|| CallError::Application(CalculatorError::Overflow("MultiplyBy").into()))?;
                Ok(serde_json::Value::from(product))
            });
            Ok::<_, BoxError>(Reply::new().stream(products.boxed()))
        })
}

/// A host serving the whole calculator contract.
pub fn host(options: ServerOptions) -> Result<ServiceHost, ServiceBuildError> {
    host_builder(options)?.build()
}
