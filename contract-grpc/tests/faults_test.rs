use calculator_service::{
    CalculatorError, DivideByZeroFault, OverflowFault, contract, error_handlers, fault_types, host,
};
use contract_grpc::{
    BoxError, CallError,
    client::{ClientFactory, ClientFactoryOptions, ContractClient, Invocation, ServiceClientOptions},
    fault::{ClientErrorHandlers, FaultDetail, ServerErrorHandlers, ServerFaultDetail},
    grpc::metadata::{FAULT_DETAIL_KEY, FAULT_TYPE_KEY},
    server::{ServerOptions, ServiceHost},
    tonic::Code,
};
use futures_util::{StreamExt, stream};
use std::sync::Arc;
use tracing_test::traced_test;

fn faulting_host(handlers: ServerErrorHandlers) -> ServiceHost {
    host(
        ServerOptions::default()
            .with_error_handlers(handlers)
            .with_fault_type_resolver(Arc::new(fault_types())),
    )
    .unwrap()
}

/// Turns a received `DivideByZeroFault` back into the application error.
fn rethrow_divide_by_zero() -> ClientErrorHandlers {
    ClientErrorHandlers::new().add_fn(|_operation, fault| {
        match fault.detail.decode::<DivideByZeroFault>() {
            Some(detail) => Err(Box::new(CalculatorError::DivideByZero {
                dividend: detail.dividend,
            }) as BoxError),
            None => Ok(()),
        }
    })
}

/// A client with [`rethrow_divide_by_zero`] installed and the default fault type resolver.
fn rethrowing_client(host: ServiceHost) -> ContractClient<ServiceHost> {
    ClientFactory::new(ClientFactoryOptions::default().with_error_handlers(rethrow_divide_by_zero()))
        .create_client(&contract(), host)
}

async fn divide(client: &ContractClient<ServiceHost>, dividend: i32, divisor: i32) -> Result<i32, CallError> {
    client
        .invoke("Divide", Invocation::new().value(dividend).value(divisor))
        .await?
        .value::<i32>()
}

#[tokio::test]
async fn test_fault_round_trip_through_client_handler() {
    let client = ClientFactory::new(
        ClientFactoryOptions::default()
            .with_error_handlers(rethrow_divide_by_zero())
            .with_fault_type_resolver(Arc::new(fault_types())),
    )
    .create_client(&contract(), faulting_host(error_handlers()));

    assert_eq!(divide(&client, 9, 3).await.unwrap(), 3);

    match divide(&client, 7, 0).await {
        Err(CallError::Application(error)) => {
            let error = error.downcast_ref::<CalculatorError>().unwrap();
            assert!(matches!(error, CalculatorError::DivideByZero { dividend: 7 }));
        }
        other => panic!("Expected the application error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fault_without_client_handler_keeps_status() {
    let client = ClientFactory::new(
        ClientFactoryOptions::default().with_fault_type_resolver(Arc::new(fault_types())),
    )
    .create_client(&contract(), faulting_host(error_handlers()));

    match divide(&client, 7, 0).await {
        Err(CallError::Status(status)) => {
            assert_eq!(status.code(), Code::Internal);
            assert_eq!(status.message(), "Cannot divide 7 by zero");
            assert_eq!(
                status.metadata().get(FAULT_TYPE_KEY).unwrap().to_str().unwrap(),
                "DivideByZeroFault"
            );
            assert!(status.metadata().get_bin(FAULT_DETAIL_KEY).is_some());
        }
        other => panic!("Expected the fault status, got {other:?}"),
    }
}

#[tokio::test]
async fn test_first_server_handler_wins() {
    let handlers = ServerErrorHandlers::new()
        .add_fn(|_operation, _error| None)
        .add_fn(|_operation, _error| {
            let detail = FaultDetail::new(&"first".to_string()).ok()?;
            Some(ServerFaultDetail::new(detail))
        })
        .add_fn(|_operation, _error| {
            let detail = FaultDetail::new(&"second".to_string()).ok()?;
            Some(ServerFaultDetail::new(detail))
        });

    let client = ClientFactory::new(ClientFactoryOptions::default().with_error_handlers(
        ClientErrorHandlers::new().add_fn(|_operation, fault| {
            let reason = fault.detail.decode::<String>().unwrap_or_default();
            Err(reason.into())
        }),
    ))
    .create_client(&contract(), faulting_host(handlers));

    match divide(&client, 1, 0).await {
        Err(CallError::Application(error)) => assert_eq!(error.to_string(), "first"),
        other => panic!("Expected the first fault, got {other:?}"),
    }
}

#[tokio::test]
async fn test_no_server_handler_match_is_untyped() {
    let handlers = ServerErrorHandlers::new().add_fn(|_operation, _error| None);
    let client = rethrowing_client(faulting_host(handlers));

    match divide(&client, 1, 0).await {
        Err(CallError::Status(status)) => {
            assert_eq!(status.code(), Code::Unknown);
            assert!(status.metadata().get(FAULT_TYPE_KEY).is_none());
        }
        other => panic!("Expected an untyped status, got {other:?}"),
    }
}

#[tokio::test]
async fn test_service_handlers_run_before_global_ones() {
    let client = ClientFactory::new(
        ClientFactoryOptions::default()
            .with_fault_type_resolver(Arc::new(fault_types()))
            .with_error_handlers(ClientErrorHandlers::new().add_fn(|_operation, _fault| {
                Err("global".into())
            })),
    )
    .configure_service(
        "demo.Calculator",
        ServiceClientOptions::default().with_error_handlers(rethrow_divide_by_zero()),
    )
    .create_client(&contract(), faulting_host(error_handlers()));

    match divide(&client, 4, 0).await {
        Err(CallError::Application(error)) => {
            assert!(error.downcast_ref::<CalculatorError>().is_some());
        }
        other => panic!("Expected the service handler to win, got {other:?}"),
    }
}

#[tokio::test]
#[traced_test]
async fn test_unknown_fault_tag_keeps_original_status() {
    // The default resolver knows nothing about `DivideByZeroFault`.
    let client = rethrowing_client(faulting_host(error_handlers()));

    match divide(&client, 5, 0).await {
        Err(CallError::Status(status)) => assert_eq!(status.code(), Code::Internal),
        other => panic!("Expected the original status, got {other:?}"),
    }
    assert!(logs_contain("Unknown fault type tag"));
}

/// Turns a received `OverflowFault` into an error naming the operation.
fn overflow_client(host: ServiceHost) -> ContractClient<ServiceHost> {
    let handlers = ClientErrorHandlers::new().add_fn(|_operation, fault| {
        match fault.detail.decode::<OverflowFault>() {
            Some(detail) => Err(format!("{} overflowed", detail.operation).into()),
            None => Ok(()),
        }
    });

    ClientFactory::new(
        ClientFactoryOptions::default()
            .with_error_handlers(handlers)
            .with_fault_type_resolver(Arc::new(fault_types())),
    )
    .create_client(&contract(), host)
}

#[tokio::test]
async fn test_overflow_is_a_fault() {
    let client = overflow_client(faulting_host(error_handlers()));

    match divide(&client, i32::MIN, -1).await {
        Err(CallError::Application(error)) => assert_eq!(error.to_string(), "Divide overflowed"),
        other => panic!("Expected the overflow fault, got {other:?}"),
    }

    let sum = client
        .invoke("Sum", Invocation::new().value(i32::MAX).value(1))
        .await;
    match sum {
        Err(CallError::Application(error)) => assert_eq!(error.to_string(), "Sum overflowed"),
        other => panic!("Expected the overflow fault, got {other:?}"),
    }
}

#[tokio::test]
async fn test_response_stream_fault_after_items() {
    let client = overflow_client(faulting_host(error_handlers()));

    let outcome = client
        .invoke(
            "MultiplyBy",
            Invocation::new().items(stream::iter(vec![1, i32::MAX, 3])).value(2),
        )
        .await
        .unwrap();

    let items: Vec<Result<i32, CallError>> =
        outcome.into_typed_stream::<i32>().unwrap().collect().await;

    match items.as_slice() {
        [Ok(2), Err(CallError::Application(error))] => {
            assert_eq!(error.to_string(), "MultiplyBy overflowed");
        }
        other => panic!("Expected one product then the overflow fault, got {other:?}"),
    }
}
