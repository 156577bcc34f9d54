//! # contract-grpc
//!
//! `contract-grpc` exposes and consumes service contracts over gRPC without hand-written
//! `.proto` files. A contract is described once, as a list of method signatures, and both
//! sides derive everything else from it at runtime: message shapes, wire schemas, call
//! shapes and routes.
//!
//! ## Key Components
//!
//! * **[`contract`]:** [`ContractDefinition`](contract::ContractDefinition) and
//!   [`MethodSignature`](contract::MethodSignature), the explicit description of a service
//!   contract, including inheritance, generic arguments and per-operation options.
//! * **[`reflection`]:** The contract reflector. Flattens inheritance, classifies every
//!   method into one of the four gRPC call shapes and produces an immutable
//!   [`OperationDescriptor`](reflection::OperationDescriptor) table.
//! * **[`message`]:** Message shapes synthesized from parameter and return lists, and the
//!   positional accessors reading and writing their slots.
//! * **[`marshaller`]:** Pluggable marshaller factories. Protobuf (through `prost-reflect`
//!   dynamic messages) and JSON are built in.
//! * **[`client`]:** [`ContractClient`](client::ContractClient), driving calls over any
//!   `tonic` transport.
//! * **[`server`]:** [`ServiceHost`](server::ServiceHost), a `tower` service dispatching
//!   requests to bound handlers.
//! * **[`filter`]:** Ordered middleware around every call, on both sides.
//! * **[`fault`]:** Typed fault details carried across the wire through status metadata.
//!
//! ## Internal transport
//!
//! * **[`GrpcTransport`](grpc::client::GrpcTransport):** A generic gRPC client over dynamic
//!   values, using a [`MarshallerCodec`](grpc::codec::MarshallerCodec).
//!
//! ## Re-exports
//!
//! This crate re-exports `prost-reflect` and `tonic` to ensure that consumers use compatible
//! versions of these underlying dependencies.
pub mod blocking;
pub mod call;
pub mod client;
pub mod config;
pub mod contract;
pub mod fault;
pub mod filter;
pub mod grpc;
pub mod marshaller;
pub mod message;
pub mod reflection;
pub mod server;
pub mod types;

pub use call::{CallError, ItemStream};
pub use client::{ContractClient, Invocation};
pub use contract::{ContractDefinition, MethodSignature};
pub use server::{Reply, ServiceHost};
pub use types::{ContractType, TypeDescriptor};

// Re-exports
pub use prost_reflect;
pub use tonic;

/// Type alias for the boxed error used by application handlers and generic bounds.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
