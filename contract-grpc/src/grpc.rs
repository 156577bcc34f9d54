//! # gRPC Transport Plumbing
//!
//! The low-level pieces shared by the client and the server dispatchers.
//!
//! Messages travel as dynamic `serde_json::Value`s: [`codec::MarshallerCodec`] plugs the
//! marshallers of an operation into `tonic`, [`client::GrpcTransport`] drives the four call
//! shapes over any `GrpcService`, and [`metadata`] holds the header and fault metadata keys
//! both sides agree on.
pub mod client;
pub mod codec;
pub mod metadata;
