//! # Marshaller Codec
//!
//! Implements `tonic::codec::Codec` on top of two [`Marshaller`]s so that `tonic` can transport
//! `serde_json::Value`s without generated message structs.
//!
//! 1. **Encoder**: runs the outbound marshaller and copies its bytes into the gRPC frame.
//! 2. **Decoder**: takes the whole frame and hands it to the inbound marshaller.
//!
//! Which marshaller is outbound depends on the side: a client encodes requests and decodes
//! responses, a server does the opposite.
use crate::marshaller::Marshaller;
use bytes::{Buf, BufMut};
use serde_json::Value;
use std::sync::Arc;
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

pub struct MarshallerCodec {
    encode: Arc<dyn Marshaller>,
    decode: Arc<dyn Marshaller>,
}

impl MarshallerCodec {
    /// # Arguments
    /// * `encode` - Marshaller for the messages this side sends.
    /// * `decode` - Marshaller for the messages this side receives.
    pub fn new(encode: Arc<dyn Marshaller>, decode: Arc<dyn Marshaller>) -> Self {
        Self { encode, decode }
    }
}

impl Codec for MarshallerCodec {
    type Encode = Value;
    type Decode = Value;

    type Encoder = MarshallerEncoder;
    type Decoder = MarshallerDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        MarshallerEncoder(self.encode.clone())
    }

    fn decoder(&mut self) -> Self::Decoder {
        MarshallerDecoder(self.decode.clone())
    }
}

pub struct MarshallerEncoder(Arc<dyn Marshaller>);

impl Encoder for MarshallerEncoder {
    type Item = Value;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        let bytes = self
            .0
            .serialize(&item)
            .map_err(|e| Status::internal(format!("Failed to marshal message: {e}")))?;

        dst.put_slice(&bytes);
        Ok(())
    }
}

pub struct MarshallerDecoder(Arc<dyn Marshaller>);

impl Decoder for MarshallerDecoder {
    type Item = Value;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let bytes = src.copy_to_bytes(src.remaining());

        let value = self
            .0
            .deserialize(&bytes)
            .map_err(|e| Status::internal(format!("Failed to unmarshal message: {e}")))?;

        Ok(Some(value))
    }
}
