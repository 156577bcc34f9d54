//! Metadata keys and helpers shared by both sides of a call.
use bytes::Bytes;
use tonic::metadata::{
    AsciiMetadataValue, BinaryMetadataValue, MetadataKey, MetadataMap, errors::InvalidMetadataValue,
};

/// Request header message of client-streaming and duplex calls.
pub const REQUEST_HEADERS_KEY: &str = "x-contract-request-headers-bin";
/// Response header message of server-streaming and duplex calls, sent as initial metadata.
pub const RESPONSE_HEADERS_KEY: &str = "x-contract-response-headers-bin";
/// Type tag of a typed fault detail.
pub const FAULT_TYPE_KEY: &str = "x-contract-fault-type";
/// Marshalled payload of a typed fault detail.
pub const FAULT_DETAIL_KEY: &str = "x-contract-fault-detail-bin";

pub(crate) fn insert_binary(metadata: &mut MetadataMap, key: &'static str, bytes: &[u8]) {
    metadata.insert_bin(
        MetadataKey::from_static(key),
        BinaryMetadataValue::from_bytes(bytes),
    );
}

/// `None` when the key is absent, `Some(Err(..))` when its value is not valid base64.
pub(crate) fn get_binary(metadata: &MetadataMap, key: &'static str) -> Option<Result<Bytes, String>> {
    metadata
        .get_bin(key)
        .map(|value| value.to_bytes().map_err(|e| e.to_string()))
}

pub(crate) fn insert_ascii(
    metadata: &mut MetadataMap,
    key: &'static str,
    value: &str,
) -> Result<(), InvalidMetadataValue> {
    let value = AsciiMetadataValue::try_from(value)?;
    metadata.insert(MetadataKey::from_static(key), value);
    Ok(())
}

pub(crate) fn get_ascii<'a>(metadata: &'a MetadataMap, key: &'static str) -> Option<&'a str> {
    metadata.get(key).and_then(|value| value.to_str().ok())
}
