//! Transport settings shared by clients and hosts.
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 4 MiB, the `tonic` default for decoding.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Largest message accepted from the peer.
    pub max_decoding_message_size: usize,
    /// Largest message this side will send.
    pub max_encoding_message_size: usize,
    /// Servers only: include the error chain of unhandled application errors in the status
    /// message instead of a generic one.
    pub include_error_details: bool,
    /// Clients only: deadline applied to calls that do not set their own timeout.
    pub default_timeout_ms: Option<u64>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_decoding_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_encoding_message_size: usize::MAX,
            include_error_details: false,
            default_timeout_ms: None,
        }
    }
}

impl TransportSettings {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings =
            TransportSettings::from_json(r#"{ "include_error_details": true, "default_timeout_ms": 250 }"#)
                .unwrap();

        assert!(settings.include_error_details);
        assert_eq!(settings.default_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(settings.max_decoding_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_invalid_json() {
        assert!(TransportSettings::from_json(r#"{ "max_decoding_message_size": "big" }"#).is_err());
    }
}
