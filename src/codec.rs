use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Error raised while turning a value into its stored form or back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    Encode(String),
    Decode(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Encode(message) => write!(f, "encode error: {}", message),
            CodecError::Decode(message) => write!(f, "decode error: {}", message),
        }
    }
}

impl std::error::Error for CodecError {}

/// How snapshots are written into string key-value storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotFormat {
    /// Plain JSON, readable by anything else sharing the storage.
    #[default]
    Json,
    /// bitcode binary, base64 wrapped.
    Bitcode,
}

impl SnapshotFormat {
    pub fn encode<V: Serialize>(&self, value: &V) -> Result<String, CodecError> {
        match self {
            SnapshotFormat::Json => {
                serde_json::to_string(value).map_err(|e| CodecError::Encode(e.to_string()))
            }
            SnapshotFormat::Bitcode => {
                let bytes =
                    bitcode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))?;
                Ok(STANDARD.encode(bytes))
            }
        }
    }

    pub fn decode<V: DeserializeOwned>(&self, raw: &str) -> Result<V, CodecError> {
        match self {
            SnapshotFormat::Json => {
                serde_json::from_str(raw).map_err(|e| CodecError::Decode(e.to_string()))
            }
            SnapshotFormat::Bitcode => {
                let bytes = STANDARD
                    .decode(raw)
                    .map_err(|e| CodecError::Decode(e.to_string()))?;
                bitcode::deserialize(&bytes).map_err(|e| CodecError::Decode(e.to_string()))
            }
        }
    }
}
