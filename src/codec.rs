//! Byte-serializer seam for cache values and RPC payloads.
//!
//! This layer only requires round-trip fidelity; the production deployment
//! substitutes its external binary codec behind the same trait.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes values to opaque byte blobs and back.
pub trait ByteCodec {
    fn encode<T: Serialize>(&self, value: &T) -> anyhow::Result<Vec<u8>>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> anyhow::Result<T>;
}

/// JSON-backed codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ByteCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> anyhow::Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: i64,
        name: String,
    }

    #[test]
    fn test_json_round_trip() {
        let codec = JsonCodec;
        let row = Row {
            id: 150_080,
            name: "pinus".to_string(),
        };
        let bytes = codec.encode(&row).unwrap();
        let decoded: Row = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let codec = JsonCodec;
        assert!(codec.decode::<Row>(b"not json").is_err());
    }
}
