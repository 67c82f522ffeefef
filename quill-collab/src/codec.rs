//! Wire-bytes codec for opaque CRDT buffers.
//!
//! State vectors and document updates travel inside JSON text frames, so
//! the raw bytes need a text-safe shape. The server marshals byte slices
//! as base64 strings, but older peers emit plain integer arrays instead,
//! so decoding must accept both:
//!
//! ```text
//! "AAECAw=="          base64 string
//! [0, 1, 2, 3]        array of byte values
//! ```
//!
//! Any other shape is a decode error the caller logs and discards without
//! ending the session.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Encode raw bytes into the text-safe wire shape (standard base64).
///
/// The empty buffer encodes to the empty string.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode the text-safe wire shape back into raw bytes.
pub fn decode(text: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(text)
        .map_err(|e| CodecError::Base64(e.to_string()))
}

/// An opaque byte buffer as it appears inside a wire frame.
///
/// Serializes as a base64 string; deserializes from either a base64
/// string or a JSON array of integers 0–255.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WireBytes(pub Vec<u8>);

impl WireBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for WireBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for WireBytes {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Serialize for WireBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(&self.0))
    }
}

struct WireBytesVisitor;

impl<'de> Visitor<'de> for WireBytesVisitor {
    type Value = WireBytes;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a base64 string or an array of byte values")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        decode(v).map(WireBytes).map_err(de::Error::custom)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(value) = seq.next_element::<i64>()? {
            let byte = u8::try_from(value)
                .map_err(|_| de::Error::custom(format!("byte value {value} out of range")))?;
            bytes.push(byte);
        }
        Ok(WireBytes(bytes))
    }
}

impl<'de> Deserialize<'de> for WireBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(WireBytesVisitor)
    }
}

/// Codec errors.
#[derive(Debug, Clone)]
pub enum CodecError {
    Base64(String),
    Shape(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base64(e) => write!(f, "Invalid base64 payload: {e}"),
            Self::Shape(e) => write!(f, "Unrecognized wire-bytes shape: {e}"),
        }
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let buf = vec![0u8, 1, 2, 127, 128, 255];
        assert_eq!(decode(&encode(&buf)).unwrap(), buf);
    }

    #[test]
    fn test_roundtrip_empty() {
        assert_eq!(encode(&[]), "");
        assert_eq!(decode("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_roundtrip_all_byte_values() {
        let buf: Vec<u8> = (0..=255).collect();
        assert_eq!(decode(&encode(&buf)).unwrap(), buf);
    }

    #[test]
    fn test_decode_invalid_base64() {
        assert!(decode("not base64 !!!").is_err());
    }

    #[test]
    fn test_wire_bytes_serializes_as_base64() {
        let wb = WireBytes::new(vec![1, 2, 3]);
        let json = serde_json::to_string(&wb).unwrap();
        assert_eq!(json, format!("\"{}\"", encode(&[1, 2, 3])));
    }

    #[test]
    fn test_wire_bytes_from_string_shape() {
        let json = format!("\"{}\"", encode(&[10, 20, 30]));
        let wb: WireBytes = serde_json::from_str(&json).unwrap();
        assert_eq!(wb.as_slice(), &[10, 20, 30]);
    }

    #[test]
    fn test_wire_bytes_from_array_shape() {
        let wb: WireBytes = serde_json::from_str("[0, 128, 255]").unwrap();
        assert_eq!(wb.as_slice(), &[0, 128, 255]);
    }

    #[test]
    fn test_wire_bytes_empty_shapes() {
        let from_str: WireBytes = serde_json::from_str("\"\"").unwrap();
        let from_arr: WireBytes = serde_json::from_str("[]").unwrap();
        assert!(from_str.is_empty());
        assert!(from_arr.is_empty());
    }

    #[test]
    fn test_wire_bytes_rejects_out_of_range() {
        assert!(serde_json::from_str::<WireBytes>("[0, 256]").is_err());
        assert!(serde_json::from_str::<WireBytes>("[-1]").is_err());
    }

    #[test]
    fn test_wire_bytes_rejects_other_shapes() {
        assert!(serde_json::from_str::<WireBytes>("42").is_err());
        assert!(serde_json::from_str::<WireBytes>("{\"a\": 1}").is_err());
        assert!(serde_json::from_str::<WireBytes>("true").is_err());
    }

    #[test]
    fn test_wire_bytes_serde_roundtrip() {
        let wb = WireBytes::new((0..64).collect());
        let json = serde_json::to_string(&wb).unwrap();
        let back: WireBytes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wb);
    }
}
