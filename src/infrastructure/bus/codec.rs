//! Confluent-style wire framing: a one-byte magic marker, a 4-byte
//! big-endian schema-registry id, then the schema-encoded body (§6).
//!
//! The schema registry itself is out of scope (§1 non-goal — "Avro
//! schema-registry client internals" is an external collaborator); this
//! module only implements the frame shape so `Real` mode is wire-compatible
//! with a Confluent-speaking consumer on the other end. The body codec is
//! pluggable so JSON can stand in when the registry is disabled (§6 "core
//! may interoperate with JSON envelopes when schema registry is disabled").

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{de::DeserializeOwned, Serialize};
use std::io::Cursor;

use crate::domain::error::BusError;

const MAGIC_BYTE: u8 = 0x0;

/// Encodes/decodes the schema-encoded body inside a wire frame. The only
/// implementation shipped here is JSON, matching §6's JSON-interop fallback;
/// a real Avro/Protobuf codec would implement this same trait.
pub trait SchemaCodec: Send + Sync {
    fn encode<P: Serialize>(&self, payload: &P) -> Result<Vec<u8>, BusError>;
    fn decode<P: DeserializeOwned>(&self, bytes: &[u8]) -> Result<P, BusError>;
}

/// JSON body codec, used whenever the schema registry is disabled or
/// unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaCodec;

impl SchemaCodec for JsonSchemaCodec {
    fn encode<P: Serialize>(&self, payload: &P) -> Result<Vec<u8>, BusError> {
        serde_json::to_vec(payload).map_err(|e| BusError::SchemaRegistryError(e.to_string()))
    }

    fn decode<P: DeserializeOwned>(&self, bytes: &[u8]) -> Result<P, BusError> {
        serde_json::from_slice(bytes).map_err(|e| BusError::SchemaRegistryError(e.to_string()))
    }
}

/// Wraps `body` in a Confluent-style frame: `[magic_byte][schema_id BE u32][body]`.
pub fn frame(schema_id: u32, body: &[u8]) -> Result<Vec<u8>, BusError> {
    let mut out = Vec::with_capacity(5 + body.len());
    out.write_u8(MAGIC_BYTE).map_err(|e| BusError::SchemaRegistryError(e.to_string()))?;
    out.write_u32::<BigEndian>(schema_id).map_err(|e| BusError::SchemaRegistryError(e.to_string()))?;
    out.extend_from_slice(body);
    Ok(out)
}

/// Splits a received frame into its schema id and body, validating the magic
/// byte.
pub fn unframe(bytes: &[u8]) -> Result<(u32, &[u8]), BusError> {
    if bytes.len() < 5 {
        return Err(BusError::SchemaRegistryError("frame shorter than 5-byte header".to_string()));
    }
    let mut cursor = Cursor::new(&bytes[..5]);
    let magic = cursor.read_u8().map_err(|e| BusError::SchemaRegistryError(e.to_string()))?;
    if magic != MAGIC_BYTE {
        return Err(BusError::SchemaRegistryError(format!("unexpected magic byte {magic:#x}")));
    }
    let schema_id = cursor.read_u32::<BigEndian>().map_err(|e| BusError::SchemaRegistryError(e.to_string()))?;
    Ok((schema_id, &bytes[5..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn frame_round_trips_through_unframe() {
        let codec = JsonSchemaCodec;
        let body = codec.encode(&Sample { a: 1, b: "x".to_string() }).unwrap();
        let framed = frame(42, &body).unwrap();

        let (schema_id, unframed_body) = unframe(&framed).unwrap();
        assert_eq!(schema_id, 42);
        let decoded: Sample = codec.decode(unframed_body).unwrap();
        assert_eq!(decoded, Sample { a: 1, b: "x".to_string() });
    }

    #[test]
    fn unframe_rejects_short_input() {
        let result = unframe(&[0, 1, 2]);
        assert!(result.is_err());
    }

    #[test]
    fn unframe_rejects_bad_magic_byte() {
        let mut bytes = vec![0xFF];
        bytes.extend_from_slice(&42u32.to_be_bytes());
        let result = unframe(&bytes);
        assert!(result.is_err());
    }
}
