//! Canonical encoding and chain digests.
//!
//! Event hashes are computed over a *canonical* byte encoding so that two
//! processes (or two implementations) produce the same digest for equal
//! events: JSON with object keys emitted in sorted order at every depth, no
//! insignificant whitespace, and timestamps pinned to a fixed RFC 3339
//! rendering by the event model. Byte identity of this encoding is the sole
//! cross-implementation interop contract of the chain.

use serde_json::Value;

use crate::error::{Result, SourcingError};

/// 32-byte Blake3 digest of an event's canonical body.
pub type EventDigest = [u8; 32];

/// Serialize a JSON value into canonical bytes.
///
/// Object keys are sorted lexicographically at every nesting depth. The
/// sort is performed explicitly rather than relying on the map order of the
/// underlying JSON library.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

/// Compute the Blake3 digest of a canonical body.
pub fn chain_hash(body: &Value) -> Result<EventDigest> {
    let bytes = canonical_bytes(body)?;
    Ok(*blake3::hash(&bytes).as_bytes())
}

/// Render a digest as lowercase hex (wire/storage representation).
pub fn encode_digest(digest: &EventDigest) -> String {
    blake3::Hash::from(*digest).to_hex().to_string()
}

/// Parse a digest from its lowercase hex rendering.
pub fn decode_digest(hex: &str) -> Result<EventDigest> {
    let hash = blake3::Hash::from_hex(hex)
        .map_err(|e| SourcingError::Codec(format!("invalid digest '{hex}': {e}")))?;
    Ok(*hash.as_bytes())
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_scalar(&Value::String((*key).clone()), out)?;
                out.push(b':');
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => write_scalar(scalar, out)?,
    }
    Ok(())
}

fn write_scalar(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| SourcingError::Codec(format!("canonical encoding failed: {e}")))?;
    out.extend_from_slice(&bytes);
    Ok(())
}
