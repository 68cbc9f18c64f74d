use serde::{Deserialize, Serialize};
use std::fmt;

/// Amount of an asset, denominated in its smallest unit.
pub type Balance = u64;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

/// Main-chain index: monotonically increasing once a unit is placed on the MC.
pub type Mci = u64;

/// Graph level: 1 + max(level of parents); genesis = 0.
pub type Level = u64;

/// Witnessed level: the `level` at which a majority of witnesses first
/// appears along a best-parent chain.
pub type WitnessedLevel = u64;

// ── UnitId ───────────────────────────────────────────────────────────────────

/// Content-hash identifier of a unit: `base64(SHA-256(canonical_serialize(unit)))`
/// with derived/volatile fields stripped (see `braid_crypto::hash`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub [u8; 32]);

impl UnitId {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Canonical textual form: standard base64, matching `H(x) =
    /// base64(SHA-256(...))`.
    pub fn to_b64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, base64::DecodeError> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD.decode(s)?;
        if bytes.len() != 32 {
            return Err(base64::DecodeError::InvalidLength(bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b64())
    }
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitId({}…)", &self.to_b64()[..12])
    }
}

// ── BallId ───────────────────────────────────────────────────────────────────

/// The committing hash of a stabilized unit: `H(unit, sorted(parent_balls),
/// sorted(skiplist_balls), is_nonserial?)` per §4.1.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BallId(pub [u8; 32]);

impl BallId {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_b64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, base64::DecodeError> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD.decode(s)?;
        if bytes.len() != 32 {
            return Err(base64::DecodeError::InvalidLength(bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for BallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b64())
    }
}

impl fmt::Debug for BallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BallId({}…)", &self.to_b64()[..12])
    }
}

// ── Address ──────────────────────────────────────────────────────────────────

/// The content-hash of a definition (script tree), truncated with a
/// BCH-style checksum. 20-byte payload + 4-byte checksum, rendered as
/// base58 for operator-facing text (wallet, CLI, RPC).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; 24]);

impl Address {
    pub fn from_bytes(b: [u8; 24]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 24] {
        &self.0
    }

    pub fn to_b58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    pub fn from_b58(s: &str) -> Result<Self, bs58::decode::Error> {
        let bytes = bs58::decode(s).into_vec()?;
        if bytes.len() != 24 {
            return Err(bs58::decode::Error::BufferTooSmall);
        }
        let mut arr = [0u8; 24];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b58())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.to_b58();
        write!(f, "Address({})", &s[..8.min(s.len())])
    }
}

// ── Signing keys ─────────────────────────────────────────────────────────────

/// Dilithium2 public key (1312 bytes per NIST FIPS 204).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(pub Vec<u8>);

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}b)", self.0.len())
    }
}

/// Dilithium2 signature (2420 bytes per NIST FIPS 204).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}b)", self.0.len())
    }
}

// ── Sequence state (§3.2) ─────────────────────────────────────────────────────

/// The double-spend-resolution state of a unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sequence {
    Good,
    TempBad,
    FinalBad,
}

impl Default for Sequence {
    fn default() -> Self {
        Sequence::Good
    }
}
