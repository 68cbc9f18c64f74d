use braid_core::types::{PublicKey as BraidPublicKey, Signature as BraidSignature};
use pqcrypto_dilithium::dilithium2;
use pqcrypto_traits::sign::{DetachedSignature, PublicKey, SecretKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key length: expected {expected}, got {got}")]
    InvalidPublicKeyLength { expected: usize, got: usize },
}

/// Sign `message` with a Dilithium2 secret key. Returns a detached signature.
pub fn sign(secret_key_bytes: &[u8], message: &[u8]) -> Result<BraidSignature, SignatureError> {
    let sk = dilithium2::SecretKey::from_bytes(secret_key_bytes)
        .map_err(|_| SignatureError::InvalidSignature)?;
    let sig = dilithium2::detached_sign(message, &sk);
    Ok(BraidSignature(sig.as_bytes().to_vec()))
}

/// Verify a detached Dilithium2 signature. Used by the `sig` definition
/// operator when evaluating an author's authentifiers against the unit id.
pub fn verify_signature(
    public_key: &BraidPublicKey,
    message: &[u8],
    signature: &BraidSignature,
) -> Result<(), SignatureError> {
    let pk = dilithium2::PublicKey::from_bytes(&public_key.0).map_err(|_| {
        SignatureError::InvalidPublicKeyLength {
            expected: dilithium2::public_key_bytes(),
            got: public_key.0.len(),
        }
    })?;
    let sig = dilithium2::DetachedSignature::from_bytes(&signature.0)
        .map_err(|_| SignatureError::InvalidSignature)?;
    dilithium2::verify_detached_signature(&sig, message, &pk)
        .map_err(|_| SignatureError::InvalidSignature)
}

/// Stateless signer helper used by unit builders (`braid-wallet`, `braid-genesis`).
pub struct Signer {
    pub public_key: BraidPublicKey,
    secret_key_bytes: zeroize::Zeroizing<Vec<u8>>,
}

impl Signer {
    pub fn from_secret_key_bytes(sk_bytes: Vec<u8>, pk_bytes: Vec<u8>) -> Self {
        Self {
            public_key: BraidPublicKey(pk_bytes),
            secret_key_bytes: zeroize::Zeroizing::new(sk_bytes),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Result<BraidSignature, SignatureError> {
        sign(&self.secret_key_bytes, message)
    }

    pub fn verify(&self, message: &[u8], sig: &BraidSignature) -> Result<(), SignatureError> {
        verify_signature(&self.public_key, message, sig)
    }
}
