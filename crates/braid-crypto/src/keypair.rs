use braid_core::types::{Address, PublicKey, Signature};
use pqcrypto_dilithium::dilithium2;
use pqcrypto_traits::sign::{PublicKey as _, SecretKey as _};
use serde_json::json;
use zeroize::Zeroizing;

use crate::dilithium;
use crate::hash::chash_address;

/// A Dilithium2 keypair together with the on-chain `Address` its single-key
/// `sig` definition chashes to. The address is derived from `["sig",
/// {"pubkey": hex}]`, the same definition the script evaluator (C4) accepts
/// for single-signature authentication — this keypair is only ever able to
/// authorize units for that one definition.
#[derive(Serialize, Deserialize)]
pub struct KeyPair {
    pub address: Address,
    pub public_key: PublicKey,
    secret_key: Vec<u8>,
}

use serde::{Deserialize, Serialize};

/// The `["sig", {"pubkey": <hex>}]` definition this keypair's address chashes.
pub fn sig_definition(public_key: &PublicKey) -> serde_json::Value {
    json!(["sig", { "pubkey": hex::encode(&public_key.0) }])
}

impl KeyPair {
    /// Generate a fresh Dilithium2 keypair and derive its single-sig address.
    pub fn generate() -> Self {
        let (pk, sk) = dilithium2::keypair();
        let pk_bytes = pk.as_bytes().to_vec();
        let public_key = PublicKey(pk_bytes);
        let address = chash_address(&sig_definition(&public_key))
            .expect("sig definition of a freshly generated key is always canonical");
        Self {
            address,
            public_key,
            secret_key: sk.as_bytes().to_vec(),
        }
    }

    /// Restore a keypair from raw bytes (e.g. loaded from a wallet file).
    pub fn from_raw(pk_bytes: Vec<u8>, sk_bytes: Vec<u8>) -> Self {
        let public_key = PublicKey(pk_bytes);
        let address = chash_address(&sig_definition(&public_key))
            .expect("sig definition of a restored key is always canonical");
        Self {
            address,
            public_key,
            secret_key: sk_bytes,
        }
    }

    /// Sign `message` (typically a unit id) using this keypair's secret key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sk = Zeroizing::new(self.secret_key.clone());
        dilithium::sign(&sk, message).expect("sign with a freshly generated secret key is infallible")
    }

    pub fn secret_key_bytes(&self) -> &[u8] {
        &self.secret_key
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ address: {:?} }}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::verify_chash;

    #[test]
    fn generated_address_matches_sig_definition_chash() {
        let kp = KeyPair::generate();
        assert!(verify_chash(&sig_definition(&kp.public_key), &kp.address).unwrap());
    }

    #[test]
    fn from_raw_round_trips_address() {
        let kp = KeyPair::generate();
        let restored = KeyPair::from_raw(kp.public_key.0.clone(), kp.secret_key_bytes().to_vec());
        assert_eq!(kp.address, restored.address);
    }
}
