pub mod dilithium;
pub mod hash;
pub mod keypair;

pub use dilithium::{sign, verify_signature, Signer};
pub use hash::{canonical_serialize, chash_address, hash_value, sha256, verify_chash};
pub use keypair::KeyPair;
