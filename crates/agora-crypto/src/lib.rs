pub mod hash;
pub mod hd;
pub mod keypair;
pub mod request;
pub mod webhook;

pub use hash::{criteria_hash, eip55_address, keccak256, sha256, sha256_hex};
pub use hd::derive_deposit_address;
pub use keypair::KeyPair;
pub use request::{
    generate_nonce, is_timestamp_fresh, sign_request, signature_message, verify_request,
};
pub use webhook::sign_webhook;
