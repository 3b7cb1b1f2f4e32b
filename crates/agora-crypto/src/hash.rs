use serde_json::Value;
use sha2::{Digest, Sha256};
use sha3::Keccak256;

use agora_core::canonical::canonical_json;

/// SHA-256 of arbitrary bytes → 32-byte array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of arbitrary bytes → lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Keccak-256 (Ethereum) of arbitrary bytes → 32-byte array.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash of acceptance criteria: SHA-256 over the canonical JSON encoding,
/// lowercase hex. This is the value the seller echoes back at accept time.
pub fn criteria_hash(criteria: &Value) -> String {
    sha256_hex(canonical_json(criteria).as_bytes())
}

/// EIP-55 checksummed text form of a 20-byte Ethereum address.
pub fn eip55_address(address: &[u8; 20]) -> String {
    let lower = hex::encode(address);
    let digest = keccak256(lower.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, ch) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 { digest[i / 2] >> 4 } else { digest[i / 2] & 0x0f };
        if ch.is_ascii_alphabetic() && nibble >= 8 {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch);
        }
    }
    out
}
