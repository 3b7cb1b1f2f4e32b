//! BIP-32 child key derivation over secp256k1, restricted to the BIP-44
//! Ethereum path the deposit-address scheme uses: `m/44'/60'/0'/0/{index}`.
//!
//! The platform seed is raw entropy (64 bytes recommended); derivation is
//! fully deterministic, so a given (seed, index) pair always yields the same
//! address and recovery after data loss is a re-scan.

use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::Sha512;
use zeroize::Zeroize;

use agora_core::MarketError;

use crate::hash::{eip55_address, keccak256};

type HmacSha512 = Hmac<Sha512>;

const HARDENED: u32 = 0x8000_0000;

struct ExtendedKey {
    secret: SecretKey,
    chain_code: [u8; 32],
}

fn hmac512(key: &[u8], data: &[u8]) -> Result<[u8; 64], MarketError> {
    let mut mac = HmacSha512::new_from_slice(key)
        .map_err(|e| MarketError::Internal(format!("hmac init: {e}")))?;
    mac.update(data);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 64];
    out.copy_from_slice(&digest);
    Ok(out)
}

fn master_from_seed(seed: &[u8]) -> Result<ExtendedKey, MarketError> {
    let mut i = hmac512(b"Bitcoin seed", seed)?;
    let secret = SecretKey::from_slice(&i[..32])
        .map_err(|_| MarketError::Internal("unusable HD seed".into()))?;
    let mut chain_code = [0u8; 32];
    chain_code.copy_from_slice(&i[32..]);
    i.zeroize();
    Ok(ExtendedKey { secret, chain_code })
}

fn derive_child(
    secp: &Secp256k1<secp256k1::All>,
    parent: &ExtendedKey,
    index: u32,
) -> Result<ExtendedKey, MarketError> {
    let mut data = Vec::with_capacity(37);
    if index >= HARDENED {
        data.push(0);
        data.extend_from_slice(&parent.secret.secret_bytes());
    } else {
        let pubkey = PublicKey::from_secret_key(secp, &parent.secret);
        data.extend_from_slice(&pubkey.serialize());
    }
    data.extend_from_slice(&index.to_be_bytes());

    let mut i = hmac512(&parent.chain_code, &data)?;
    data.zeroize();

    let tweak_bytes: [u8; 32] = i[..32]
        .try_into()
        .map_err(|_| MarketError::Internal("hmac output length".into()))?;
    let tweak = Scalar::from_be_bytes(tweak_bytes)
        .map_err(|_| MarketError::Internal("child key out of range".into()))?;
    let secret = parent
        .secret
        .add_tweak(&tweak)
        .map_err(|_| MarketError::Internal("child key derivation failed".into()))?;

    let mut chain_code = [0u8; 32];
    chain_code.copy_from_slice(&i[32..]);
    i.zeroize();
    Ok(ExtendedKey { secret, chain_code })
}

/// Derive the Ethereum-style deposit address for `index` from the platform
/// seed at `m/44'/60'/0'/0/{index}`. Returns the EIP-55 text form and the
/// raw 20 bytes.
pub fn derive_deposit_address(seed: &[u8], index: u32) -> Result<(String, [u8; 20]), MarketError> {
    if seed.len() < 16 {
        return Err(MarketError::Validation("HD seed must be at least 16 bytes".into()));
    }
    if index >= HARDENED {
        return Err(MarketError::Validation("derivation index out of range".into()));
    }

    let secp = Secp256k1::new();
    let mut key = master_from_seed(seed)?;
    for step in [44 | HARDENED, 60 | HARDENED, HARDENED, 0, index] {
        key = derive_child(&secp, &key, step)?;
    }

    let pubkey = PublicKey::from_secret_key(&secp, &key.secret);
    let uncompressed = pubkey.serialize_uncompressed();
    let digest = keccak256(&uncompressed[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    Ok((eip55_address(&address), address))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: [u8; 32] = [7u8; 32];

    #[test]
    fn derivation_is_deterministic() {
        let (a1, raw1) = derive_deposit_address(&SEED, 0).unwrap();
        let (a2, raw2) = derive_deposit_address(&SEED, 0).unwrap();
        assert_eq!(a1, a2);
        assert_eq!(raw1, raw2);
    }

    #[test]
    fn indexes_yield_distinct_addresses() {
        let (a0, _) = derive_deposit_address(&SEED, 0).unwrap();
        let (a1, _) = derive_deposit_address(&SEED, 1).unwrap();
        let (a2, _) = derive_deposit_address(&SEED, 2).unwrap();
        assert_ne!(a0, a1);
        assert_ne!(a1, a2);
    }

    #[test]
    fn seeds_yield_distinct_addresses() {
        let (a, _) = derive_deposit_address(&SEED, 0).unwrap();
        let (b, _) = derive_deposit_address(&[8u8; 32], 0).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn address_shape() {
        let (addr, raw) = derive_deposit_address(&SEED, 5).unwrap();
        assert_eq!(addr.len(), 42);
        assert!(addr.starts_with("0x"));
        assert_eq!(hex::encode(raw), addr[2..].to_lowercase());
    }

    #[test]
    fn short_seed_rejected() {
        assert!(derive_deposit_address(&[1u8; 8], 0).is_err());
    }
}
