use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroize;

use agora_core::MarketError;

/// An agent's Ed25519 keypair.
///
/// The secret half is zeroized on drop; only the marketplace's own tooling
/// (tests, the treasury, demo clients) ever holds one — agents keep their
/// keys off-platform and the service stores public keys alone.
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self { signing: SigningKey::generate(&mut OsRng) }
    }

    /// Restore a keypair from a 32-byte secret key hex string.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, MarketError> {
        let mut bytes: [u8; 32] = hex::decode(secret_hex)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| MarketError::Validation("invalid secret key hex".into()))?;
        let signing = SigningKey::from_bytes(&bytes);
        bytes.zeroize();
        Ok(Self { signing })
    }

    /// Lowercase hex of the public key (64 chars).
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing.verifying_key().to_bytes())
    }

    /// Lowercase hex of the secret key. For key export in dev tooling only.
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    /// Sign `message`, returning the detached signature as lowercase hex.
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.signing.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ public_key: {} }}", self.public_key_hex())
    }
}

/// Parse a lowercase-hex Ed25519 public key.
pub fn parse_public_key(public_key_hex: &str) -> Result<VerifyingKey, MarketError> {
    let bytes: [u8; 32] = hex::decode(public_key_hex)
        .ok()
        .and_then(|v| v.try_into().ok())
        .ok_or_else(|| MarketError::Validation("invalid public key hex".into()))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|_| MarketError::Validation("invalid Ed25519 public key".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier};

    #[test]
    fn sign_and_verify() {
        let kp = KeyPair::generate();
        let sig_hex = kp.sign_hex(b"hello");
        let vk = parse_public_key(&kp.public_key_hex()).unwrap();
        let sig_bytes: [u8; 64] = hex::decode(sig_hex).unwrap().try_into().unwrap();
        assert!(vk.verify(b"hello", &Signature::from_bytes(&sig_bytes)).is_ok());
    }

    #[test]
    fn secret_roundtrip() {
        let kp = KeyPair::generate();
        let restored = KeyPair::from_secret_hex(&kp.secret_key_hex()).unwrap();
        assert_eq!(kp.public_key_hex(), restored.public_key_hex());
    }

    #[test]
    fn bad_public_key_rejected() {
        assert!(parse_public_key("zz").is_err());
        assert!(parse_public_key("abcd").is_err());
    }
}
