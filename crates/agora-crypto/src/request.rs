use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier};
use rand::RngCore;

use crate::hash::sha256_hex;
use crate::keypair::{parse_public_key, KeyPair};

/// Build the canonical signed message for a request:
/// `timestamp + "\n" + METHOD + "\n" + path + "\n" + sha256_hex(body)`.
/// The method is uppercased and the path carries no query string.
pub fn signature_message(timestamp: &str, method: &str, path: &str, body: &[u8]) -> Vec<u8> {
    let body_hash = sha256_hex(body);
    format!("{timestamp}\n{}\n{path}\n{body_hash}", method.to_uppercase()).into_bytes()
}

/// Sign a request with the agent's keypair, returning lowercase-hex signature.
pub fn sign_request(
    keypair: &KeyPair,
    timestamp: &str,
    method: &str,
    path: &str,
    body: &[u8],
) -> String {
    keypair.sign_hex(&signature_message(timestamp, method, path, body))
}

/// Verify a detached Ed25519 request signature. Returns false on any
/// malformed input rather than erroring; callers map false to 403.
pub fn verify_request(
    public_key_hex: &str,
    signature_hex: &str,
    timestamp: &str,
    method: &str,
    path: &str,
    body: &[u8],
) -> bool {
    let Ok(verifying_key) = parse_public_key(public_key_hex) else {
        return false;
    };
    let Some(sig_bytes) = hex::decode(signature_hex)
        .ok()
        .and_then(|v| <[u8; 64]>::try_from(v).ok())
    else {
        return false;
    };
    let message = signature_message(timestamp, method, path, body);
    verifying_key
        .verify(&message, &Signature::from_bytes(&sig_bytes))
        .is_ok()
}

/// Check an ISO-8601 timestamp against `now` with a maximum absolute skew.
/// Naive timestamps (no offset) fail to parse and are rejected.
pub fn is_timestamp_fresh(timestamp: &str, max_age_secs: i64, now: DateTime<Utc>) -> bool {
    match DateTime::parse_from_rfc3339(timestamp) {
        Ok(ts) => (now - ts.with_timezone(&Utc)).num_seconds().abs() <= max_age_secs,
        Err(_) => false,
    }
}

/// A 16-byte random nonce, lowercase hex.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_signature() {
        let kp = KeyPair::generate();
        let ts = "2026-08-01T12:00:00+00:00";
        let sig = sign_request(&kp, ts, "post", "/jobs", b"{}");
        assert!(verify_request(&kp.public_key_hex(), &sig, ts, "POST", "/jobs", b"{}"));
    }

    #[test]
    fn tampered_body_fails() {
        let kp = KeyPair::generate();
        let ts = "2026-08-01T12:00:00+00:00";
        let sig = sign_request(&kp, ts, "POST", "/jobs", b"{}");
        assert!(!verify_request(&kp.public_key_hex(), &sig, ts, "POST", "/jobs", b"{\"x\":1}"));
    }

    #[test]
    fn wrong_path_fails() {
        let kp = KeyPair::generate();
        let ts = "2026-08-01T12:00:00+00:00";
        let sig = sign_request(&kp, ts, "POST", "/jobs", b"");
        assert!(!verify_request(&kp.public_key_hex(), &sig, ts, "POST", "/agents", b""));
    }

    #[test]
    fn freshness_window() {
        let now = Utc::now();
        let fresh = now.to_rfc3339();
        assert!(is_timestamp_fresh(&fresh, 30, now));

        let stale = (now - chrono::Duration::seconds(31)).to_rfc3339();
        assert!(!is_timestamp_fresh(&stale, 30, now));

        // Future skew counts too.
        let future = (now + chrono::Duration::seconds(31)).to_rfc3339();
        assert!(!is_timestamp_fresh(&future, 30, now));
    }

    #[test]
    fn naive_timestamp_rejected() {
        assert!(!is_timestamp_fresh("2026-08-01T12:00:00", 30, Utc::now()));
    }

    #[test]
    fn nonces_do_not_collide() {
        assert_ne!(generate_nonce(), generate_nonce());
        assert_eq!(generate_nonce().len(), 32);
    }
}
