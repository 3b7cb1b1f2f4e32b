use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Sign an outbound webhook body: `hex(HMAC_SHA256(secret, timestamp + "." + body))`.
/// Receivers recompute this over the `X-Webhook-Timestamp` header and the raw
/// body to authenticate the push.
pub fn sign_webhook(secret: &str, timestamp: &str, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
