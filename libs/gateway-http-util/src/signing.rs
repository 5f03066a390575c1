use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Computes `hex(HMAC-SHA256(secret, body))`, covering exactly the given bytes.
///
/// Used to populate the `X-O2IMS-Signature` header on outbound webhook and
/// hub-federation requests. Deterministic: the same `(secret, body)` pair
/// always yields the same signature.
pub fn sign_body(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
