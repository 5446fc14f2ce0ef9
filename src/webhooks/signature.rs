//! HMAC-SHA256 payload signing.
//!
//! Every delivery carries an `X-Webhook-Signature` header of the form
//! `sha256=<hex-encoded-signature>`, computed over the exact body bytes with
//! the endpoint's secret. Receivers recompute it to authenticate the request.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Prefix of the header value naming the algorithm.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Computes the signature header value for a payload.
///
/// Deterministic: the same payload and secret always yield the same value.
///
/// # Example
///
/// ```
/// use webhook_engine::webhooks::signature::sign;
///
/// let sig = sign(br#"{"type":"invoice.created"}"#, "whsec");
/// assert!(sig.starts_with("sha256="));
/// assert_eq!(sig.len(), "sha256=".len() + 64);
/// ```
#[must_use]
pub fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac = new_mac(secret);
    mac.update(payload);
    let signature = hex::encode(mac.finalize().into_bytes());

    format!("{SIGNATURE_PREFIX}{signature}")
}

/// Verifies a signature in constant time.
///
/// Accepts the value with or without the `sha256=` prefix. Anything
/// malformed (another algorithm prefix, non-hex characters, wrong length)
/// is reported as a mismatch rather than an error.
#[must_use]
pub fn verify(payload: &[u8], signature: &str, secret: &str) -> bool {
    let hex_part = signature
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(signature);

    let Ok(expected) = hex::decode(hex_part) else {
        return false;
    };

    let mut mac = new_mac(secret);
    mac.update(payload);
    // verify_slice compares in constant time and rejects length mismatches
    mac.verify_slice(&expected).is_ok()
}

#[allow(clippy::expect_used)] // HMAC-SHA256 accepts any key size, cannot fail
fn new_mac(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC-SHA256 accepts any key size")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const BODY: &[u8] = br#"{"type":"invoice.created","data":{"amount":100},"timestamp":"2024-01-15T10:30:00Z"}"#;

    #[test]
    fn test_sign_known_vector() {
        // RFC 4231 test case 2
        let sig = sign(b"what do ya want for nothing?", "Jefe");
        assert_eq!(
            sig,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_sign_is_deterministic() {
        assert_eq!(sign(BODY, "secret"), sign(BODY, "secret"));
        assert_ne!(sign(BODY, "secret"), sign(BODY, "other"));
    }

    #[test]
    fn test_verify_with_and_without_prefix() {
        let sig = sign(BODY, "secret");
        assert!(verify(BODY, &sig, "secret"));
        assert!(verify(BODY, sig.trim_start_matches(SIGNATURE_PREFIX), "secret"));
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let sig = sign(BODY, "secret");
        assert!(!verify(BODY, &sig, "not-the-secret"));
    }

    #[test_case("" ; "empty")]
    #[test_case("sha256=" ; "prefix only")]
    #[test_case("sha256=zzzz" ; "not hex")]
    #[test_case("sha256=abcd" ; "too short")]
    #[test_case("sha1=5bdcc146bf60754e6a042426089575c75a003f08" ; "other algorithm")]
    fn test_verify_malformed_is_false(signature: &str) {
        assert!(!verify(BODY, signature, "secret"));
    }

    #[test]
    fn test_empty_secret_still_signs() {
        let sig = sign(BODY, "");
        assert!(verify(BODY, &sig, ""));
    }

    #[test]
    fn test_secret_longer_than_block_size() {
        // Keys past the 64-byte block are hashed first; both paths must sign.
        let long = "k".repeat(200);
        let sig = sign(BODY, &long);
        assert!(verify(BODY, &sig, &long));
        assert!(!verify(BODY, &sig, &long[..199]));
    }
}
