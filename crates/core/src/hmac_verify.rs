//! Constant-time HMAC-SHA256 verification of the task-manager's signed
//! webhook body.
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifies `signature_hex` (lowercase hex) against the HMAC-SHA256 of
/// `raw_body` keyed by `secret`. The comparison inside `hmac::Mac` is
/// constant-time regardless of input length.
pub fn verify(secret: &str, raw_body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);

    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_a_correct_signature() {
        let body = br#"{"events":[]}"#;
        let sig = sign("shared-secret", body);
        assert!(verify("shared-secret", body, &sig));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = br#"{"events":[]}"#;
        let sig = sign("shared-secret", body);
        assert!(!verify("different-secret", body, &sig));
    }

    #[test]
    fn rejects_tampered_body() {
        let body = br#"{"events":[]}"#;
        let sig = sign("shared-secret", body);
        assert!(!verify("shared-secret", br#"{"events":[{}]}"#, &sig));
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(!verify("shared-secret", b"body", "not-hex"));
    }
}
