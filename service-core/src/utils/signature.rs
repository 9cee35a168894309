use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`.
pub fn sign(secret: &[u8], payload: &str) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signature produced by [`sign`] using constant-time comparison.
pub fn verify(secret: &[u8], payload: &str, signature: &str) -> Result<bool, anyhow::Error> {
    let expected = sign(secret, payload)?;

    let expected_bytes = expected.as_bytes();
    let signature_bytes = signature.as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(signature_bytes).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn test_sign_and_verify() {
        let signature = sign(SECRET, "eyJ1c2VyIjpudWxsfQ").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify(SECRET, "eyJ1c2VyIjpudWxsfQ", &signature).unwrap());
    }

    #[test]
    fn test_tampered_payload() {
        let signature = sign(SECRET, "payload-a").unwrap();
        assert!(!verify(SECRET, "payload-b", &signature).unwrap());
    }

    #[test]
    fn test_wrong_secret() {
        let signature = sign(SECRET, "payload").unwrap();
        assert!(!verify(b"another-secret", "payload", &signature).unwrap());
    }

    #[test]
    fn test_truncated_signature() {
        let signature = sign(SECRET, "payload").unwrap();
        assert!(!verify(SECRET, "payload", &signature[..10]).unwrap());
    }
}
