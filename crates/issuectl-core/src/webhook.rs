//! GitHub webhook signature verification (`X-Hub-Signature-256`).

use ring::hmac;
use subtle::ConstantTimeEq;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("missing or malformed signature header")]
    MalformedSignature,
    #[error("signature does not match payload")]
    SignatureMismatch,
}

/// Verify a GitHub webhook's `X-Hub-Signature-256` header against the raw
/// request body, using the configured webhook secret.
///
/// GitHub sends the header as `sha256=<hex digest>`. Comparison is
/// constant-time to avoid leaking timing information about how much of the
/// signature matched.
pub fn verify_webhook_signature(
    secret: &str,
    raw_body: &[u8],
    signature_header: &str,
) -> Result<(), WebhookError> {
    let hex_digest = signature_header
        .strip_prefix("sha256=")
        .ok_or(WebhookError::MalformedSignature)?;

    let expected = decode_hex(hex_digest).ok_or(WebhookError::MalformedSignature)?;

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let computed = hmac::sign(&key, raw_body);

    if computed.as_ref().ct_eq(&expected[..]).into() {
        Ok(())
    } else {
        Err(WebhookError::SignatureMismatch)
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
        let tag = hmac::sign(&key, body);
        let hex: String = tag.as_ref().iter().map(|b| format!("{:02x}", b)).collect();
        format!("sha256={hex}")
    }

    #[test]
    fn accepts_correctly_signed_payload() {
        let body = br#"{"action":"opened"}"#;
        let header = sign("topsecret", body);
        assert!(verify_webhook_signature("topsecret", body, &header).is_ok());
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = br#"{"action":"opened"}"#;
        let header = sign("topsecret", body);
        assert!(matches!(
            verify_webhook_signature("wrongsecret", body, &header),
            Err(WebhookError::SignatureMismatch)
        ));
    }

    #[test]
    fn rejects_tampered_body() {
        let body = br#"{"action":"opened"}"#;
        let header = sign("topsecret", body);
        let tampered = br#"{"action":"closed"}"#;
        assert!(matches!(
            verify_webhook_signature("topsecret", tampered, &header),
            Err(WebhookError::SignatureMismatch)
        ));
    }

    #[test]
    fn rejects_missing_prefix() {
        let body = b"{}";
        assert!(matches!(
            verify_webhook_signature("s", body, "deadbeef"),
            Err(WebhookError::MalformedSignature)
        ));
    }
}
