//! Webhook signature verification using HMAC-SHA256.
//!
//! The forge signs webhook payloads with a shared secret and sends the
//! signature in the `X-Hub-Signature-256` header as `sha256=<hex>`.
//! Verification runs over the exact raw request body, before any parsing,
//! and uses a constant-time comparison.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Why a signature was rejected. Each variant maps to HTTP 401 in the
/// receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// The signature header was absent.
    #[error("missing X-Hub-Signature-256 header")]
    Missing,

    /// The header was not `sha256=` followed by non-empty hex.
    #[error("malformed signature header")]
    Malformed,

    /// The computed MAC did not match the provided one.
    #[error("invalid signature")]
    Invalid,
}

/// Verifies a webhook signature header against the payload and secret.
///
/// `header` is the raw `X-Hub-Signature-256` value, or `None` when the
/// header was absent.
pub fn validate_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: &[u8],
) -> Result<(), SignatureError> {
    let header = match header {
        None | Some("") => return Err(SignatureError::Missing),
        Some(value) => value,
    };

    let hex_sig = header
        .strip_prefix("sha256=")
        .ok_or(SignatureError::Malformed)?;
    if hex_sig.is_empty() {
        return Err(SignatureError::Malformed);
    }
    let provided = hex::decode(hex_sig).map_err(|_| SignatureError::Malformed)?;

    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::Invalid)?;
    mac.update(payload);

    // Constant-time comparison via the HMAC library.
    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::Invalid)
}

/// Computes the HMAC-SHA256 signature of a payload. Used for generating
/// expected signatures in tests.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a signature as a header value, `sha256=<hex>`.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn signed_header(payload: &[u8], secret: &[u8]) -> String {
        format_signature_header(&compute_signature(payload, secret))
    }

    // ─── Unit tests ───

    #[test]
    fn valid_signature_accepted() {
        let payload = b"Hello, World!";
        let secret = b"It's a Secret to Everybody";
        let header = signed_header(payload, secret);

        assert!(validate_signature(payload, Some(&header), secret).is_ok());
    }

    #[test]
    fn missing_header_rejected() {
        assert_eq!(
            validate_signature(b"payload", None, b"secret"),
            Err(SignatureError::Missing)
        );
        assert_eq!(
            validate_signature(b"payload", Some(""), b"secret"),
            Err(SignatureError::Missing)
        );
    }

    #[test]
    fn malformed_headers_rejected() {
        let payload = b"payload";
        let secret = b"secret";

        for header in ["sha256=", "sha256=zzzz", "sha256=abc", "sha1=abcd", "abcd"] {
            assert_eq!(
                validate_signature(payload, Some(header), secret),
                Err(SignatureError::Malformed),
                "header should be malformed: {header:?}"
            );
        }
    }

    #[test]
    fn wrong_secret_rejected() {
        let payload = b"test payload";
        let header = signed_header(payload, b"correct-secret");

        assert_eq!(
            validate_signature(payload, Some(&header), b"wrong-secret"),
            Err(SignatureError::Invalid)
        );
    }

    #[test]
    fn modified_payload_rejected() {
        let secret = b"secret";
        let header = signed_header(b"original payload", secret);

        assert_eq!(
            validate_signature(b"modified payload", Some(&header), secret),
            Err(SignatureError::Invalid)
        );
    }

    #[test]
    fn all_zero_signature_rejected() {
        let payload = b"payload";
        let header = format!("sha256={}", "0".repeat(64));

        assert_eq!(
            validate_signature(payload, Some(&header), b"secret"),
            Err(SignatureError::Invalid)
        );
    }

    #[test]
    fn empty_payload_and_empty_secret_still_verify() {
        let header = signed_header(b"", b"");
        assert!(validate_signature(b"", Some(&header), b"").is_ok());
    }

    #[test]
    fn signature_is_32_bytes() {
        assert_eq!(compute_signature(b"any payload", b"any secret").len(), 32);
    }

    // ─── Property tests ───

    proptest! {
        /// Signing and verifying with the same secret always succeeds.
        #[test]
        fn prop_sign_verify_roundtrip(payload: Vec<u8>, secret: Vec<u8>) {
            let header = signed_header(&payload, &secret);
            prop_assert!(validate_signature(&payload, Some(&header), &secret).is_ok());
        }

        /// Verifying with a different secret always fails.
        #[test]
        fn prop_wrong_secret_fails(payload: Vec<u8>, secret1: Vec<u8>, secret2: Vec<u8>) {
            prop_assume!(secret1 != secret2);

            let header = signed_header(&payload, &secret1);
            prop_assert_eq!(
                validate_signature(&payload, Some(&header), &secret2),
                Err(SignatureError::Invalid)
            );
        }

        /// Flipping any single byte of the payload causes rejection.
        #[test]
        fn prop_payload_bit_flip_fails(
            payload in proptest::collection::vec(any::<u8>(), 1..64),
            secret: Vec<u8>,
            index in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let header = signed_header(&payload, &secret);

            let mut tampered = payload.clone();
            let i = index.index(tampered.len());
            tampered[i] ^= flip;

            prop_assert_eq!(
                validate_signature(&tampered, Some(&header), &secret),
                Err(SignatureError::Invalid)
            );
        }

        /// Flipping any single hex digit of the signature causes rejection.
        #[test]
        fn prop_signature_bit_flip_fails(
            payload: Vec<u8>,
            secret: Vec<u8>,
            index in any::<prop::sample::Index>(),
        ) {
            let signature = compute_signature(&payload, &secret);
            let hex_sig = hex::encode(&signature);

            let mut bytes = hex_sig.into_bytes();
            let i = index.index(bytes.len());
            // Rotate within the hex alphabet so the header stays valid hex.
            bytes[i] = match bytes[i] {
                b'9' => b'a',
                b'f' => b'0',
                other => other + 1,
            };
            let tampered = format!("sha256={}", String::from_utf8(bytes).unwrap());

            prop_assert_eq!(
                validate_signature(&payload, Some(&tampered), &secret),
                Err(SignatureError::Invalid)
            );
        }

        /// Malformed headers never panic.
        #[test]
        fn prop_arbitrary_header_no_panic(header: String, payload: Vec<u8>, secret: Vec<u8>) {
            let _ = validate_signature(&payload, Some(&header), &secret);
        }
    }
}
