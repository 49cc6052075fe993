//! Signed handshake tokens.
//!
//! The web tier issues each browser a short-lived token; the WebSocket
//! gateway verifies it during the handshake before asking the registry
//! to promote the matching waiting session.
//!
//! Token layout (all segments within `[a-zA-Z0-9_\-:]`):
//!
//! ```text
//! <value> ":" <base64(timestamp)> ":" <base64(hmac-sha256)>
//! ```
//!
//! The HMAC covers `value:timestamp` and is truncated to
//! [`SIGNATURE_BYTES`], keeping the full token inside the handshake
//! pattern's 100-character bound. Verification is constant-time.

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Truncated HMAC length carried in the signature segment.
pub const SIGNATURE_BYTES: usize = 24;

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// TokenSigner
// ============================================================================

/// Issues and verifies timestamped signed tokens.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use messenger_relay::TokenSigner;
///
/// let signer = TokenSigner::new(b"secret-key", 50);
/// let token = signer.issue().unwrap();
/// let value = signer.verify(&token, Duration::from_secs(15)).unwrap();
/// assert!(token.starts_with(&value));
/// ```
#[derive(Debug, Clone)]
pub struct TokenSigner {
    /// HMAC secret key.
    key: Vec<u8>,
    /// Length of the random value segment.
    token_length: usize,
}

impl TokenSigner {
    /// Creates a signer with the given secret and value length.
    #[inline]
    #[must_use]
    pub fn new(secret: impl AsRef<[u8]>, token_length: usize) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
            token_length,
        }
    }

    /// Issues a fresh token: random value, current timestamp, signature.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the secret key is unusable.
    pub fn issue(&self) -> Result<String> {
        self.sign(&self.entropy())
    }

    /// Signs an existing value with the current timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the secret key is unusable.
    pub fn sign(&self, value: &str) -> Result<String> {
        self.sign_at(unix_now(), value)
    }

    /// Verifies `token` and returns its value segment.
    ///
    /// The signature is checked first (constant-time), then the age.
    ///
    /// # Errors
    ///
    /// - [`Error::TokenMalformed`] if the token does not split into
    ///   value, timestamp and signature segments
    /// - [`Error::TokenSignature`] on signature mismatch
    /// - [`Error::TokenExpired`] if older than `max_age`
    pub fn verify(&self, token: &str, max_age: Duration) -> Result<String> {
        self.verify_at(unix_now(), token, max_age)
    }

    /// Signing with an explicit clock, for expiry tests.
    pub(crate) fn sign_at(&self, now_secs: u64, value: &str) -> Result<String> {
        let timestamp = URL_SAFE_NO_PAD.encode(now_secs.to_be_bytes());
        let signature = self.signature_for(value, &timestamp)?;
        Ok(format!("{value}:{timestamp}:{signature}"))
    }

    /// Verification with an explicit clock, for expiry tests.
    pub(crate) fn verify_at(
        &self,
        now_secs: u64,
        token: &str,
        max_age: Duration,
    ) -> Result<String> {
        let mut segments = token.rsplitn(3, ':');
        let signature = segments
            .next()
            .ok_or_else(|| Error::token_malformed("missing signature segment"))?;
        let timestamp = segments
            .next()
            .ok_or_else(|| Error::token_malformed("missing timestamp segment"))?;
        let value = segments
            .next()
            .ok_or_else(|| Error::token_malformed("missing value segment"))?;

        let sig_bytes = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| Error::token_malformed("signature is not base64"))?;

        let mut mac = self.mac()?;
        mac.update(value.as_bytes());
        mac.update(b":");
        mac.update(timestamp.as_bytes());
        mac.verify_truncated_left(&sig_bytes)
            .map_err(|_| Error::TokenSignature)?;

        let ts_bytes: [u8; 8] = URL_SAFE_NO_PAD
            .decode(timestamp)
            .map_err(|_| Error::token_malformed("timestamp is not base64"))?
            .try_into()
            .map_err(|_| Error::token_malformed("timestamp has wrong width"))?;
        let issued_at = u64::from_be_bytes(ts_bytes);

        let age = now_secs.saturating_sub(issued_at);
        if age > max_age.as_secs() {
            return Err(Error::token_expired(age, max_age.as_secs()));
        }

        Ok(value.to_string())
    }

    /// Computes the truncated base64 signature over `value:timestamp`.
    fn signature_for(&self, value: &str, timestamp: &str) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(value.as_bytes());
        mac.update(b":");
        mac.update(timestamp.as_bytes());
        let digest = mac.finalize().into_bytes();
        Ok(URL_SAFE_NO_PAD.encode(&digest[..SIGNATURE_BYTES]))
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|_| Error::config("invalid HMAC key length"))
    }

    /// Generates a hex value of the configured length.
    fn entropy(&self) -> String {
        let mut value = String::with_capacity(self.token_length + 32);
        while value.len() < self.token_length {
            value.push_str(&Uuid::new_v4().simple().to_string());
        }
        value.truncate(self.token_length);
        value
    }
}

/// Seconds since the Unix epoch.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_AGE: Duration = Duration::from_secs(15);

    fn signer() -> TokenSigner {
        TokenSigner::new(b"test-secret", 50)
    }

    #[test]
    fn test_issue_and_verify() {
        let signer = signer();
        let token = signer.issue().expect("issue");
        let value = signer.verify(&token, MAX_AGE).expect("verify");

        assert_eq!(value.len(), 50);
        assert!(token.starts_with(&value));
    }

    #[test]
    fn test_token_matches_handshake_pattern() {
        let signer = signer();
        let token = signer.issue().expect("issue");

        assert!(token.len() >= 50 && token.len() <= 100, "len={}", token.len());
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':'))
        );
    }

    #[test]
    fn test_tampered_value_rejected() {
        let signer = signer();
        let token = signer.issue().expect("issue");

        let mut tampered = token.clone();
        let original = tampered.remove(0);
        let replacement = if original == '0' { '1' } else { '0' };
        tampered.insert(0, replacement);

        let err = signer.verify(&tampered, MAX_AGE).unwrap_err();
        assert!(matches!(err, Error::TokenSignature));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = signer().issue().expect("issue");
        let other = TokenSigner::new(b"other-secret", 50);

        let err = other.verify(&token, MAX_AGE).unwrap_err();
        assert!(matches!(err, Error::TokenSignature));
    }

    #[test]
    fn test_expired_token_rejected() {
        let signer = signer();
        let token = signer.sign_at(1_000_000, "a".repeat(50).as_str()).expect("sign");

        // 15s later still verifies; 16s later does not.
        assert!(signer.verify_at(1_000_015, &token, MAX_AGE).is_ok());
        let err = signer.verify_at(1_000_016, &token, MAX_AGE).unwrap_err();
        assert!(matches!(
            err,
            Error::TokenExpired {
                age_secs: 16,
                max_age_secs: 15
            }
        ));
    }

    #[test]
    fn test_future_timestamp_not_expired() {
        let signer = signer();
        let token = signer.sign_at(2_000_000, "b".repeat(50).as_str()).expect("sign");

        // Clock skew backwards: age saturates to zero.
        assert!(signer.verify_at(1_999_990, &token, MAX_AGE).is_ok());
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let signer = signer();

        for bad in ["", "novalue", "a:b", "a:!!!:???"] {
            let err = signer.verify(bad, MAX_AGE).unwrap_err();
            assert!(err.is_token_error(), "{bad:?} -> {err}");
        }
    }

    #[test]
    fn test_entropy_respects_length() {
        for length in [8, 50, 64, 100] {
            let signer = TokenSigner::new(b"k", length);
            assert_eq!(signer.entropy().len(), length);
        }
    }
}
