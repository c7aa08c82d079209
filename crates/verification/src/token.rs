//! Token generation and stored records

use std::fmt;
use std::time::Duration;

use backend::TokenPurpose;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Validity window of a freshly issued token.
pub const TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Random bytes per token (43 URL-safe Base64 characters).
const TOKEN_BYTES: usize = 32;

/// What persistence holds for one token.
///
/// Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub subject_email: String,
    pub purpose: TokenPurpose,
    pub issued_at: u64,
    pub expires_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<u64>,
}

impl StoredToken {
    /// Record for a token issued at `now`.
    pub fn issued(subject_email: impl Into<String>, purpose: TokenPurpose, now: u64) -> Self {
        Self {
            subject_email: subject_email.into(),
            purpose,
            issued_at: now,
            expires_at: now + TOKEN_TTL.as_millis() as u64,
            consumed_at: None,
        }
    }

    /// Valid up to and including `expires_at`.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    pub fn is_valid(&self, now: u64) -> bool {
        !self.is_consumed() && !self.is_expired(now)
    }
}

/// A freshly issued token: the raw value plus its record.
///
/// The raw value exists only here, on its way to the notifier.
#[derive(Clone, PartialEq, Eq)]
pub struct VerificationToken {
    pub token: String,
    pub subject_email: String,
    pub purpose: TokenPurpose,
    pub issued_at: u64,
    pub expires_at: u64,
    pub consumed_at: Option<u64>,
}

impl VerificationToken {
    pub fn new(token: String, record: StoredToken) -> Self {
        Self {
            token,
            subject_email: record.subject_email,
            purpose: record.purpose,
            issued_at: record.issued_at,
            expires_at: record.expires_at,
            consumed_at: record.consumed_at,
        }
    }

    /// Persistence key of this token.
    pub fn key(&self) -> String {
        token_key(&self.token)
    }
}

impl fmt::Debug for VerificationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationToken")
            .field("token", &"[REDACTED]")
            .field("subject_email", &self.subject_email)
            .field("purpose", &self.purpose)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("consumed_at", &self.consumed_at)
            .finish()
    }
}

/// Generate an unguessable token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Persistence key for a token: `BASE64URL(SHA256(token))`.
pub fn token_key(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_url_safe_base64() {
        let token = generate_token();
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "token must be URL-safe base64 (no padding): {token}"
        );
    }

    #[test]
    fn tokens_are_unique() {
        let tokens: std::collections::HashSet<_> = (0..100).map(|_| generate_token()).collect();
        assert_eq!(tokens.len(), 100);
    }

    #[test]
    fn key_matches_known_digest() {
        // SHA256("hello") in base64url
        assert_eq!(token_key("hello"), "LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ");
        assert_ne!(token_key("hello"), "hello");
    }

    #[test]
    fn expiry_is_one_hour_inclusive() {
        let record = StoredToken::issued("a@b.com", TokenPurpose::PasswordReset, 1_000);
        assert_eq!(record.expires_at, 1_000 + 3_600_000);
        assert!(record.is_valid(record.expires_at));
        assert!(!record.is_valid(record.expires_at + 1));
        assert!(record.is_expired(record.expires_at + 1));
    }

    #[test]
    fn consumed_record_is_invalid() {
        let mut record = StoredToken::issued("a@b.com", TokenPurpose::EmailVerification, 0);
        record.consumed_at = Some(10);
        assert!(!record.is_valid(10));
        assert!(!record.is_expired(10));
    }

    #[test]
    fn record_serializes_without_raw_token() {
        let record = StoredToken::issued("a@b.com", TokenPurpose::PasswordReset, 0);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"purpose\":\"password_reset\""));
        assert!(!json.contains("consumed_at"));
    }

    #[test]
    fn debug_redacts_token() {
        let token = VerificationToken::new(
            "raw-token-value".into(),
            StoredToken::issued("a@b.com", TokenPurpose::PasswordReset, 0),
        );
        assert!(!format!("{token:?}").contains("raw-token-value"));
    }
}
