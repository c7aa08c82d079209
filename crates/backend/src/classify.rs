//! Error classification for collaborator and provider failures
//!
//! Turns a `BackendError` into an `AuthFailure` with user-facing text.
//! Resolution order:
//! 1. explicit machine code sent by the backend (`code_mismatch`, ...)
//! 2. marker substrings in the message, for backends that only send text
//! 3. the backend's own message
//! 4. the generic message for the failure kind
//!
//! The orchestrator decides the `ErrorKind`; this module only picks the text
//! and whether the credential may be retried.

use common::{AuthFailure, ErrorKind};

use crate::BackendError;

pub const INVALID_CODE_MESSAGE: &str = "Invalid verification code.";
pub const EXPIRED_CODE_MESSAGE: &str = "Code expired, request a new one.";
pub const PASSWORD_POLICY_MESSAGE: &str = "Password must be at least 8 characters long and \
contain an uppercase letter, a lowercase letter, a number, and a special character.";

/// Known failure causes that get dedicated user-facing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    CodeMismatch,
    ExpiredCode,
    PasswordPolicy,
}

impl Marker {
    fn message(self) -> &'static str {
        match self {
            Marker::CodeMismatch => INVALID_CODE_MESSAGE,
            Marker::ExpiredCode => EXPIRED_CODE_MESSAGE,
            Marker::PasswordPolicy => PASSWORD_POLICY_MESSAGE,
        }
    }
}

/// Message substrings identifying each cause, matched case-insensitively.
const CODE_MISMATCH_PATTERNS: &[&str] = &[
    "codemismatch",
    "code mismatch",
    "invalid verification code",
];

const EXPIRED_CODE_PATTERNS: &[&str] = &["expiredcode", "expired code", "code has expired"];

const PASSWORD_POLICY_PATTERNS: &[&str] = &[
    "invalidpassword",
    "password did not conform",
    "password policy",
];

fn marker_from_code(code: &str) -> Option<Marker> {
    match code.to_ascii_lowercase().as_str() {
        "code_mismatch" => Some(Marker::CodeMismatch),
        "expired_code" => Some(Marker::ExpiredCode),
        "invalid_password" => Some(Marker::PasswordPolicy),
        _ => None,
    }
}

fn marker_from_message(message: &str) -> Option<Marker> {
    let lower = message.to_lowercase();
    let table: [(&[&str], Marker); 3] = [
        (CODE_MISMATCH_PATTERNS, Marker::CodeMismatch),
        (EXPIRED_CODE_PATTERNS, Marker::ExpiredCode),
        (PASSWORD_POLICY_PATTERNS, Marker::PasswordPolicy),
    ];
    table
        .iter()
        .find(|(patterns, _)| patterns.iter().any(|p| lower.contains(p)))
        .map(|(_, marker)| *marker)
}

/// User-facing text for a collaborator error reported under `kind`.
pub fn user_message(kind: ErrorKind, error: &BackendError) -> String {
    match error {
        BackendError::Rejected { code, message } => {
            let marker = code
                .as_deref()
                .and_then(marker_from_code)
                .or_else(|| message.as_deref().and_then(marker_from_message));
            if let Some(marker) = marker {
                return marker.message().to_string();
            }
            match message.as_deref().map(str::trim) {
                Some(m) if !m.is_empty() => m.to_string(),
                _ => kind.default_message().to_string(),
            }
        }
        // Transport and protocol details are operator concerns; they are
        // logged by the caller, not shown.
        BackendError::Transport(_) | BackendError::Protocol(_) => {
            kind.default_message().to_string()
        }
    }
}

/// Classify a collaborator error reported under `kind`.
///
/// Transport failures stay retryable: the backend never saw the credential.
pub fn classify(kind: ErrorKind, error: &BackendError) -> AuthFailure {
    AuthFailure::new(kind, user_message(kind, error)).with_retryable(error.is_transport())
}

/// Classify an error reported by the identity provider on the redirect.
///
/// `description` must already be form-decoded (query extraction does that);
/// it is used verbatim, never decoded a second time.
pub fn provider_rejection(error: &str, description: Option<&str>) -> AuthFailure {
    let message = description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(String::from)
        .unwrap_or_else(|| match error {
            "access_denied" => "Sign-in was cancelled.".to_string(),
            _ => ErrorKind::ProviderRejected.default_message().to_string(),
        });
    AuthFailure::new(ErrorKind::ProviderRejected, message)
}
