//! Closed failure taxonomy for credential exchange and token redemption
//!
//! Every failure the callback orchestrator or the token store can produce is
//! one of these kinds, paired with a user-facing message. Raw collaborator
//! errors never cross those boundaries.

use std::fmt;

/// Kind of a failed exchange or redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Required collaborator missing or misconfigured
    Configuration,
    /// No authorization code on the callback
    MissingCredential,
    /// Identity provider reported an error before any exchange
    ProviderRejected,
    /// Exchange collaborator returned failure or errored
    ExchangeRejected,
    /// Verification token absent, already consumed, or for another flow
    InvalidToken,
    /// Verification token past its window
    ExpiredToken,
    /// Token valid but the account it names is gone
    SubjectNotFound,
}

impl ErrorKind {
    /// Stable snake_case label for JSON bodies and metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::MissingCredential => "missing_credential",
            ErrorKind::ProviderRejected => "provider_rejected",
            ErrorKind::ExchangeRejected => "exchange_rejected",
            ErrorKind::InvalidToken => "invalid_token",
            ErrorKind::ExpiredToken => "expired_token",
            ErrorKind::SubjectNotFound => "subject_not_found",
        }
    }

    /// Generic user-facing text used when nothing more specific is known.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => {
                "Sign-in is not configured correctly. Please try again later."
            }
            ErrorKind::MissingCredential => {
                "No authorization code was received. Please start the sign-in again."
            }
            ErrorKind::ProviderRejected => "The identity provider declined the sign-in.",
            ErrorKind::ExchangeRejected => "Login failed.",
            ErrorKind::InvalidToken => "Invalid verification code.",
            ErrorKind::ExpiredToken => "Code expired, request a new one.",
            ErrorKind::SubjectNotFound => "No account matches this verification code.",
        }
    }

    /// Whether the same credential may be retried after this kind of failure.
    ///
    /// Local failures (setup, validation) leave the credential untouched.
    /// Everything else means the credential itself was refused and the user
    /// has to obtain a new one.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ErrorKind::Configuration | ErrorKind::MissingCredential
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified failure: kind, user-facing message, and whether a retry of
/// the same credential is permitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AuthFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl AuthFailure {
    /// Failure with an explicit message; retryability follows the kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_local(),
        }
    }

    /// Failure carrying the kind's generic message.
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self::new(kind, kind.default_message())
    }

    /// Override retryability, e.g. a transport error during an exchange is
    /// local even though the kind is `ExchangeRejected`.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}
