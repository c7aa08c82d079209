//! Collaborator contracts for the identity/session backend
//!
//! The callback orchestrator and the token store never talk HTTP themselves.
//! They call the traits defined here:
//! - `SessionExchange` turns an authorization code into a session
//! - `SubjectDirectory` looks accounts up by email and applies account actions
//! - `Notifier` mails a freshly issued verification code
//!
//! `HttpBackend` implements all three against the backend's REST API;
//! `MemoryBackend` implements them in-process for tests and local runs.
//! Collaborator errors are turned into user-facing text by `classify`.

pub mod classify;
pub mod http;
pub mod memory;

pub use classify::{classify, provider_rejection};
pub use http::{HttpBackend, authorize_url};
pub use memory::{Delivery, ExchangeCall, MemoryBackend};

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Identity provider that issued an authorization code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Github,
}

impl Provider {
    /// Wire tag, as carried in the `state` value and sent to the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Github => "github",
        }
    }

    /// Parse a wire tag. Exact, case-sensitive match only.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "google" => Some(Provider::Google),
            "github" => Some(Provider::Github),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which account action a verification token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    PasswordReset,
    EmailVerification,
}

impl TokenPurpose {
    pub fn label(&self) -> &'static str {
        match self {
            TokenPurpose::PasswordReset => "password_reset",
            TokenPurpose::EmailVerification => "email_verification",
        }
    }
}

/// Backend-side account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(pub String);

/// Errors reported by a collaborator call.
///
/// `Transport` means the request never got a verdict (network failure,
/// timeout, 5xx) and the credential is still unused. `Rejected` is a verdict:
/// the backend looked at the request and refused it, optionally with a
/// machine-readable `code`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Transport(String),

    #[error("backend rejected request: {}", message.as_deref().unwrap_or("<no message>"))]
    Rejected {
        code: Option<String>,
        message: Option<String>,
    },

    #[error("unexpected backend response: {0}")]
    Protocol(String),
}

impl BackendError {
    /// Rejection with a message and no code.
    pub fn rejected(message: impl Into<String>) -> Self {
        BackendError::Rejected {
            code: None,
            message: Some(message.into()),
        }
    }

    /// Whether the failure happened before the backend reached a verdict.
    pub fn is_transport(&self) -> bool {
        matches!(self, BackendError::Transport(_))
    }
}

/// Result alias for collaborator calls.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Exchanges a single-use authorization code for a session.
///
/// Uses `Pin<Box<dyn Future>>` return types so implementations can be held
/// as `Arc<dyn SessionExchange>`.
pub trait SessionExchange: Send + Sync {
    /// `Ok(true)` when a session was issued, `Ok(false)` when the backend
    /// declined without detail.
    fn exchange<'a>(
        &'a self,
        code: &'a str,
        provider: Option<Provider>,
        state: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;
}

/// Account lookup and account actions authorized by a verification token.
pub trait SubjectDirectory: Send + Sync {
    fn find_subject<'a>(
        &'a self,
        email: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SubjectId>>> + Send + 'a>>;

    fn apply_secret<'a>(
        &'a self,
        subject: &'a SubjectId,
        secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn mark_verified<'a>(
        &'a self,
        subject: &'a SubjectId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Delivers a verification code to its recipient.
pub trait Notifier: Send + Sync {
    fn deliver<'a>(
        &'a self,
        email: &'a str,
        token: &'a str,
        purpose: TokenPurpose,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}
