//! Exchange orchestrator
//!
//! Pure state machine: receives events, returns (new_state, action).
//! `Orchestrator::run` executes the I/O implied by each action: one
//! collaborator call, one scheduled redirect.
//!
//! ```text
//! Pending ──CallbackReceived──► Exchanging ──ExchangeCompleted(Ok(true))──► Succeeded
//!    │                              │
//!    └── config / provider error /  └── Ok(false) / Err ──────────────────► Failed
//!        missing code ─────────────────────────────────────────────────────► Failed
//! ```
//!
//! A `Failed` attempt whose failure is retryable accepts a new callback.

use std::sync::Arc;
use std::time::Duration;

use backend::{BackendError, Provider, SessionExchange, classify, provider_rejection};
use common::{AuthFailure, ErrorKind};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::callback::AuthorizationCallback;
use crate::constants::{DEFAULT_LANDING_PATH, REDIRECT_DELAY};
use crate::guard::InvocationGuard;
use crate::redirect::{Navigator, ScheduledRedirect};
use crate::resolver::ProviderResolver;
use crate::state;

/// Externally visible status of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStatus {
    Pending,
    Succeeded,
    Failed,
}

impl ExchangeStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ExchangeStatus::Pending => "pending",
            ExchangeStatus::Succeeded => "succeeded",
            ExchangeStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeState {
    /// Nothing has run yet
    Pending,
    /// Waiting on the session exchange
    Exchanging { provider: Provider },
    /// Session issued; terminal
    Succeeded,
    /// Classified failure; terminal unless retryable
    Failed(AuthFailure),
}

impl ExchangeState {
    pub fn status(&self) -> ExchangeStatus {
        match self {
            ExchangeState::Pending | ExchangeState::Exchanging { .. } => ExchangeStatus::Pending,
            ExchangeState::Succeeded => ExchangeStatus::Succeeded,
            ExchangeState::Failed(_) => ExchangeStatus::Failed,
        }
    }
}

/// Everything the machine needs to judge a callback.
#[derive(Debug, Clone)]
pub struct Intake {
    /// Whether a session exchange collaborator is available
    pub configured: bool,
    pub provider: Provider,
    pub callback: AuthorizationCallback,
}

#[derive(Debug)]
pub enum ExchangeEvent {
    /// Admitted callback, provider already resolved
    CallbackReceived(Intake),
    /// The session exchange answered
    ExchangeCompleted(backend::Result<bool>),
}

/// Actions the driver should execute after a transition
#[derive(Debug, PartialEq, Eq)]
pub enum ExchangeAction {
    /// Invoke the session exchange
    CallExchange {
        code: String,
        provider: Provider,
        state: Option<String>,
    },
    /// Schedule navigation to the landing path
    ScheduleRedirect,
    /// Surface a classified failure
    ReportFailure(AuthFailure),
    /// Event not applicable in this state
    None,
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: ExchangeState, event: ExchangeEvent) -> (ExchangeState, ExchangeAction) {
    match (state, event) {
        (ExchangeState::Pending, ExchangeEvent::CallbackReceived(intake)) => begin(intake),
        (ExchangeState::Failed(failure), ExchangeEvent::CallbackReceived(intake))
            if failure.retryable =>
        {
            begin(intake)
        }

        (ExchangeState::Exchanging { .. }, ExchangeEvent::ExchangeCompleted(Ok(true))) => {
            (ExchangeState::Succeeded, ExchangeAction::ScheduleRedirect)
        }
        (ExchangeState::Exchanging { .. }, ExchangeEvent::ExchangeCompleted(Ok(false))) => {
            fail(AuthFailure::from_kind(ErrorKind::ExchangeRejected))
        }
        (ExchangeState::Exchanging { .. }, ExchangeEvent::ExchangeCompleted(Err(e))) => {
            fail(classify(ErrorKind::ExchangeRejected, &e))
        }

        // Anything else is ignored
        (state, _) => (state, ExchangeAction::None),
    }
}

/// Validate a callback. Configuration first, then the provider's own
/// error (which normally arrives without a code), then the code itself.
fn begin(intake: Intake) -> (ExchangeState, ExchangeAction) {
    let Intake {
        configured,
        provider,
        callback,
    } = intake;

    if !configured {
        return fail(AuthFailure::from_kind(ErrorKind::Configuration));
    }

    if let Some(error) = callback.error.as_deref().filter(|e| !e.is_empty()) {
        return fail(provider_rejection(
            error,
            callback.error_description.as_deref(),
        ));
    }

    let Some(code) = callback.code().map(String::from) else {
        return fail(AuthFailure::from_kind(ErrorKind::MissingCredential));
    };

    (
        ExchangeState::Exchanging { provider },
        ExchangeAction::CallExchange {
            code,
            provider,
            state: callback.state,
        },
    )
}

fn fail(failure: AuthFailure) -> (ExchangeState, ExchangeAction) {
    (
        ExchangeState::Failed(failure.clone()),
        ExchangeAction::ReportFailure(failure),
    )
}

/// One callback attempt: the guard plus the machine state.
///
/// Shared by overlapping entries for the same redirect; the guard decides
/// which of them runs.
#[derive(Debug)]
pub struct ExchangeAttempt {
    guard: InvocationGuard,
    state: Mutex<ExchangeState>,
}

impl Default for ExchangeAttempt {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeAttempt {
    pub fn new() -> Self {
        Self {
            guard: InvocationGuard::new(),
            state: Mutex::new(ExchangeState::Pending),
        }
    }

    pub fn guard(&self) -> &InvocationGuard {
        &self.guard
    }

    pub async fn status(&self) -> ExchangeStatus {
        self.state.lock().await.status()
    }

    /// The failure, when the attempt ended in one.
    pub async fn failure(&self) -> Option<AuthFailure> {
        match &*self.state.lock().await {
            ExchangeState::Failed(failure) => Some(failure.clone()),
            _ => None,
        }
    }

    async fn apply(&self, event: ExchangeEvent) -> ExchangeAction {
        let mut state = self.state.lock().await;
        let current = std::mem::replace(&mut *state, ExchangeState::Pending);
        let (next, action) = handle_event(current, event);
        *state = next;
        action
    }
}

/// Result of one `Orchestrator::run`.
#[derive(Debug)]
pub enum ExchangeOutcome {
    /// Another entry already owns this attempt; nothing was done
    Denied,
    /// Session issued; the redirect is scheduled
    Succeeded(ScheduledRedirect),
    Failed(AuthFailure),
}

/// Drives callback attempts against a session exchange collaborator.
pub struct Orchestrator {
    exchange: Option<Arc<dyn SessionExchange>>,
    resolver: ProviderResolver,
    landing_path: String,
    redirect_delay: Duration,
}

impl Orchestrator {
    /// `None` models a deployment without a configured backend: every
    /// admitted callback fails with `Configuration`.
    pub fn new(exchange: Option<Arc<dyn SessionExchange>>) -> Self {
        Self {
            exchange,
            resolver: ProviderResolver::default(),
            landing_path: DEFAULT_LANDING_PATH.to_string(),
            redirect_delay: REDIRECT_DELAY,
        }
    }

    pub fn with_landing_path(mut self, path: impl Into<String>) -> Self {
        self.landing_path = path.into();
        self
    }

    pub fn with_resolver(mut self, resolver: ProviderResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn landing_path(&self) -> &str {
        &self.landing_path
    }

    /// Run `attempt` for `callback`.
    ///
    /// Admission is decided before the first `.await`. A retryable failure
    /// re-opens the guard; a terminal one leaves it closed.
    pub async fn run(
        &self,
        attempt: &ExchangeAttempt,
        callback: AuthorizationCallback,
        navigator: Arc<dyn Navigator>,
    ) -> ExchangeOutcome {
        if !attempt.guard.admit() {
            debug!("callback already being handled, ignoring duplicate entry");
            return ExchangeOutcome::Denied;
        }

        let decoded = state::decode(callback.state.as_deref());
        let provider = self.resolver.resolve(&decoded);
        let intake = Intake {
            configured: self.exchange.is_some(),
            provider,
            callback,
        };

        let mut action = attempt
            .apply(ExchangeEvent::CallbackReceived(intake))
            .await;
        loop {
            match action {
                ExchangeAction::CallExchange {
                    code,
                    provider,
                    state,
                } => {
                    info!(%provider, "exchanging authorization code");
                    let result = self.call_exchange(&code, provider, state.as_deref()).await;
                    if let Err(e) = &result {
                        warn!(%provider, error = %e, "session exchange failed");
                    }
                    action = attempt
                        .apply(ExchangeEvent::ExchangeCompleted(result))
                        .await;
                }
                ExchangeAction::ScheduleRedirect => {
                    info!(path = %self.landing_path, "sign-in succeeded");
                    return ExchangeOutcome::Succeeded(ScheduledRedirect::schedule(
                        navigator,
                        self.landing_path.clone(),
                        self.redirect_delay,
                    ));
                }
                ExchangeAction::ReportFailure(failure) => {
                    if failure.retryable {
                        attempt.guard.reset();
                    }
                    warn!(
                        kind = %failure.kind,
                        retryable = failure.retryable,
                        "sign-in attempt failed"
                    );
                    return ExchangeOutcome::Failed(failure);
                }
                ExchangeAction::None => {
                    debug!("attempt already finished, ignoring callback");
                    return ExchangeOutcome::Denied;
                }
            }
        }
    }

    async fn call_exchange(
        &self,
        code: &str,
        provider: Provider,
        state: Option<&str>,
    ) -> backend::Result<bool> {
        match self.exchange.as_deref() {
            Some(exchange) => exchange.exchange(code, Some(provider), state).await,
            None => Err(BackendError::Protocol(
                "session exchange not configured".into(),
            )),
        }
    }
}
