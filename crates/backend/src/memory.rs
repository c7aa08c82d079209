//! In-process backend
//!
//! Implements every collaborator trait over an in-memory account table. The
//! exchange verdict is scripted by the caller and every call is recorded, so
//! tests can assert how many times (and with what) the backend was reached.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    BackendError, Notifier, Provider, Result, SessionExchange, SubjectDirectory, SubjectId,
    TokenPurpose,
};

/// One recorded `exchange` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeCall {
    pub code: String,
    pub provider: Option<Provider>,
    pub state: Option<String>,
}

/// One recorded `deliver` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub email: String,
    pub token: String,
    pub purpose: TokenPurpose,
}

#[derive(Debug, Default)]
struct Account {
    id: String,
    secret: Option<String>,
    verified: bool,
}

#[derive(Debug)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    exchange_verdict: Result<bool>,
    exchange_delay: Duration,
    delivery_delay: Duration,
    directory_failure: Option<BackendError>,
    exchange_calls: Vec<ExchangeCall>,
    outbox: Vec<Delivery>,
}

/// In-memory implementation of all backend collaborators.
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty account table; exchanges succeed immediately.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                accounts: HashMap::new(),
                exchange_verdict: Ok(true),
                exchange_delay: Duration::ZERO,
                delivery_delay: Duration::ZERO,
                directory_failure: None,
                exchange_calls: Vec::new(),
                outbox: Vec::new(),
            }),
        }
    }

    /// Register an account. Its id is `user-<n>` in insertion order.
    pub fn with_subject(mut self, email: &str) -> Self {
        let state = self.state.get_mut();
        let id = format!("user-{}", state.accounts.len() + 1);
        state.accounts.insert(
            email.to_string(),
            Account {
                id,
                ..Account::default()
            },
        );
        self
    }

    /// Verdict returned by every subsequent `exchange`.
    pub fn with_exchange_verdict(mut self, verdict: Result<bool>) -> Self {
        self.state.get_mut().exchange_verdict = verdict;
        self
    }

    /// Hold every `exchange` open for `delay` before answering.
    pub fn with_exchange_delay(mut self, delay: Duration) -> Self {
        self.state.get_mut().exchange_delay = delay;
        self
    }

    /// Hold every `deliver` open for `delay` before answering.
    pub fn with_delivery_delay(mut self, delay: Duration) -> Self {
        self.state.get_mut().delivery_delay = delay;
        self
    }

    pub async fn set_exchange_verdict(&self, verdict: Result<bool>) {
        self.state.lock().await.exchange_verdict = verdict;
    }

    /// Make `apply_secret` / `mark_verified` fail with `error` (or succeed again with `None`).
    pub async fn set_directory_failure(&self, error: Option<BackendError>) {
        self.state.lock().await.directory_failure = error;
    }

    pub async fn remove_subject(&self, email: &str) {
        self.state.lock().await.accounts.remove(email);
    }

    pub async fn exchange_calls(&self) -> Vec<ExchangeCall> {
        self.state.lock().await.exchange_calls.clone()
    }

    pub async fn outbox(&self) -> Vec<Delivery> {
        self.state.lock().await.outbox.clone()
    }

    pub async fn secret_for(&self, email: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.accounts.get(email).and_then(|a| a.secret.clone())
    }

    pub async fn is_verified(&self, email: &str) -> bool {
        let state = self.state.lock().await;
        state.accounts.get(email).is_some_and(|a| a.verified)
    }

    async fn update_account(
        &self,
        subject: &SubjectId,
        apply: impl FnOnce(&mut Account),
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(err) = state.directory_failure.clone() {
            return Err(err);
        }
        let account = state
            .accounts
            .values_mut()
            .find(|a| a.id == subject.0)
            .ok_or_else(|| BackendError::rejected(format!("unknown subject {}", subject.0)))?;
        apply(account);
        Ok(())
    }
}

impl SessionExchange for MemoryBackend {
    fn exchange<'a>(
        &'a self,
        code: &'a str,
        provider: Option<Provider>,
        state: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let (verdict, delay) = {
                let mut inner = self.state.lock().await;
                inner.exchange_calls.push(ExchangeCall {
                    code: code.to_string(),
                    provider,
                    state: state.map(String::from),
                });
                (inner.exchange_verdict.clone(), inner.exchange_delay)
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            debug!(?provider, ok = verdict.is_ok(), "memory backend exchange");
            verdict
        })
    }
}

impl SubjectDirectory for MemoryBackend {
    fn find_subject<'a>(
        &'a self,
        email: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SubjectId>>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .accounts
                .get(email)
                .map(|account| SubjectId(account.id.clone())))
        })
    }

    fn apply_secret<'a>(
        &'a self,
        subject: &'a SubjectId,
        secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.update_account(subject, |account| account.secret = Some(secret.to_string()))
                .await
        })
    }

    fn mark_verified<'a>(
        &'a self,
        subject: &'a SubjectId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.update_account(subject, |account| account.verified = true)
                .await
        })
    }
}

impl Notifier for MemoryBackend {
    fn deliver<'a>(
        &'a self,
        email: &'a str,
        token: &'a str,
        purpose: TokenPurpose,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let delay = self.state.lock().await.delivery_delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.state.lock().await.outbox.push(Delivery {
                email: email.to_string(),
                token: token.to_string(),
                purpose,
            });
            Ok(())
        })
    }
}
