//! Verification token store
//!
//! Issues tokens, redeems them exactly once, and sweeps dead records.
//!
//! Redemption claims the token first: under a short lock the record is
//! checked and rewritten with `consumed_at` set, and only then does the
//! account action run, outside the lock. A second redemption of the same
//! token sees the claim and is refused. If the action fails the original
//! record is put back; if the claim cannot be written the action never runs.

use std::sync::Arc;

use backend::classify::PASSWORD_POLICY_MESSAGE;
use backend::{Notifier, SubjectDirectory, SubjectId, TokenPurpose, classify};
use common::{AuthFailure, Clock, ErrorKind, SystemClock};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::PersistenceError;
use crate::password;
use crate::persistence::TokenPersistence;
use crate::token::{self, StoredToken, VerificationToken};

/// A completed account action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub subject: SubjectId,
    pub subject_email: String,
    pub purpose: TokenPurpose,
}

/// What a redeemed token is used for.
#[derive(Clone, Copy)]
enum AccountAction<'a> {
    ApplySecret(&'a str),
    MarkVerified,
}

impl AccountAction<'_> {
    fn purpose(&self) -> TokenPurpose {
        match self {
            AccountAction::ApplySecret(_) => TokenPurpose::PasswordReset,
            AccountAction::MarkVerified => TokenPurpose::EmailVerification,
        }
    }
}

pub struct TokenStore {
    persistence: Arc<dyn TokenPersistence>,
    directory: Arc<dyn SubjectDirectory>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    /// Held for read-check-write of records only, never across a
    /// collaborator call
    records: Mutex<()>,
}

/// Persistence trouble is an operator problem; the user may retry.
fn storage_failure(e: &PersistenceError) -> AuthFailure {
    error!(error = %e, "token persistence failed");
    AuthFailure::from_kind(ErrorKind::Configuration)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

impl TokenStore {
    pub fn new(
        persistence: Arc<dyn TokenPersistence>,
        directory: Arc<dyn SubjectDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            persistence,
            directory,
            notifier,
            clock: Arc::new(SystemClock),
            records: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Issue and persist a token for `subject_email`.
    pub async fn issue(
        &self,
        subject_email: &str,
        purpose: TokenPurpose,
    ) -> Result<VerificationToken, AuthFailure> {
        let raw = token::generate_token();
        let record = StoredToken::issued(
            normalize_email(subject_email),
            purpose,
            self.clock.now_millis(),
        );
        self.persistence
            .set(&token::token_key(&raw), &record)
            .await
            .map_err(|e| storage_failure(&e))?;
        debug!(purpose = purpose.label(), "issued verification token");
        Ok(VerificationToken::new(raw, record))
    }

    /// Handle a "send me a code" request.
    ///
    /// Issues and delivers a token only when the address belongs to an
    /// account. Returns whether a token went out; callers must answer the
    /// user identically either way, and should not make the answer wait on
    /// this call, so the endpoint cannot be used to probe for accounts.
    pub async fn request(&self, email: &str, purpose: TokenPurpose) -> bool {
        let email = normalize_email(email);
        match self.directory.find_subject(&email).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(purpose = purpose.label(), "no account for address, not issuing");
                return false;
            }
            Err(e) => {
                warn!(error = %e, purpose = purpose.label(), "subject lookup failed, not issuing");
                return false;
            }
        }

        let issued = match self.issue(&email, purpose).await {
            Ok(issued) => issued,
            Err(_) => return false,
        };

        match self.notifier.deliver(&email, &issued.token, purpose).await {
            Ok(()) => {
                info!(purpose = purpose.label(), "verification code delivered");
                true
            }
            Err(e) => {
                warn!(error = %e, purpose = purpose.label(), "verification code delivery failed");
                // Undeliverable token is useless
                if let Err(e) = self.persistence.delete(&issued.key()).await {
                    warn!(error = %e, "failed to discard undelivered token");
                }
                false
            }
        }
    }

    /// Redeem a password-reset token, setting the account's new password.
    pub async fn redeem(&self, token: &str, new_secret: &str) -> Result<Redemption, AuthFailure> {
        self.redeem_with(token, AccountAction::ApplySecret(new_secret))
            .await
    }

    /// Redeem an email-verification token, marking the account verified.
    pub async fn confirm_email(&self, token: &str) -> Result<Redemption, AuthFailure> {
        self.redeem_with(token, AccountAction::MarkVerified).await
    }

    async fn redeem_with(
        &self,
        token: &str,
        action: AccountAction<'_>,
    ) -> Result<Redemption, AuthFailure> {
        let purpose = action.purpose();
        let key = token::token_key(token);

        let record = self.claim(&key, action).await?;

        let subject = match self.perform(&record, action).await {
            Ok(subject) => subject,
            Err(failure) => {
                self.release(&key, &record).await;
                return Err(failure);
            }
        };

        // The claim already blocks reuse; a leftover record is the sweep's
        if let Err(e) = self.persistence.delete(&key).await {
            debug!(error = %e, "consumed token left for the sweep");
        }
        info!(purpose = purpose.label(), "verification token redeemed");

        Ok(Redemption {
            subject,
            subject_email: record.subject_email,
            purpose,
        })
    }

    /// Check the record and persist it as consumed. Returns the record as
    /// it was before the claim.
    async fn claim(
        &self,
        key: &str,
        action: AccountAction<'_>,
    ) -> Result<StoredToken, AuthFailure> {
        let purpose = action.purpose();
        let _guard = self.records.lock().await;
        let now = self.clock.now_millis();

        let record = self
            .persistence
            .get(key)
            .await
            .map_err(|e| storage_failure(&e))?
            .ok_or_else(|| AuthFailure::from_kind(ErrorKind::InvalidToken))?;

        if record.is_expired(now) {
            debug!(purpose = purpose.label(), "token expired");
            return Err(AuthFailure::from_kind(ErrorKind::ExpiredToken));
        }
        if record.is_consumed() {
            debug!(purpose = purpose.label(), "token already consumed");
            return Err(AuthFailure::from_kind(ErrorKind::InvalidToken));
        }
        if record.purpose != purpose {
            debug!(
                expected = purpose.label(),
                actual = record.purpose.label(),
                "token presented to the wrong flow"
            );
            return Err(AuthFailure::from_kind(ErrorKind::InvalidToken));
        }
        if let AccountAction::ApplySecret(secret) = action {
            if !password::meets_policy(secret) {
                return Err(
                    AuthFailure::new(ErrorKind::ExchangeRejected, PASSWORD_POLICY_MESSAGE)
                        .with_retryable(true),
                );
            }
        }

        let claimed = StoredToken {
            consumed_at: Some(now),
            ..record.clone()
        };
        self.persistence
            .set(key, &claimed)
            .await
            .map_err(|e| storage_failure(&e))?;
        Ok(record)
    }

    /// Look up the account and apply the action to it.
    async fn perform(
        &self,
        record: &StoredToken,
        action: AccountAction<'_>,
    ) -> Result<SubjectId, AuthFailure> {
        let subject = match self.directory.find_subject(&record.subject_email).await {
            Ok(Some(subject)) => subject,
            Ok(None) => return Err(AuthFailure::from_kind(ErrorKind::SubjectNotFound)),
            Err(e) => {
                warn!(error = %e, "subject lookup failed during redemption");
                return Err(classify(ErrorKind::ExchangeRejected, &e));
            }
        };

        let applied = match action {
            AccountAction::ApplySecret(secret) => self.directory.apply_secret(&subject, secret).await,
            AccountAction::MarkVerified => self.directory.mark_verified(&subject).await,
        };
        if let Err(e) = applied {
            warn!(error = %e, purpose = record.purpose.label(), "account action failed");
            return Err(classify(ErrorKind::ExchangeRejected, &e));
        }
        Ok(subject)
    }

    /// Put the unclaimed record back after a failed account action.
    async fn release(&self, key: &str, record: &StoredToken) {
        let _guard = self.records.lock().await;
        if let Err(e) = self.persistence.set(key, record).await {
            warn!(error = %e, "could not release claimed token, it stays consumed");
        }
    }

    /// Remove expired and consumed records. Returns how many were removed.
    ///
    /// Holds the record lock throughout, so a record being released is
    /// never read as consumed and then deleted after its release.
    pub async fn sweep(&self) -> usize {
        let _guard = self.records.lock().await;
        let now = self.clock.now_millis();

        let keys = match self.persistence.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "sweep could not list tokens");
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys {
            let dead = match self.persistence.get(&key).await {
                Ok(Some(record)) => !record.is_valid(now),
                Ok(None) => false,
                Err(e) => {
                    warn!(error = %e, "sweep could not read token");
                    false
                }
            };
            if !dead {
                continue;
            }
            match self.persistence.delete(&key).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(error = %e, "sweep could not remove token"),
            }
        }

        if removed > 0 {
            info!(removed, "swept verification tokens");
        }
        removed
    }
}
