//! Short-lived registry of callback attempts
//!
//! A browser can deliver the same redirect twice (reload, prefetch, double
//! navigation). Requests carrying the same authorization code share one
//! `ExchangeAttempt`, so its guard arbitrates across requests. Entries
//! expire after `ATTEMPT_TTL` and are pruned lazily on each lookup.
//!
//! The registry is bounded: once `MAX_ATTEMPTS` live entries exist, and for
//! codes longer than `MAX_CODE_LEN`, callbacks get an unshared attempt.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use oauth_callback::ExchangeAttempt;
use tokio::sync::Mutex;
use tracing::warn;

/// Maximum age of a registry entry.
pub const ATTEMPT_TTL: Duration = Duration::from_secs(600);

/// Maximum number of live entries.
pub const MAX_ATTEMPTS: usize = 10_000;

/// Longest authorization code worth remembering.
pub const MAX_CODE_LEN: usize = 512;

struct Entry {
    attempt: Arc<ExchangeAttempt>,
    created_at: Instant,
}

pub struct AttemptRegistry {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for AttemptRegistry {
    fn default() -> Self {
        Self::with_ttl(ATTEMPT_TTL)
    }
}

impl AttemptRegistry {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self::with_limits(ttl, MAX_ATTEMPTS)
    }

    pub fn with_limits(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The attempt for `code`, created on first sight.
    ///
    /// Callbacks without a usable code never share: each gets a fresh
    /// attempt.
    pub async fn attempt_for(&self, code: Option<&str>) -> Arc<ExchangeAttempt> {
        let Some(code) = code.filter(|c| c.len() <= MAX_CODE_LEN) else {
            return Arc::new(ExchangeAttempt::new());
        };

        let mut entries = self.entries.lock().await;
        // Lazy cleanup: remove expired entries while holding the lock
        entries.retain(|_, e| e.created_at.elapsed() < self.ttl);
        if entries.len() >= self.max_entries && !entries.contains_key(code) {
            warn!(
                entries = entries.len(),
                "attempt registry full, not sharing this attempt"
            );
            return Arc::new(ExchangeAttempt::new());
        }
        entries
            .entry(code.to_string())
            .or_insert_with(|| Entry {
                attempt: Arc::new(ExchangeAttempt::new()),
                created_at: Instant::now(),
            })
            .attempt
            .clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
