//! Single-admission guard for one callback attempt
//!
//! The same redirect can be delivered twice (double navigation, a
//! re-rendered page firing its effect again). Only the first entry may run
//! the exchange: authorization codes are single-use, and a second exchange
//! would burn the code and fail the sign-in that already succeeded.

use std::sync::atomic::{AtomicBool, Ordering};

/// Owned by one `ExchangeAttempt`; never shared across attempts.
#[derive(Debug, Default)]
pub struct InvocationGuard {
    admitted: AtomicBool,
}

impl InvocationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once until `reset`.
    ///
    /// A single compare-and-swap, so it must be called before the first
    /// `.await` of the guarded work.
    pub fn admit(&self) -> bool {
        self.admitted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Re-open the guard after a local failure so the user can retry.
    pub fn reset(&self) {
        self.admitted.store(false, Ordering::Release);
    }

    pub fn is_admitted(&self) -> bool {
        self.admitted.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn admits_once() {
        let guard = InvocationGuard::new();
        assert!(guard.admit());
        assert!(!guard.admit());
        assert!(!guard.admit());
        assert!(guard.is_admitted());
    }

    #[test]
    fn reset_reopens() {
        let guard = InvocationGuard::new();
        assert!(guard.admit());
        guard.reset();
        assert!(!guard.is_admitted());
        assert!(guard.admit());
    }

    #[test]
    fn exactly_one_thread_is_admitted() {
        let guard = Arc::new(InvocationGuard::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = Arc::clone(&guard);
                std::thread::spawn(move || guard.admit())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();
        assert_eq!(admitted, 1);
    }
}
