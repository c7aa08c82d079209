//! Periodic removal of dead verification tokens
//!
//! Redemption never depends on the sweep: expiry and consumption are checked
//! on every redeem. The sweep only keeps persistence from growing.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::store::TokenStore;

/// Spawn a background task that sweeps `store` every `interval`.
///
/// `on_sweep` receives the number of records removed by each cycle.
/// Returns a `JoinHandle` for the spawned task.
pub fn spawn_sweep_task<F>(
    store: Arc<TokenStore>,
    interval: Duration,
    on_sweep: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(usize) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick; nothing has had time to expire
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = store.sweep().await;
            debug!(removed, "token sweep cycle finished");
            on_sweep(removed);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryPersistence, TokenPersistence};
    use backend::{MemoryBackend, TokenPurpose};
    use common::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn sweeps_on_each_interval() {
        let backend = Arc::new(MemoryBackend::new().with_subject("a@b.com"));
        let persistence = Arc::new(MemoryPersistence::new());
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(
            TokenStore::new(persistence.clone(), backend.clone(), backend)
                .with_clock(clock.clone()),
        );

        store
            .issue("a@b.com", TokenPurpose::PasswordReset)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(2 * 60 * 60));

        let total = Arc::new(AtomicUsize::new(0));
        let cycles = Arc::new(AtomicUsize::new(0));
        let handle = {
            let total = total.clone();
            let cycles = cycles.clone();
            spawn_sweep_task(store, Duration::from_secs(300), move |removed| {
                total.fetch_add(removed, Ordering::SeqCst);
                cycles.fetch_add(1, Ordering::SeqCst);
            })
        };

        // First tick is skipped
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(cycles.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(cycles.load(Ordering::SeqCst), 1);
        assert_eq!(total.load(Ordering::SeqCst), 1);
        assert!(persistence.keys().await.unwrap().is_empty());

        handle.abort();
    }
}
