//! Delayed, cancellable navigation after a successful exchange

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// Performs the outbound navigation.
pub trait Navigator: Send + Sync + 'static {
    fn navigate(&self, path: &str);
}

/// Navigator that hands the target path to a single waiting receiver.
///
/// Used by request handlers that turn the navigation into a response.
#[derive(Debug)]
pub struct ChannelNavigator {
    sender: Mutex<Option<oneshot::Sender<String>>>,
}

impl ChannelNavigator {
    pub fn channel() -> (Arc<Self>, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        let navigator = Arc::new(Self {
            sender: Mutex::new(Some(tx)),
        });
        (navigator, rx)
    }
}

impl Navigator for ChannelNavigator {
    fn navigate(&self, path: &str) {
        let sender = match self.sender.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(sender) = sender {
            // Receiver gone means the caller stopped waiting
            let _ = sender.send(path.to_string());
        }
    }
}

/// A navigation timer running on the tokio runtime.
///
/// Dropping or cancelling it aborts the timer task, so nothing navigates
/// after the owner is torn down.
#[derive(Debug)]
pub struct ScheduledRedirect {
    path: String,
    delay: Duration,
    task: JoinHandle<()>,
}

impl ScheduledRedirect {
    /// Navigate to `path` after `delay`.
    pub fn schedule(navigator: Arc<dyn Navigator>, path: impl Into<String>, delay: Duration) -> Self {
        let path = path.into();
        let target = path.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(path = %target, "redirecting after successful sign-in");
            navigator.navigate(&target);
        });
        Self { path, delay, task }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Abort the timer. No-op once the navigation happened.
    pub fn cancel(self) {
        drop(self);
    }

    /// Wait for the navigation. `false` if the timer was aborted.
    pub async fn completed(mut self) -> bool {
        (&mut self.task).await.is_ok()
    }
}

impl Drop for ScheduledRedirect {
    fn drop(&mut self) {
        self.task.abort();
    }
}
