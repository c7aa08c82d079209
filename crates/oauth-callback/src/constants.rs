//! Callback flow constants

use std::time::Duration;

/// Pause between a successful exchange and navigation to the landing page.
pub const REDIRECT_DELAY: Duration = Duration::from_secs(1);

/// Authenticated landing path used when none is configured.
pub const DEFAULT_LANDING_PATH: &str = "/dashboard";

/// Random bytes in the `n` nonce of an encoded `state`.
pub const STATE_NONCE_BYTES: usize = 16;
