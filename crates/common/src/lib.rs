//! Shared types for the auth gateway workspace
//!
//! Holds the pieces every crate needs: the config error type, the `Secret`
//! wrapper, the injectable `Clock`, and the closed failure taxonomy that
//! both the callback orchestrator and the verification token store report in.

mod clock;
mod error;
mod failure;
mod secret;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use failure::{AuthFailure, ErrorKind};
pub use secret::Secret;
