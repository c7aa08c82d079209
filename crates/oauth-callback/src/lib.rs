//! OAuth authorization-code callback handling
//!
//! Drives one inbound provider redirect from intake to a terminal result.
//! Nothing here talks HTTP; the session exchange is a `backend` collaborator
//! and navigation is whatever `Navigator` the caller supplies.
//!
//! Callback flow:
//! 1. `InvocationGuard::admit()` lets exactly one run through per attempt
//! 2. `state::decode()` reads the provider tag out of the opaque `state`
//! 3. `ProviderResolver::resolve()` applies the fallback policy
//! 4. `orchestrator::handle_event()` validates the callback and decides
//! 5. the driver calls `SessionExchange::exchange()` at most once
//! 6. on success a `ScheduledRedirect` navigates to the landing path

pub mod callback;
pub mod constants;
pub mod guard;
pub mod orchestrator;
pub mod redirect;
pub mod resolver;
pub mod state;

pub use callback::AuthorizationCallback;
pub use constants::*;
pub use guard::InvocationGuard;
pub use orchestrator::{ExchangeAttempt, ExchangeOutcome, ExchangeStatus, Orchestrator};
pub use redirect::{ChannelNavigator, Navigator, ScheduledRedirect};
pub use resolver::{FallbackPolicy, ProviderResolver, default_to_google};
pub use state::{DecodedProvider, DecodedState};
