//! Single-use verification tokens for password reset and email verification
//!
//! Token flow:
//! 1. User asks for a reset (or a verification mail): `TokenStore::request()`
//!    issues a token when the address belongs to an account and hands it to
//!    the `Notifier`. The caller always answers with the same generic text.
//! 2. User submits the mailed code: `TokenStore::redeem()` (new password) or
//!    `TokenStore::confirm_email()` checks it, performs the account action
//!    and consumes the token in one critical section.
//! 3. `sweep::spawn_sweep_task()` periodically drops expired and consumed
//!    records.
//!
//! Records live behind `TokenPersistence`: `MemoryPersistence` for tests and
//! single-process runs, `FilePersistence` for a JSON file that survives
//! restarts. Only a digest of each token is stored.

pub mod error;
pub mod password;
pub mod persistence;
pub mod store;
pub mod sweep;
pub mod token;

pub use error::{PersistenceError, Result};
pub use persistence::{FilePersistence, MemoryPersistence, TokenPersistence};
pub use store::{Redemption, TokenStore};
pub use sweep::spawn_sweep_task;
pub use token::{StoredToken, TOKEN_TTL, VerificationToken};
