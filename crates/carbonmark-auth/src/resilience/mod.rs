//! Failure handling for store strategies.
//!
//! - [`circuit_breaker`] - per-operation breaker that fails fast while a store is down
//! - [`retry`] - bounded in-place retry with exponential backoff
//! - [`guarded`] - [`ProfileStore`](crate::storage::ProfileStore) adapters that
//!   combine timeouts, retry, and circuit breaking

pub mod circuit_breaker;
pub mod guarded;
pub mod retry;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitError, CircuitSnapshot, CircuitState};
pub use guarded::{FreshConnectionStore, GuardedStore, RetryingStore};
pub use retry::{RetryPolicy, with_retry};
