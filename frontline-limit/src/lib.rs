//! # frontline-limit
//!
//! `frontline-limit` provides the admission gates that sit in front of every
//! outbound API call made by `frontline`.
//!
//! ## Gates
//!
//! * **Token bucket** ([`TokenBucket`]): controls the *rate* of requests. Tokens
//!   refill continuously and each request consumes one. When the bucket is dry the
//!   caller is told how long to wait; the token is reserved for it in the same
//!   critical section, so waiters never race each other for the same refill.
//! * **Concurrency gate** ([`ConcurrencyGate`]): bounds how many requests are in
//!   flight at once. Permits are released when dropped, on every exit path.
//!
//! Neither gate knows anything about HTTP. Time is supplied by the caller, which
//! keeps the bucket deterministic under test.
//!
//! ## Example
//!
//! ```rust
//! use frontline_limit::Strategy;
//! use frontline_limit::TokenBucket;
//! use std::num::NonZeroUsize;
//! use std::time::Duration;
//! use std::time::Instant;
//!
//! let capacity = NonZeroUsize::new(300).unwrap();
//! let bucket = TokenBucket::new(capacity, Duration::from_secs(60));
//!
//! let admission = bucket.admit(Instant::now());
//! assert!(admission.wait().is_zero());
//! assert_eq!(admission.remaining(), 299.0);
//! ```

use std::fmt::Debug;
use std::time::Duration;
use std::time::Instant;

mod concurrency;
mod token_bucket;

pub use concurrency::ConcurrencyGate;
pub use concurrency::GateClosed;
pub use concurrency::Permit;
pub use token_bucket::TokenBucket;

/// The outcome of asking a [`Strategy`] for a token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// A token was available and has been consumed.
    Granted { remaining: f64 },
    /// No token was available. One has been reserved for the caller, who must
    /// wait `wait` before proceeding.
    Delayed { wait: Duration, remaining: f64 },
}

impl Admission {
    /// Tokens left in the bucket after this admission.
    pub fn remaining(&self) -> f64 {
        match self {
            Self::Granted { remaining } | Self::Delayed { remaining, .. } => *remaining,
        }
    }

    /// How long the caller must wait before sending. Zero when granted.
    pub fn wait(&self) -> Duration {
        match self {
            Self::Granted { .. } => Duration::ZERO,
            Self::Delayed { wait, .. } => *wait,
        }
    }
}

/// The core trait for rate-limiting algorithms.
///
/// Strategies are shared across tasks behind an `Arc`, so implementations keep
/// their state behind interior mutability.
pub trait Strategy: Debug {
    /// Consumes one token at `now`, reserving one if the bucket is empty.
    ///
    /// Never blocks. Any waiting is the caller's job.
    fn admit(&self, now: Instant) -> Admission;

    /// Tokens currently in the bucket, without refilling.
    fn available(&self) -> f64;
}
