use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use super::Admission;
use super::Strategy;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    // Anchored by the first admission. May sit in the future while a
    // reserved token is still being waited on.
    last_refill: Option<Instant>,
}

/// A token bucket that refills `capacity` tokens per `window`.
///
/// The bucket starts full. Refill is lazy: on each admission the whole number of
/// tokens earned since the last refill is added, capped at `capacity`, and the
/// refill clock moves to `now`. All state changes for one admission happen in a
/// single critical section.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    window: Duration,
    state: Mutex<BucketState>,
}

impl Strategy for TokenBucket {
    fn admit(&self, now: Instant) -> Admission {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state, now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Admission::Granted {
                remaining: state.tokens,
            };
        }

        // Refill then consume: the missing fraction of a token is minted after
        // the later of `now` and any outstanding reservation, and handed straight
        // to this caller.
        let deficit = 1.0 - state.tokens;
        let start = state.last_refill.map_or(now, |last| last.max(now));
        let ready_at = start + self.window.mul_f64(deficit / self.capacity);
        state.tokens = 0.0;
        state.last_refill = Some(ready_at);

        Admission::Delayed {
            wait: ready_at.saturating_duration_since(now),
            remaining: 0.0,
        }
    }

    fn available(&self) -> f64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tokens
    }
}

impl TokenBucket {
    /// Creates a full bucket holding `capacity` tokens, refilled over `window`.
    ///
    /// A zero `window` disables limiting: the bucket refills completely on
    /// every admission.
    pub fn new(capacity: NonZeroUsize, window: Duration) -> Self {
        let capacity = capacity.get() as f64;
        Self {
            capacity,
            window,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: None,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let last = *state.last_refill.get_or_insert(now);

        if self.window.is_zero() {
            state.tokens = self.capacity;
            state.last_refill = Some(now);
            return;
        }

        let elapsed = now.saturating_duration_since(last);
        let earned = (elapsed.as_secs_f64() * self.capacity / self.window.as_secs_f64()).floor();
        if earned > 0.0 {
            state.tokens = (state.tokens + earned).min(self.capacity);
            state.last_refill = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use more_asserts::assert_ge;
    use more_asserts::assert_le;

    use super::*;

    fn bucket(capacity: usize, window: Duration) -> TokenBucket {
        TokenBucket::new(NonZeroUsize::new(capacity).unwrap(), window)
    }

    #[test]
    fn it_grants_up_to_capacity_then_delays() {
        let rl = bucket(2, Duration::from_secs(2));
        let t0 = Instant::now();

        assert_eq!(rl.admit(t0), Admission::Granted { remaining: 1.0 });
        assert_eq!(rl.admit(t0), Admission::Granted { remaining: 0.0 });

        // One token per second, so the third caller waits exactly one interval.
        assert_eq!(
            rl.admit(t0),
            Admission::Delayed {
                wait: Duration::from_secs(1),
                remaining: 0.0,
            }
        );
    }

    #[test]
    fn successive_waiters_are_spaced_one_token_apart() {
        let rl = bucket(2, Duration::from_secs(2));
        let t0 = Instant::now();
        let _ = rl.admit(t0);
        let _ = rl.admit(t0);

        assert_eq!(rl.admit(t0).wait(), Duration::from_secs(1));
        assert_eq!(rl.admit(t0).wait(), Duration::from_secs(2));
        assert_eq!(
            rl.admit(t0 + Duration::from_millis(500)).wait(),
            Duration::from_millis(2500)
        );
    }

    #[test]
    fn reservation_is_honoured_before_refill_resumes() {
        let rl = bucket(2, Duration::from_secs(2));
        let t0 = Instant::now();
        let _ = rl.admit(t0);
        let _ = rl.admit(t0);
        let _ = rl.admit(t0); // reserved at t0 + 1s

        // Nothing is earned until the reserved token's mint time has passed.
        assert_eq!(
            rl.admit(t0 + Duration::from_millis(900)).wait(),
            Duration::from_millis(1100)
        );

        // A second past the last reservation, one token has been earned.
        assert_eq!(
            rl.admit(t0 + Duration::from_secs(3)),
            Admission::Granted { remaining: 0.0 }
        );
    }

    #[test]
    fn partial_intervals_do_not_refill() {
        let rl = bucket(10, Duration::from_secs(10));
        let t0 = Instant::now();
        for _ in 0..10 {
            assert!(rl.admit(t0).wait().is_zero());
        }

        let admission = rl.admit(t0 + Duration::from_millis(999));
        assert_eq!(admission.wait(), Duration::from_secs(1));
    }

    #[test]
    fn refill_is_capped_at_capacity() {
        let rl = bucket(5, Duration::from_secs(1));
        let t0 = Instant::now();
        let _ = rl.admit(t0);

        // A long idle period earns far more than capacity.
        let admission = rl.admit(t0 + Duration::from_secs(3600));
        assert_eq!(admission, Admission::Granted { remaining: 4.0 });
        assert_eq!(rl.available(), 4.0);
    }

    #[test]
    fn tokens_stay_within_bounds_for_any_timing() {
        let rl = bucket(30, Duration::from_secs(6));
        let mut now = Instant::now();

        // Deterministic pseudo-random gaps between 0 and ~1.3s.
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        for _ in 0..5_000 {
            seed = seed
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            now += Duration::from_micros((seed >> 33) % 1_300_000);

            let admission = rl.admit(now);
            assert_le!(admission.remaining(), 30.0);
            assert_ge!(admission.remaining(), 0.0);
            assert_le!(rl.available(), 30.0);
            assert_ge!(rl.available(), 0.0);
        }
    }

    #[test]
    fn zero_window_never_delays() {
        let rl = bucket(1, Duration::ZERO);
        let t0 = Instant::now();
        for _ in 0..100 {
            assert!(rl.admit(t0).wait().is_zero());
        }
    }

    #[test]
    fn concurrent_admissions_grant_exactly_capacity() {
        let capacity = 100;
        let rl = Arc::new(bucket(capacity, Duration::from_secs(3600)));
        let t0 = Instant::now();

        let handles: Vec<_> = (0..capacity + 20)
            .map(|_| {
                let rl = Arc::clone(&rl);
                std::thread::spawn(move || rl.admit(t0))
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|a| matches!(a, Admission::Granted { .. }))
            .count();

        assert_eq!(granted, capacity);
        assert_eq!(rl.available(), 0.0);
    }
}
