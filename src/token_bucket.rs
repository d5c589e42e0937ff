use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::error::Error;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// What happens to refills once the bucket already holds `capacity` tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefillPolicy {
    /// Every elapsed interval adds a token, so an idle bucket can grow past
    /// its capacity. Capacity is only the initial fill level.
    #[default]
    Accumulate,
    /// Refills are clamped to `capacity`.
    CapAtCapacity,
}

#[derive(Debug)]
struct State {
    available: u64,
    // Refill has been credited up to this instant.
    last_update: Instant,
}

/// A token bucket that refills by one token every `interval`. Share it
/// between threads behind an [`Arc`](std::sync::Arc).
#[derive(Debug)]
pub struct TokenBucket<C = SystemClock> {
    capacity: u64,
    interval: Duration,
    policy: RefillPolicy,
    clock: C,
    state: Mutex<State>,
}

impl TokenBucket<SystemClock> {
    /// Creates a full bucket driven by the system clock.
    pub fn new(capacity: u64, interval: Duration) -> Result<Self, Error> {
        Self::with_clock(capacity, interval, SystemClock)
    }
}

impl<C: Clock> TokenBucket<C> {
    /// Fails with [`Error::ZeroInterval`] if `interval` is zero.
    pub fn with_clock(capacity: u64, interval: Duration, clock: C) -> Result<Self, Error> {
        if interval.is_zero() {
            return Err(Error::ZeroInterval);
        }

        let last_update = clock.now();
        debug!(capacity, ?interval, "creating token bucket");

        Ok(Self {
            capacity,
            interval,
            policy: RefillPolicy::default(),
            clock,
            state: Mutex::new(State {
                available: capacity,
                last_update,
            }),
        })
    }

    pub fn refill_policy(mut self, policy: RefillPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Credits any refill that has become due as a side effect.
    pub fn available_tokens(&self) -> u64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.available
    }

    /// Same as `take_n(1)`.
    pub fn take(&self) -> bool {
        self.take_n(1)
    }

    /// Withdraws `n` tokens, or none if fewer than `n` are available.
    pub fn take_n(&self, n: u64) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);

        if state.available >= n {
            state.available -= n;
            trace!(n, remaining = state.available, "took tokens");
            true
        } else {
            trace!(n, available = state.available, "not enough tokens");
            false
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn policy(&self) -> RefillPolicy {
        self.policy
    }

    // Must be called with the lock held.
    fn refill(&self, state: &mut State) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(state.last_update);
        let intervals = elapsed.as_nanos() / self.interval.as_nanos();
        if intervals == 0 {
            return;
        }

        let credited = u64::try_from(intervals).unwrap_or(u64::MAX);
        let refilled = state.available.saturating_add(credited);
        state.available = match self.policy {
            RefillPolicy::Accumulate => refilled,
            RefillPolicy::CapAtCapacity => refilled.min(self.capacity),
        };
        // Whole intervals only; the partial one carries over to the next call.
        state.last_update += scaled(self.interval, intervals);

        trace!(credited, available = state.available, "refilled");
    }
}

/// `interval * n`, for an `n` whose product is known to fit in a `Duration`.
fn scaled(interval: Duration, n: u128) -> Duration {
    let nanos = interval.as_nanos().saturating_mul(n);
    let secs = u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % NANOS_PER_SEC) as u32)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;
    use crate::clock::ManualClock;

    const SECOND: Duration = Duration::from_secs(1);

    fn bucket(capacity: u64, interval: Duration) -> (TokenBucket<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let bucket = TokenBucket::with_clock(capacity, interval, clock.clone()).unwrap();
        (bucket, clock)
    }

    #[test]
    fn starts_full() {
        let (bucket, _) = bucket(7, SECOND);
        assert_eq!(bucket.available_tokens(), 7);
        assert_eq!(bucket.capacity(), 7);
        assert_eq!(bucket.interval(), SECOND);
        assert_eq!(bucket.policy(), RefillPolicy::Accumulate);
    }

    #[test]
    fn rejects_zero_interval() {
        let err = TokenBucket::new(5, Duration::ZERO).unwrap_err();
        assert_eq!(err, Error::ZeroInterval);
    }

    #[test]
    fn take_sequence() {
        // 5 tokens, one more every second.
        let (bucket, clock) = bucket(5, Duration::from_millis(1000));

        assert_eq!(bucket.available_tokens(), 5);
        assert!(!bucket.take_n(6));
        assert_eq!(bucket.available_tokens(), 5);

        for expected in (0..5).rev() {
            assert!(bucket.take());
            assert_eq!(bucket.available_tokens(), expected);
        }
        assert!(!bucket.take());
        assert_eq!(bucket.available_tokens(), 0);

        clock.advance(Duration::from_millis(800));
        assert!(!bucket.take());
        assert_eq!(bucket.available_tokens(), 0);

        clock.advance(Duration::from_millis(200));
        assert_eq!(bucket.available_tokens(), 1);
        assert!(bucket.take());
        assert_eq!(bucket.available_tokens(), 0);
    }

    #[test]
    fn failed_take_leaves_tokens_alone() {
        let (bucket, _) = bucket(3, SECOND);
        assert!(!bucket.take_n(4));
        assert_eq!(bucket.available_tokens(), 3);
        assert!(bucket.take_n(3));
        assert_eq!(bucket.available_tokens(), 0);
    }

    #[test]
    fn taking_zero_always_succeeds() {
        let (bucket, _) = bucket(0, SECOND);
        assert!(bucket.take_n(0));
        assert!(!bucket.take());
        assert_eq!(bucket.available_tokens(), 0);
    }

    #[test]
    fn credits_whole_intervals_only() {
        let (bucket, clock) = bucket(0, Duration::from_millis(100));

        clock.advance(Duration::from_millis(350));
        assert_eq!(bucket.available_tokens(), 3);

        // The 50ms left over from the last call counts towards the next token.
        clock.advance(Duration::from_millis(50));
        assert_eq!(bucket.available_tokens(), 4);

        clock.advance(Duration::from_millis(99));
        assert_eq!(bucket.available_tokens(), 4);
        clock.advance(Duration::from_millis(1));
        assert_eq!(bucket.available_tokens(), 5);
    }

    #[test]
    fn refill_matches_elapsed_time_regardless_of_polling() {
        let (polled, clock) = bucket(2, Duration::from_millis(30));
        let idle = TokenBucket::with_clock(2, Duration::from_millis(30), clock.clone()).unwrap();

        for _ in 0..100 {
            clock.advance(Duration::from_millis(7));
            polled.available_tokens();
        }

        // 700ms / 30ms = 23 whole intervals.
        assert_eq!(polled.available_tokens(), 2 + 23);
        assert_eq!(idle.available_tokens(), 2 + 23);
    }

    #[test]
    fn reads_do_not_double_credit() {
        let (bucket, clock) = bucket(1, SECOND);

        clock.advance(SECOND);
        let first = bucket.available_tokens();
        assert_eq!(first, 2);

        clock.advance(Duration::from_millis(400));
        assert_eq!(bucket.available_tokens(), first);
        clock.advance(Duration::from_millis(400));
        assert_eq!(bucket.available_tokens(), first);
        assert_eq!(bucket.available_tokens(), first);
    }

    #[test]
    fn idle_bucket_accumulates_past_capacity() {
        let (bucket, clock) = bucket(2, SECOND);
        clock.advance(10 * SECOND);
        assert_eq!(bucket.available_tokens(), 12);
        assert!(bucket.take_n(12));
    }

    #[test]
    fn capped_bucket_stops_at_capacity() {
        let clock = ManualClock::new();
        let bucket = TokenBucket::with_clock(2, SECOND, clock.clone())
            .unwrap()
            .refill_policy(RefillPolicy::CapAtCapacity);

        clock.advance(10 * SECOND);
        assert_eq!(bucket.available_tokens(), 2);

        assert!(bucket.take_n(2));
        clock.advance(SECOND);
        assert_eq!(bucket.available_tokens(), 1);
        clock.advance(5 * SECOND);
        assert_eq!(bucket.available_tokens(), 2);
    }

    #[test]
    fn huge_elapsed_time_saturates() {
        let (bucket, clock) = bucket(1, Duration::from_nanos(1));
        clock.advance(Duration::from_secs(1 << 40));
        assert_eq!(bucket.available_tokens(), u64::MAX);
        assert!(bucket.take());
        assert_eq!(bucket.available_tokens(), u64::MAX - 1);
    }

    #[test]
    fn concurrent_takes_never_overdraw() {
        const TOKENS: u64 = 10;
        const CALLERS: usize = 32;

        let (bucket, _) = bucket(TOKENS, Duration::from_secs(3600));
        let bucket = Arc::new(bucket);
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    bucket.take()
                })
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();

        assert_eq!(granted as u64, TOKENS);
        assert_eq!(bucket.available_tokens(), 0);
    }

    #[test]
    fn concurrent_mixed_sizes_conserve_tokens() {
        let (bucket, _) = bucket(1000, Duration::from_secs(3600));
        let bucket = Arc::new(bucket);

        let handles: Vec<_> = (1..=8u64)
            .map(|n| {
                let bucket = Arc::clone(&bucket);
                thread::spawn(move || {
                    let mut taken = 0;
                    for _ in 0..200 {
                        if bucket.take_n(n) {
                            taken += n;
                        }
                        // Reading concurrently must not disturb the count.
                        bucket.available_tokens();
                    }
                    taken
                })
            })
            .collect();

        let taken: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(taken + bucket.available_tokens(), 1000);
    }
}
