//! Reconnect backoff policies.
//!
//! A policy maps the state of one reconnect episode to the delay before the
//! next attempt, or `None` to give up. Policies are stateless: everything they
//! need arrives in the [`RetryContext`], which the connection owns for the
//! duration of the episode and rebuilds for the next one.

use std::time::Duration;

use crate::errors::ConnectionError;

/// Delays of the default policy, in milliseconds. A fifth attempt gives up.
pub const DEFAULT_RETRY_DELAYS_MS: [u64; 4] = [0, 2_000, 10_000, 30_000];

/// Inputs to one [`RetryPolicy`] decision.
#[derive(Clone, Debug)]
pub struct RetryContext {
    /// Attempts already failed in this episode. The first query sees 0.
    pub previous_retry_count: u32,
    /// Time since the episode began.
    pub elapsed: Duration,
    /// Error that caused the episode, or the last failed attempt's error.
    pub retry_reason: ConnectionError,
}

/// Decides how long to wait before the next reconnect attempt.
pub trait RetryPolicy: Send + Sync {
    /// Delay before the next attempt, or `None` to stop retrying.
    fn next_retry_delay(&self, context: &RetryContext) -> Option<Duration>;
}

impl<F> RetryPolicy for F
where
    F: Fn(&RetryContext) -> Option<Duration> + Send + Sync,
{
    fn next_retry_delay(&self, context: &RetryContext) -> Option<Duration> {
        self(context)
    }
}

/// Count-indexed delay table. Gives up once the table is exhausted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefaultReconnectPolicy {
    delays: Vec<Duration>,
}

impl DefaultReconnectPolicy {
    /// The standard `[0, 2s, 10s, 30s]` table.
    pub fn new() -> Self {
        Self {
            delays: DEFAULT_RETRY_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        }
    }

    /// A custom table. An empty table disables retrying entirely.
    pub fn with_delays(delays: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            delays: delays.into_iter().collect(),
        }
    }

    /// The configured table.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

impl Default for DefaultReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicy for DefaultReconnectPolicy {
    fn next_retry_delay(&self, context: &RetryContext) -> Option<Duration> {
        self.delays
            .get(context.previous_retry_count as usize)
            .copied()
    }
}

/// Fixed delay until a wall-clock budget is spent.
///
/// The decision uses [`RetryContext::elapsed`], so the same policy instance
/// serves every episode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElapsedTimePolicy {
    delay: Duration,
    max_elapsed: Duration,
}

impl ElapsedTimePolicy {
    /// Retry every `delay` until `max_elapsed` has passed in the episode.
    pub fn new(delay: Duration, max_elapsed: Duration) -> Self {
        Self { delay, max_elapsed }
    }
}

impl RetryPolicy for ElapsedTimePolicy {
    fn next_retry_delay(&self, context: &RetryContext) -> Option<Duration> {
        if context.elapsed.saturating_add(self.delay) > self.max_elapsed {
            return None;
        }
        Some(self.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ctx(count: u32, elapsed_ms: u64) -> RetryContext {
        RetryContext {
            previous_retry_count: count,
            elapsed: Duration::from_millis(elapsed_ms),
            retry_reason: ConnectionError::Lost("test".into()),
        }
    }

    #[test]
    fn default_table_values() {
        let policy = DefaultReconnectPolicy::new();
        assert_eq!(policy.next_retry_delay(&ctx(0, 0)), Some(Duration::ZERO));
        assert_eq!(
            policy.next_retry_delay(&ctx(1, 0)),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            policy.next_retry_delay(&ctx(2, 0)),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            policy.next_retry_delay(&ctx(3, 0)),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn default_table_gives_up_on_fifth_query() {
        let policy = DefaultReconnectPolicy::default();
        assert_eq!(policy.next_retry_delay(&ctx(4, 0)), None);
        assert_eq!(policy.next_retry_delay(&ctx(40, 0)), None);
    }

    #[test]
    fn custom_table() {
        let policy = DefaultReconnectPolicy::with_delays([Duration::from_millis(5)]);
        assert_eq!(
            policy.next_retry_delay(&ctx(0, 0)),
            Some(Duration::from_millis(5))
        );
        assert_eq!(policy.next_retry_delay(&ctx(1, 0)), None);
    }

    #[test]
    fn empty_table_never_retries() {
        let policy = DefaultReconnectPolicy::with_delays([]);
        assert_eq!(policy.next_retry_delay(&ctx(0, 0)), None);
    }

    #[test]
    fn elapsed_policy_stops_after_budget() {
        let policy = ElapsedTimePolicy::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(
            policy.next_retry_delay(&ctx(0, 0)),
            Some(Duration::from_secs(1))
        );
        assert_eq!(
            policy.next_retry_delay(&ctx(50, 9_000)),
            Some(Duration::from_secs(1))
        );
        assert_eq!(policy.next_retry_delay(&ctx(1, 9_500)), None);
    }

    #[test]
    fn closures_are_policies() {
        let unbounded = |c: &RetryContext| Some(Duration::from_millis(u64::from(c.previous_retry_count)));
        assert_eq!(
            unbounded.next_retry_delay(&ctx(1_000, 0)),
            Some(Duration::from_millis(1_000))
        );
    }

    proptest! {
        #[test]
        fn default_policy_is_pure(count in 0u32..16, elapsed in 0u64..1_000_000) {
            let policy = DefaultReconnectPolicy::new();
            let a = policy.next_retry_delay(&ctx(count, elapsed));
            let b = policy.next_retry_delay(&ctx(count, 0));
            prop_assert_eq!(a, b);
            prop_assert_eq!(a.is_none(), count >= 4);
        }
    }
}
