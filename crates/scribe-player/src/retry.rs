//! Bounded retry/backoff for transiently-failing engine queries.
//!
//! Position queries are unreliable immediately after a state change, and
//! a failed query is indistinguishable from a legitimate zero result if
//! zero is used as the sentinel. The engine therefore reports an
//! explicit [`QueryPending`] and callers retry here with a bound instead
//! of spinning.

use std::thread;
use std::time::Duration;

use crate::engine::Query;

/// Retry budget for a pending query.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of query attempts (>= 1).
    pub attempts: u32,
    /// Sleep before the second attempt; doubled per retry.
    pub initial_backoff: Duration,
    /// Cap for the per-retry sleep.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    /// Roughly 200 ms worst case: enough for a pipeline that is still
    /// settling after a state change, short enough to never look hung.
    fn default() -> Self {
        Self {
            attempts: 20,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(20),
        }
    }
}

/// Run `query` until it succeeds or the retry budget is exhausted.
///
/// Returns `None` when every attempt reported pending. Sleeps between
/// attempts (never after the last one), doubling the backoff up to the
/// policy cap.
pub fn retry_query<T>(policy: &RetryPolicy, mut query: impl FnMut() -> Query<T>) -> Option<T> {
    let attempts = policy.attempts.max(1);
    let mut backoff = policy.initial_backoff;

    for attempt in 0..attempts {
        if let Ok(value) = query() {
            return Some(value);
        }
        if attempt + 1 < attempts {
            if !backoff.is_zero() {
                thread::sleep(backoff);
            }
            backoff = (backoff * 2).min(policy.max_backoff);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::QueryPending;

    fn instant_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    #[test]
    fn returns_first_successful_value() {
        let mut results = vec![Err(QueryPending), Err(QueryPending), Ok(7u64)].into_iter();
        let got = retry_query(&instant_policy(5), || results.next().unwrap());
        assert_eq!(got, Some(7));
    }

    #[test]
    fn gives_up_after_budget() {
        let mut calls = 0u32;
        let got: Option<u64> = retry_query(&instant_policy(3), || {
            calls += 1;
            Err(QueryPending)
        });
        assert_eq!(got, None);
        assert_eq!(calls, 3);
    }

    #[test]
    fn zero_attempts_still_queries_once() {
        let mut calls = 0u32;
        let got = retry_query(&instant_policy(0), || {
            calls += 1;
            Ok(1u64)
        });
        assert_eq!(got, Some(1));
        assert_eq!(calls, 1);
    }

    #[test]
    fn legitimate_zero_is_a_success() {
        let got = retry_query(&instant_policy(1), || Ok(0u64));
        assert_eq!(got, Some(0));
    }
}
