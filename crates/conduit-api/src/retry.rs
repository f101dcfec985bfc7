//! Backoff policy for transient chat-completion failures.

use conduit_types::ApiError;
use rand::Rng;

/// How many times, and how patiently, a failed request is re-sent.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Whether `error`, raised on zero-based `attempt`, warrants another try.
    pub fn should_retry(&self, error: &ApiError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_transient()
    }

    /// Milliseconds to wait before retrying after zero-based `attempt`.
    ///
    /// A server-provided `Retry-After` wins (capped at `max_delay_ms`);
    /// otherwise the delay grows geometrically with ±25% jitter.
    pub fn delay_ms(&self, attempt: u32, retry_after_ms: Option<u64>) -> u64 {
        if let Some(server_delay) = retry_after_ms {
            return server_delay.min(self.max_delay_ms);
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = (self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent))
            .min(self.max_delay_ms as f64);
        let jitter = rand::rng().random_range(0.75..=1.25);

        ((base * jitter) as u64).min(self.max_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
        }
    }

    #[test]
    fn transient_errors_retry_until_budget_spent() {
        let p = policy(2);
        let err = ApiError::RateLimited {
            retry_after_ms: None,
        };
        assert!(p.should_retry(&err, 0));
        assert!(p.should_retry(&err, 1));
        assert!(!p.should_retry(&err, 2));
    }

    #[test]
    fn permanent_errors_never_retry() {
        let p = policy(5);
        assert!(!p.should_retry(
            &ApiError::Auth {
                message: "bad key".into()
            },
            0
        ));
        assert!(!p.should_retry(
            &ApiError::BadRequest {
                message: "bad input".into()
            },
            0
        ));
        assert!(!p.should_retry(&ApiError::StreamParse("junk".into()), 0));
    }

    #[test]
    fn none_policy_never_retries() {
        assert!(!RetryPolicy::none().should_retry(&ApiError::Timeout, 0));
    }

    #[test]
    fn delay_grows_with_attempts() {
        let p = policy(5);
        let d0 = p.delay_ms(0, None);
        let d2 = p.delay_ms(2, None);
        assert!((750..=1250).contains(&d0), "d0={d0}");
        assert!((3000..=5000).contains(&d2), "d2={d2}");
    }

    #[test]
    fn retry_after_overrides_backoff() {
        assert_eq!(policy(2).delay_ms(3, Some(1500)), 1500);
    }

    #[test]
    fn delays_are_capped() {
        let p = RetryPolicy {
            max_delay_ms: 5000,
            backoff_factor: 10.0,
            ..policy(10)
        };
        assert!(p.delay_ms(6, None) <= 5000);
        assert_eq!(p.delay_ms(0, Some(90_000)), 5000);
    }
}
