use std::time::Duration;

use rand::Rng;

use crate::error::{ApiError, ApiErrorKind};

/// Where a request currently stands in its retry lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// About to issue attempt number `attempt` (1-based)
    Attempting { attempt: u32 },
    /// Attempt `attempt` failed transiently; sleep `delay` before the next one
    Backoff { attempt: u32, delay: Duration },
    Succeeded,
    Failed(ApiErrorKind),
}

/// Exponential backoff policy for transient API failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Seed delay when the server gives no `Retry-After`
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random extra delay as a fraction of the computed delay (0.0 disables)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn start(&self) -> RetryState {
        RetryState::Attempting { attempt: 1 }
    }

    /// Advance the state machine after attempt `attempt` finished
    pub fn next(&self, attempt: u32, outcome: Result<(), &ApiError>) -> RetryState {
        let err = match outcome {
            Ok(()) => return RetryState::Succeeded,
            Err(err) => err,
        };

        if !err.kind.is_transient() || attempt >= self.max_attempts {
            return RetryState::Failed(err.kind);
        }

        RetryState::Backoff {
            attempt,
            delay: self.delay_for(attempt, err.retry_after),
        }
    }

    /// Delay after the given failed attempt: seed doubled per prior attempt, capped
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let seed = retry_after.unwrap_or(self.base_delay);
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        let delay = seed.saturating_mul(factor).min(self.max_delay);
        // The server's advisory wait is a floor, even when it exceeds max_delay
        let delay = delay.max(retry_after.unwrap_or_default());

        if self.jitter > 0.0 {
            let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
            delay + delay.mul_f64(extra)
        } else {
            delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
        }
    }

    fn err(kind: ApiErrorKind) -> ApiError {
        ApiError::new(kind, "test")
    }

    #[test]
    fn test_success_ends_machine() {
        assert_eq!(policy().next(1, Ok(())), RetryState::Succeeded);
    }

    #[test]
    fn test_permanent_errors_fail_immediately() {
        for kind in [
            ApiErrorKind::NotFound,
            ApiErrorKind::Unauthorized,
            ApiErrorKind::Malformed,
        ] {
            assert_eq!(policy().next(1, Err(&err(kind))), RetryState::Failed(kind));
        }
    }

    #[test]
    fn test_backoff_doubles_from_base() {
        let p = policy();
        let e = err(ApiErrorKind::ServerError);
        assert_eq!(
            p.next(1, Err(&e)),
            RetryState::Backoff {
                attempt: 1,
                delay: Duration::from_millis(500)
            }
        );
        assert_eq!(
            p.next(2, Err(&e)),
            RetryState::Backoff {
                attempt: 2,
                delay: Duration::from_millis(1000)
            }
        );
        assert_eq!(p.next(3, Err(&e)), RetryState::Failed(ApiErrorKind::ServerError));
    }

    #[test]
    fn test_retry_after_seeds_backoff() {
        let e = ApiError::from_status(429, Some(Duration::from_secs(2)), "");
        assert_eq!(
            policy().next(1, Err(&e)),
            RetryState::Backoff {
                attempt: 1,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(policy().delay_for(2, Some(Duration::from_secs(2))), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_is_capped() {
        let p = policy();
        assert_eq!(p.delay_for(10, None), Duration::from_secs(10));
        // but never below what the server asked for
        assert_eq!(p.delay_for(1, Some(Duration::from_secs(15))), Duration::from_secs(15));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let p = RetryPolicy {
            jitter: 0.5,
            ..policy()
        };
        for _ in 0..50 {
            let d = p.delay_for(1, None);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(750));
        }
    }
}
