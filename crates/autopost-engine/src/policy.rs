//! Retry/backoff policy — a pure decision function over a send outcome.
//!
//! Keeping this free of I/O means every branch is unit-testable without a
//! network or a clock.

use std::time::Duration;

use autopost_core::config::RetryPolicy;
use autopost_core::task::SendOutcome;

/// What the worker does next with the current attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The cycle is finished; hand the task back to the rescheduler.
    Reschedule { success: bool },
    /// Sleep `delay`, then retry the same send in place.
    /// `advance_attempt` is false for API-demanded waits (flood/slow mode),
    /// which do not count against the transient retry budget.
    RetryAfter {
        delay: Duration,
        advance_attempt: bool,
    },
    /// Unrecoverable: park the task (set inactive), alert, do not retry.
    Park,
}

/// Classify an outcome and decide whether/when to retry.
///
/// `attempt` is the number of transient retries already spent on this cycle.
pub fn decide(attempt: u32, outcome: &SendOutcome, policy: &RetryPolicy) -> Decision {
    match outcome {
        SendOutcome::Success => Decision::Reschedule { success: true },
        SendOutcome::RateLimited { retry_after_secs } => Decision::RetryAfter {
            delay: Duration::from_secs((*retry_after_secs).min(policy.flood_wait_cap_secs)),
            advance_attempt: false,
        },
        SendOutcome::SlowMode { retry_after_secs } => Decision::RetryAfter {
            delay: Duration::from_secs((*retry_after_secs).min(policy.slowmode_wait_cap_secs)),
            advance_attempt: false,
        },
        SendOutcome::Fatal { .. } => Decision::Park,
        SendOutcome::Transient { .. } if attempt < policy.transient_retries => {
            Decision::RetryAfter {
                delay: Duration::from_secs(policy.transient_delay_secs),
                advance_attempt: true,
            }
        }
        SendOutcome::Transient { .. } => Decision::Reschedule { success: false },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    #[test]
    fn test_success_reschedules() {
        assert_eq!(
            decide(0, &SendOutcome::Success, &policy()),
            Decision::Reschedule { success: true }
        );
    }

    #[test]
    fn test_rate_limit_wait_is_capped() {
        let d = decide(
            0,
            &SendOutcome::RateLimited {
                retry_after_secs: 10_000,
            },
            &policy(),
        );
        assert_eq!(
            d,
            Decision::RetryAfter {
                delay: Duration::from_secs(900),
                advance_attempt: false,
            }
        );
    }

    #[test]
    fn test_short_rate_limit_wait_honored() {
        let d = decide(
            0,
            &SendOutcome::RateLimited {
                retry_after_secs: 10,
            },
            &policy(),
        );
        assert_eq!(
            d,
            Decision::RetryAfter {
                delay: Duration::from_secs(10),
                advance_attempt: false,
            }
        );
    }

    #[test]
    fn test_slow_mode_uses_smaller_cap() {
        let d = decide(
            0,
            &SendOutcome::SlowMode {
                retry_after_secs: 10_000,
            },
            &policy(),
        );
        assert_eq!(
            d,
            Decision::RetryAfter {
                delay: Duration::from_secs(60),
                advance_attempt: false,
            }
        );
    }

    #[test]
    fn test_rate_limit_never_advances_attempt() {
        // A flood wait at any attempt count stays a non-counting retry.
        let d = decide(
            99,
            &SendOutcome::RateLimited { retry_after_secs: 5 },
            &policy(),
        );
        assert!(matches!(
            d,
            Decision::RetryAfter {
                advance_attempt: false,
                ..
            }
        ));
    }

    #[test]
    fn test_transient_retries_then_falls_through() {
        let outcome = SendOutcome::Transient {
            reason: "timeout".into(),
        };
        for attempt in 0..3 {
            assert!(matches!(
                decide(attempt, &outcome, &policy()),
                Decision::RetryAfter {
                    advance_attempt: true,
                    ..
                }
            ));
        }
        assert_eq!(
            decide(3, &outcome, &policy()),
            Decision::Reschedule { success: false }
        );
    }

    #[test]
    fn test_fatal_parks() {
        let d = decide(
            0,
            &SendOutcome::Fatal {
                reason: "unauthorized".into(),
            },
            &policy(),
        );
        assert_eq!(d, Decision::Park);
    }
}
