//! Retry accounting (§4.7 "Retry accounting"): a pure-function core over the
//! `RetryStatus` envelope, so `backoff ∈ [initialBackoff, maxBackoff]` and
//! `retriesRemaining` is monotonically nonincreasing within a failure streak
//! (§8 invariant 4) are directly unit-testable.

use dr_syncer_types::{RetryConfig, RetryStatus};

/// Initializes a fresh envelope on first failure: `retriesRemaining =
/// maxRetries`, `backoff = initialBackoff`.
pub fn initial_envelope(config: &RetryConfig) -> RetryStatus {
    RetryStatus {
        retries_remaining: config.max_retries,
        backoff_seconds: config.initial_backoff_seconds,
        next_retry_time: None,
    }
}

/// Advances the envelope on a subsequent failure: backoff grows by
/// `backoffMultiplierPercent/100`, capped by `maxBackoff`; `retriesRemaining`
/// decrements by one, floored at zero.
pub fn on_failure(config: &RetryConfig, current: Option<&RetryStatus>) -> RetryStatus {
    match current {
        None => initial_envelope(config),
        Some(envelope) => {
            let grown = (envelope.backoff_seconds as u64)
                .saturating_mul(config.backoff_multiplier_percent as u64)
                / 100;
            RetryStatus {
                retries_remaining: envelope.retries_remaining.saturating_sub(1),
                backoff_seconds: grown.min(config.max_backoff_seconds),
                next_retry_time: None,
            }
        }
    }
}

/// On any success, the envelope is cleared (§4.7).
pub fn on_success() -> Option<RetryStatus> {
    None
}

/// `retriesRemaining <= 0` yields `shouldRetry=false` (§8 boundary behavior).
pub fn should_retry(envelope: &RetryStatus) -> bool {
    envelope.retries_remaining > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RetryConfig {
        RetryConfig {
            initial_backoff_seconds: 5,
            max_backoff_seconds: 300,
            backoff_multiplier_percent: 200,
            max_retries: 5,
        }
    }

    #[test]
    fn first_failure_initializes_envelope() {
        let env = on_failure(&config(), None);
        assert_eq!(env.retries_remaining, 5);
        assert_eq!(env.backoff_seconds, 5);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = config();
        let mut env = on_failure(&cfg, None);
        for _ in 0..10 {
            env = on_failure(&cfg, Some(&env));
        }
        assert!(env.backoff_seconds >= cfg.initial_backoff_seconds);
        assert!(env.backoff_seconds <= cfg.max_backoff_seconds);
        assert_eq!(env.backoff_seconds, cfg.max_backoff_seconds);
    }

    #[test]
    fn retries_remaining_is_monotonically_nonincreasing() {
        let cfg = config();
        let mut env = on_failure(&cfg, None);
        let mut last = env.retries_remaining;
        for _ in 0..10 {
            env = on_failure(&cfg, Some(&env));
            assert!(env.retries_remaining <= last);
            last = env.retries_remaining;
        }
    }

    #[test]
    fn exhausted_envelope_stops_retrying() {
        let cfg = config();
        let mut env = on_failure(&cfg, None);
        for _ in 0..cfg.max_retries {
            env = on_failure(&cfg, Some(&env));
        }
        assert_eq!(env.retries_remaining, 0);
        assert!(!should_retry(&env));
    }

    #[test]
    fn success_clears_envelope() {
        assert_eq!(on_success(), None);
    }
}
