use anyhow::{Result, bail};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MAX_WAIT_ITERATIONS: usize = 50;
const DEFAULT_CAP: Duration = Duration::from_secs(10);

/// Sleeps through `n` full-jitter backoff attempts, aborting immediately if
/// `cancel` fires. Used by I/O retry loops (SSH dial, volume copy, cluster
/// broker reconnects) where cancellation must suspend a backoff sleep
/// without waiting for it to elapse.
pub async fn wait(cancel: &CancellationToken, n: usize) -> Result<()> {
    wait_with_backoff(cancel, n, DEFAULT_CAP).await
}

pub async fn wait_with_backoff(cancel: &CancellationToken, n: usize, cap: Duration) -> Result<()> {
    let n = n.clamp(1, MAX_WAIT_ITERATIONS);
    let base = Duration::from_millis(250);

    for attempt in 0..n {
        let delay = backoff_full_jitter(base, cap, attempt);

        tokio::select! {
            _ = cancel.cancelled() => bail!("context cancelled"),
            _ = tokio::time::sleep(delay) => {}
        }
    }

    Ok(())
}

/// Exponential backoff w/ "full jitter": sleep for a random duration in
/// `[0, min(cap, base * 2^attempt)]`. Behaves well under contention and
/// avoids lockstep retries across concurrent workers.
pub fn backoff_full_jitter(base: Duration, cap: Duration, attempt: usize) -> Duration {
    let base_ms = base.as_millis() as u64;
    let cap_ms = cap.as_millis() as u64;

    let pow = if attempt >= 63 {
        u64::MAX
    } else {
        1u64 << attempt
    };

    let exp_ms = base_ms.saturating_mul(pow);
    let upper = exp_ms.min(cap_ms).max(1);

    let jitter_ms = rand::random_range(0..=upper);
    Duration::from_millis(jitter_ms)
}

/// Deterministic (non-jittered) backoff growth used for status-visible retry
/// envelopes, where the next backoff must be a reproducible function of the
/// previous one (spec invariant: `backoff ∈ [initial, max]`, monotonic
/// growth by `multiplier_percent` until capped).
pub fn grow_backoff(current: Duration, multiplier_percent: u32, cap: Duration) -> Duration {
    let current_ms = current.as_millis() as u64;
    let grown_ms = current_ms.saturating_mul(multiplier_percent as u64) / 100;
    Duration::from_millis(grown_ms.min(cap.as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_jitter_never_exceeds_cap() {
        let base = Duration::from_millis(250);
        let cap = Duration::from_secs(5);
        for attempt in 0..20 {
            let d = backoff_full_jitter(base, cap, attempt);
            assert!(d <= cap);
        }
    }

    #[test]
    fn grow_backoff_doubles_and_caps() {
        let initial = Duration::from_secs(5);
        let cap = Duration::from_secs(300);
        let mut backoff = initial;
        for _ in 0..20 {
            backoff = grow_backoff(backoff, 200, cap);
            assert!(backoff <= cap);
        }
        assert_eq!(backoff, cap);
    }
}
