use std::time::Duration;

use crate::config::ReconnectPolicy;

/// Exponential backoff without jitter.
///
/// `delay = min(initial * 2^attempt, max)`
///
/// Deterministic, so consecutive delays never shrink.
pub fn backoff(attempt: u32, policy: &ReconnectPolicy) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| policy.initial_delay.checked_mul(factor))
        .map_or(policy.max_delay, |delay| delay.min(policy.max_delay))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (0..6).map(|a| backoff(a, &policy).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
    }

    #[test]
    fn delays_never_decrease() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            ..ReconnectPolicy::default()
        };

        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = backoff(attempt, &policy);
            assert!(delay >= previous, "attempt {attempt}: {delay:?} < {previous:?}");
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
    }
}
