//! Exponential backoff for consumer poll errors.

use std::time::Duration;

/// Delay schedule applied between consecutive poll errors.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    /// Base delay after the first error (default: 100ms)
    pub base_delay: Duration,
    /// Maximum delay cap (default: 30s)
    pub max_delay: Duration,
    /// Whether to add jitter (randomness) to delays (default: true)
    pub jitter: bool,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl PollBackoff {
    /// Create a backoff with custom bounds.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    /// Disable jitter (for testing).
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Calculate the delay after `attempt` consecutive errors (0-based).
    ///
    /// Uses exponential backoff: min(max_delay, base_delay * 2^attempt)
    /// Optionally adds jitter (±25%) so both loops do not retry in lockstep.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;

        let delay_ms = base_ms.saturating_mul(1u64 << attempt.min(20));
        let capped_delay_ms = delay_ms.min(max_ms);

        let final_delay_ms = if self.jitter {
            let jitter_range = capped_delay_ms / 4;
            let jitter = (std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as u64)
                % (jitter_range * 2 + 1);
            capped_delay_ms.saturating_sub(jitter_range) + jitter
        } else {
            capped_delay_ms
        };

        Duration::from_millis(final_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let backoff = PollBackoff::default();
        assert_eq!(backoff.base_delay, Duration::from_millis(100));
        assert_eq!(backoff.max_delay, Duration::from_secs(30));
        assert!(backoff.jitter);
        assert!(!backoff.without_jitter().jitter);
    }

    #[test]
    fn test_calculate_delay_exponential() {
        let backoff =
            PollBackoff::new(Duration::from_millis(100), Duration::from_secs(30)).without_jitter();

        assert_eq!(backoff.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(backoff.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(backoff.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(backoff.calculate_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_calculate_delay_caps_at_max() {
        let backoff =
            PollBackoff::new(Duration::from_millis(100), Duration::from_secs(1)).without_jitter();

        assert_eq!(backoff.calculate_delay(10), Duration::from_millis(1000));
        // Very high attempt numbers must not overflow
        assert_eq!(backoff.calculate_delay(100), Duration::from_millis(1000));
    }

    #[test]
    fn test_calculate_delay_with_jitter() {
        let backoff = PollBackoff::new(Duration::from_millis(1000), Duration::from_secs(30));

        let delay = backoff.calculate_delay(0);
        assert!(delay >= Duration::from_millis(750), "delay {:?} too short", delay);
        assert!(delay <= Duration::from_millis(1250), "delay {:?} too long", delay);
    }
}
