use std::time::Duration;

use parley_config::ReconnectConfig;

use super::transport::TransportError;

/// What to do after a channel failed or was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    /// The server refused the credentials and retrying them is disabled.
    Rejected,
    /// `max_attempts` consecutive attempts have been made.
    Exhausted,
}

/// Reconnect schedule for one session: `min(base * 2^n, max)` where `n`
/// counts consecutive failures since the last established channel.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: Option<u32>,
    retry_rejected: bool,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms.max(config.base_delay_ms),
            max_attempts: config.max_attempts,
            retry_rejected: config.retry_rejected_handshake,
            attempt: 0,
        }
    }

    /// Scheduled attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Forget earlier failures. Called once a channel is established and
    /// when a session starts.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Decide on the next attempt. `cause` is the handshake error, or
    /// `None` when a live channel dropped.
    pub fn next(&mut self, cause: Option<&TransportError>) -> RetryDecision {
        if cause.map_or(false, TransportError::is_rejection) && !self.retry_rejected {
            return RetryDecision::Rejected;
        }
        if self.max_attempts.map_or(false, |max| self.attempt >= max) {
            return RetryDecision::Exhausted;
        }

        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        RetryDecision::RetryAfter(delay)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let millis = 2_u64
            .checked_pow(attempt)
            .and_then(|factor| self.base_delay_ms.checked_mul(factor))
            .map_or(self.max_delay_ms, |delay| delay.min(self.max_delay_ms));
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconnect(base: u64, max: u64) -> ReconnectConfig {
        ReconnectConfig {
            base_delay_ms: base,
            max_delay_ms: max,
            ..ReconnectConfig::default()
        }
    }

    fn delays(backoff: &mut Backoff, count: usize) -> Vec<u64> {
        (0..count)
            .map(|_| match backoff.next(None) {
                RetryDecision::RetryAfter(delay) => delay.as_millis() as u64,
                other => panic!("expected a retry, got {other:?}"),
            })
            .collect()
    }

    #[test]
    fn doubles_until_the_cap() {
        let mut backoff = Backoff::new(&reconnect(250, 1_500));
        assert_eq!(delays(&mut backoff, 5), vec![250, 500, 1_000, 1_500, 1_500]);
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn huge_attempt_counts_stay_at_the_cap() {
        let mut backoff = Backoff::new(&reconnect(1_000, 4_000));
        backoff.attempt = 200;
        assert_eq!(backoff.next(None), RetryDecision::RetryAfter(Duration::from_millis(4_000)));
    }

    #[test]
    fn reset_starts_over_from_base() {
        let mut backoff = Backoff::new(&reconnect(100, 10_000));
        delays(&mut backoff, 3);
        backoff.reset();
        assert_eq!(delays(&mut backoff, 1), vec![100]);
    }

    #[test]
    fn inverted_range_uses_base_as_cap() {
        let mut backoff = Backoff::new(&reconnect(200, 100));
        assert_eq!(delays(&mut backoff, 2), vec![200, 200]);
    }

    #[test]
    fn stops_after_max_attempts() {
        let mut config = reconnect(100, 1_000);
        config.max_attempts = Some(2);
        let mut backoff = Backoff::new(&config);

        delays(&mut backoff, 2);
        assert_eq!(backoff.next(None), RetryDecision::Exhausted);
    }

    #[test]
    fn rejection_is_final_only_when_configured() {
        let refused = TransportError::rejected("HTTP 401");

        let mut lenient = Backoff::new(&reconnect(100, 1_000));
        assert!(matches!(lenient.next(Some(&refused)), RetryDecision::RetryAfter(_)));

        let mut config = reconnect(100, 1_000);
        config.retry_rejected_handshake = false;
        let mut strict = Backoff::new(&config);
        assert_eq!(strict.next(Some(&refused)), RetryDecision::Rejected);
        assert!(matches!(
            strict.next(Some(&TransportError::Timeout)),
            RetryDecision::RetryAfter(_)
        ));
    }
}
