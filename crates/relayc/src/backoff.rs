use crate::config::ReconnectConfig;
use rand::Rng;
use std::ops::RangeInclusive;
use std::time::Duration;

/// Multiplicative jitter applied to every delay.
const JITTER: RangeInclusive<f64> = 0.75..=1.25;

/// Exponential reconnect delay with randomized jitter.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_ms: u64,
    max_ms: u64,
    factor: f64,
    current_ms: u64,
}

impl ExponentialBackoff {
    /// # Examples
    ///
    /// ```
    /// use relayc::backoff::ExponentialBackoff;
    /// use std::time::Duration;
    /// let mut backoff = ExponentialBackoff::new(
    ///     Duration::from_millis(200),
    ///     Duration::from_secs(10),
    ///     2.0,
    /// );
    /// let delay = backoff.next_delay();
    /// assert!(delay >= Duration::from_millis(150));
    /// assert!(delay <= Duration::from_millis(250));
    /// ```
    #[must_use]
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        let initial_ms = saturating_ms(initial);
        Self {
            initial_ms,
            max_ms: saturating_ms(max),
            factor,
            current_ms: initial_ms,
        }
    }

    /// Build from the `[reconnect]` configuration section.
    #[must_use]
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.backoff_factor,
        )
    }

    /// Return the jittered current delay and grow the base for next time.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current_ms as f64;
        let jittered = base * rand::thread_rng().gen_range(JITTER);

        // `as u64` saturates for out-of-range floats.
        let grown = (base * self.factor) as u64;
        self.current_ms = grown.min(self.max_ms);

        Duration::from_millis(jittered as u64)
    }

    /// Go back to the initial delay after a connection succeeded.
    pub fn reset(&mut self) {
        self.current_ms = self.initial_ms;
    }
}

fn saturating_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
