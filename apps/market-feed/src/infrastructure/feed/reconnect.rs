//! Reconnection Policy
//!
//! Bounded exponential backoff for re-establishing a lost feed connection.
//! The delay before retry `n` (zero-based) is
//! `min(initial * multiplier^n, max)`, optionally spread by a jitter factor.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor per retry.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.0 disables it).
    pub jitter_factor: f64,
    /// Maximum retries before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    /// Set the jitter factor.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: settings.reconnect_jitter,
            max_attempts: settings.max_reconnect_attempts,
        }
    }

    /// Un-jittered delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let max_millis = self.max_delay.as_millis();
        #[allow(clippy::cast_precision_loss)]
        let initial = self.initial_delay.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = (initial * self.multiplier.powi(exponent)).round();

        let millis = if scaled.is_finite() && scaled >= 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                (scaled as u128).min(max_millis)
            }
        } else if scaled.is_nan() {
            0
        } else {
            max_millis
        };
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

/// Tracks retries since the last successful open.
///
/// # Example
///
/// ```rust
/// use market_feed::infrastructure::feed::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let config = ReconnectConfig::new(
///     Duration::from_millis(1000),
///     Duration::from_secs(30),
///     2.0,
///     5,
/// );
/// let mut policy = ReconnectPolicy::new(config);
///
/// assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(1000));
/// assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(2000));
///
/// // Connection opened
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Record an unexpected close and get the delay before the next retry.
    ///
    /// # Errors
    ///
    /// Returns [`ReconnectError::Exhausted`] once the retry budget is used up.
    /// The attempt counter is left unchanged in that case.
    pub fn next_delay(&mut self) -> Result<Duration, ReconnectError> {
        if !self.should_retry() {
            return Err(ReconnectError::Exhausted {
                attempts: self.attempt_count,
            });
        }

        let delay = self.apply_jitter(self.config.base_delay(self.attempt_count));
        self.attempt_count += 1;
        Ok(delay)
    }

    /// Reset the policy after a successful open.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Retries scheduled since the last successful open.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another retry is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// The policy's configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

/// Error type for reconnection failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    /// The retry budget is used up.
    #[error("reconnect attempts exhausted after {attempts} attempts")]
    Exhausted {
        /// Retries scheduled before giving up.
        attempts: u32,
    },
}
