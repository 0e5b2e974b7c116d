//! Configuration for the commit engine.

use std::time::Duration;

/// What happens to the pending queue when a commit partially fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartialFailurePolicy {
    /// Drop settled operations from the queue; only failed work stays
    /// pending, so the next commit never re-sends applied changes.
    #[default]
    PruneSucceeded,
    /// Keep the whole queue untouched until a fully successful commit.
    RetainQueue,
}

/// Configuration for a controller and its executor.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Course the curriculum belongs to.
    pub course_id: String,
    /// Maximum concurrent remote calls inside a concurrent phase. Zero runs
    /// them one at a time.
    pub max_in_flight: usize,
    /// Queue handling after a partial failure.
    pub partial_failure: PartialFailurePolicy,
    /// Retry configuration for `retry_failed`.
    pub retry: RetryConfig,
}

impl EngineConfig {
    /// Creates a new configuration for a course.
    pub fn new(course_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            max_in_flight: 8,
            partial_failure: PartialFailurePolicy::default(),
            retry: RetryConfig::no_retry(),
        }
    }

    /// Sets the concurrency limit. Zero is treated as one.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    /// Sets the partial failure policy.
    pub fn with_partial_failure(mut self, policy: PartialFailurePolicy) -> Self {
        self.partial_failure = policy;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Backoff for [`retry_failed`](crate::CurriculumController::retry_failed).
///
/// A retry runs in rounds. Each round re-sends every operation whose last
/// failure was retryable; rounds stop when nothing retryable is left, when
/// `max_attempts` rounds have run, or when the commit is aborted. Between
/// rounds the controller sleeps for [`backoff_after`](Self::backoff_after)
/// under the commit's cancellation token, so an abort cuts the wait short.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Rounds per `retry_failed` call, never less than one.
    pub max_attempts: u32,
    /// Wait after the first failed round.
    pub initial_delay: Duration,
    /// Upper bound for any wait.
    pub max_delay: Duration,
    /// Growth factor applied to the wait after each further round.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Up to `max_attempts` rounds, starting at 100ms and doubling, capped
    /// at 30s.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    /// A single round: failed operations are re-sent once, never waited on.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the first wait.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the cap on every wait.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor. Values below one are treated as one.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Returns true if another round may follow `rounds` finished ones.
    pub fn allows_round_after(&self, rounds: u32) -> bool {
        rounds < self.max_attempts.max(1)
    }

    /// Wait after `rounds` failed rounds; zero before any round has run.
    pub fn backoff_after(&self, rounds: u32) -> Duration {
        let Some(exponent) = rounds.checked_sub(1) else {
            return Duration::ZERO;
        };
        let factor = self
            .backoff_multiplier
            .max(1.0)
            .powi(i32::try_from(exponent).unwrap_or(i32::MAX));
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_builder() {
        let config = EngineConfig::new("course-1")
            .with_max_in_flight(0)
            .with_partial_failure(PartialFailurePolicy::RetainQueue)
            .with_retry(RetryConfig::new(4));

        assert_eq!(config.course_id, "course-1");
        assert_eq!(config.max_in_flight, 1);
        assert_eq!(config.partial_failure, PartialFailurePolicy::RetainQueue);
        assert_eq!(config.retry.max_attempts, 4);
    }

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.partial_failure, PartialFailurePolicy::PruneSucceeded);
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn backoff_grows_between_rounds() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.backoff_after(0), Duration::ZERO);
        assert_eq!(config.backoff_after(1), Duration::from_millis(100));
        assert_eq!(config.backoff_after(2), Duration::from_millis(200));
        assert_eq!(config.backoff_after(3), Duration::from_millis(400));
    }

    #[test]
    fn backoff_is_capped() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        assert_eq!(config.backoff_after(5), Duration::from_secs(5));
        assert_eq!(config.backoff_after(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn rounds_are_bounded() {
        let config = RetryConfig::new(2);
        assert!(config.allows_round_after(1));
        assert!(!config.allows_round_after(2));

        let single = RetryConfig::no_retry();
        assert!(!single.allows_round_after(1));
        assert_eq!(single.backoff_after(1), Duration::ZERO);
    }
}
