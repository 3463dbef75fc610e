//! Retry policy family.
//!
//! Four variants, matching the reference policies: linear backoff,
//! exponential backoff capped at a maximum delay, exponential backoff with
//! jitter to avoid thundering herd, and conditional retry driven by an
//! explicit allow-list of [`ErrorKind`]s rather than a delay curve.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// How long to wait, and whether to bother, before the next attempt.
///
/// # Example
///
/// ```
/// use durable_workflow::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential(5, Duration::from_secs(1), Duration::from_secs(60));
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RetryPolicy {
    Linear {
        max_retries: u32,
        #[serde(with = "duration_millis")]
        base_delay: Duration,
        exclude_kinds: Vec<ErrorKind>,
    },
    ExponentialCapped {
        max_retries: u32,
        #[serde(with = "duration_millis")]
        base_delay: Duration,
        #[serde(with = "duration_millis")]
        max_delay: Duration,
        exclude_kinds: Vec<ErrorKind>,
    },
    ExponentialJitter {
        max_retries: u32,
        #[serde(with = "duration_millis")]
        base_delay: Duration,
        #[serde(with = "duration_millis")]
        max_delay: Duration,
        exclude_kinds: Vec<ErrorKind>,
    },
    Conditional {
        max_retries: u32,
        #[serde(with = "duration_millis")]
        base_delay: Duration,
        retryable_kinds: Vec<ErrorKind>,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Matches the reference base class: every general-purpose variant
    /// excludes `InvalidInput` from retries unless the caller asks for
    /// something different via `with_excluded_kinds`.
    fn default_excludes() -> Vec<ErrorKind> {
        vec![ErrorKind::InvalidInput]
    }

    pub fn linear(max_retries: u32, base_delay: Duration) -> Self {
        Self::Linear {
            max_retries,
            base_delay,
            exclude_kinds: Self::default_excludes(),
        }
    }

    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self::ExponentialCapped {
            max_retries,
            base_delay,
            max_delay,
            exclude_kinds: Self::default_excludes(),
        }
    }

    pub fn exponential_jitter(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self::ExponentialJitter {
            max_retries,
            base_delay,
            max_delay,
            exclude_kinds: Self::default_excludes(),
        }
    }

    pub fn conditional(
        max_retries: u32,
        base_delay: Duration,
        retryable_kinds: Vec<ErrorKind>,
    ) -> Self {
        Self::Conditional {
            max_retries,
            base_delay,
            retryable_kinds,
        }
    }

    /// Add extra error kinds to the exclude-list of a general-purpose
    /// variant. No-op on `Conditional`, which uses an allow-list instead.
    pub fn with_excluded_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        match &mut self {
            Self::Linear { exclude_kinds, .. }
            | Self::ExponentialCapped { exclude_kinds, .. }
            | Self::ExponentialJitter { exclude_kinds, .. } => exclude_kinds.extend(kinds),
            Self::Conditional { .. } => {}
        }
        self
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            Self::Linear { max_retries, .. }
            | Self::ExponentialCapped { max_retries, .. }
            | Self::ExponentialJitter { max_retries, .. }
            | Self::Conditional { max_retries, .. } => *max_retries,
        }
    }

    pub fn base_delay(&self) -> Duration {
        match self {
            Self::Linear { base_delay, .. }
            | Self::ExponentialCapped { base_delay, .. }
            | Self::ExponentialJitter { base_delay, .. }
            | Self::Conditional { base_delay, .. } => *base_delay,
        }
    }

    /// Delay to wait before `attempt` (1-based: `attempt` is the attempt
    /// about to be made, so `delay_for_attempt(1)` is the delay awaited
    /// before the first retry, not the initial attempt).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::Linear { base_delay, .. } => base_delay.mul_f64(attempt as f64),
            Self::ExponentialCapped {
                base_delay,
                max_delay,
                ..
            } => {
                let delay = base_delay.mul_f64(2f64.powi(attempt as i32 - 1));
                delay.min(*max_delay)
            }
            Self::ExponentialJitter {
                base_delay,
                max_delay,
                ..
            } => {
                let base = base_delay
                    .mul_f64(2f64.powi(attempt as i32 - 1))
                    .min(*max_delay)
                    .as_secs_f64();
                let jitter = base * 0.25 * (2.0 * rand::thread_rng().gen::<f64>() - 1.0);
                Duration::from_secs_f64((base + jitter).max(0.1))
            }
            Self::Conditional { base_delay, .. } => *base_delay,
        }
    }

    /// Whether `attempt` should be retried given the kind of error that
    /// just occurred. `attempt` is the attempt number that just failed.
    pub fn should_retry(&self, attempt: u32, kind: &ErrorKind) -> bool {
        match self {
            Self::Linear {
                max_retries,
                exclude_kinds,
                ..
            }
            | Self::ExponentialCapped {
                max_retries,
                exclude_kinds,
                ..
            }
            | Self::ExponentialJitter {
                max_retries,
                exclude_kinds,
                ..
            } => {
                if exclude_kinds.contains(kind) {
                    return false;
                }
                attempt <= *max_retries
            }
            Self::Conditional {
                max_retries,
                retryable_kinds,
                ..
            } => {
                if attempt > *max_retries {
                    return false;
                }
                retryable_kinds.contains(kind)
            }
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_delay_scales_with_attempt() {
        let policy = RetryPolicy::linear(5, Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(3));
    }

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let policy =
            RetryPolicy::exponential(10, Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_quarter_of_base() {
        let policy = RetryPolicy::exponential_jitter(
            10,
            Duration::from_secs(4),
            Duration::from_secs(60),
        );
        for attempt in 1..5 {
            let delay = policy.delay_for_attempt(attempt).as_secs_f64();
            let base = (4.0 * 2f64.powi(attempt as i32 - 1)).min(60.0);
            assert!(delay >= (base * 0.75).max(0.1) - 1e-9);
            assert!(delay <= base * 1.25 + 1e-9);
        }
    }

    #[test]
    fn default_excludes_invalid_input() {
        let policy = RetryPolicy::linear(3, Duration::from_millis(10));
        assert!(!policy.should_retry(1, &ErrorKind::InvalidInput));
        assert!(policy.should_retry(1, &ErrorKind::Transient));
    }

    #[test]
    fn linear_exhausts_after_max_retries() {
        let policy = RetryPolicy::linear(2, Duration::from_millis(10));
        assert!(policy.should_retry(1, &ErrorKind::Transient));
        assert!(policy.should_retry(2, &ErrorKind::Transient));
        assert!(!policy.should_retry(3, &ErrorKind::Transient));
    }

    #[test]
    fn conditional_only_retries_allow_listed_kinds() {
        let policy = RetryPolicy::conditional(
            3,
            Duration::from_millis(10),
            vec![ErrorKind::Transient],
        );
        assert!(policy.should_retry(1, &ErrorKind::Transient));
        assert!(!policy.should_retry(1, &ErrorKind::Permanent));
        assert!(!policy.should_retry(4, &ErrorKind::Transient));
    }

    #[test]
    fn serialization_round_trips() {
        let policy = RetryPolicy::exponential(4, Duration::from_secs(2), Duration::from_secs(30));
        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }
}
