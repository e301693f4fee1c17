// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Controls how long an upload waits before resuming.
//!
//! Resumable writes use two backoff policies. The regular policy applies
//! after transient failures and conflicts. A second, slower policy applies
//! when the service throttles the upload
//! ([ResourceExhausted][crate::error::rpc::Code::ResourceExhausted]).
//!
//! # Example
//! ```
//! # use google_cloud_storage_write::backoff_policy::*;
//! use std::time::Duration;
//! let policy = ExponentialBackoffBuilder::new()
//!     .with_initial_delay(Duration::from_millis(100))
//!     .with_maximum_delay(Duration::from_secs(5))
//!     .with_scaling(4.0)
//!     .build()?;
//! # Ok::<(), Error>(())
//! ```

use crate::retry_policy::RetryState;
use std::sync::Arc;
use std::time::Duration;

/// Computes the delay before the next resume attempt.
pub trait BackoffPolicy: Send + Sync + std::fmt::Debug {
    /// The delay after a failed attempt.
    ///
    /// `state.attempt_count` includes the attempt that just failed.
    fn on_failure(&self, state: &RetryState) -> Duration;
}

/// Accepts any [BackoffPolicy] in builders.
#[derive(Clone, Debug)]
pub struct BackoffPolicyArg(pub(crate) Arc<dyn BackoffPolicy>);

impl<T: BackoffPolicy + 'static> From<T> for BackoffPolicyArg {
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl From<Arc<dyn BackoffPolicy>> for BackoffPolicyArg {
    fn from(value: Arc<dyn BackoffPolicy>) -> Self {
        Self(value)
    }
}

/// The error type for backoff policy creation.
#[derive(thiserror::Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("the scaling factor ({0}) must be at least 1.0")]
    ScalingTooSmall(f64),
    #[error("the initial delay must be greater than zero")]
    ZeroInitialDelay,
    #[error("the maximum delay ({maximum:?}) is shorter than the initial delay ({initial:?})")]
    MaximumBelowInitial {
        initial: Duration,
        maximum: Duration,
    },
}

// Bounds used by `ExponentialBackoffBuilder::clamp()`.
const MIN_DELAY: Duration = Duration::from_millis(1);
const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_SCALING: f64 = 32.0;

/// Configures an [ExponentialBackoff].
///
/// The defaults match the policy used for transient errors.
#[derive(Clone, Debug)]
pub struct ExponentialBackoffBuilder {
    policy: ExponentialBackoff,
}

impl ExponentialBackoffBuilder {
    pub fn new() -> Self {
        Self {
            policy: ExponentialBackoff::transient(),
        }
    }

    /// The nominal delay after the first failure.
    pub fn with_initial_delay<V: Into<Duration>>(mut self, v: V) -> Self {
        self.policy.initial_delay = v.into();
        self
    }

    /// The upper bound for the nominal delay.
    pub fn with_maximum_delay<V: Into<Duration>>(mut self, v: V) -> Self {
        self.policy.maximum_delay = v.into();
        self
    }

    /// The nominal delay grows by this factor after each failure.
    pub fn with_scaling<V: Into<f64>>(mut self, v: V) -> Self {
        self.policy.scaling = v.into();
        self
    }

    /// Creates the policy, rejecting invalid parameters.
    pub fn build(self) -> Result<ExponentialBackoff, Error> {
        let p = self.policy;
        if p.scaling < 1.0 {
            return Err(Error::ScalingTooSmall(p.scaling));
        }
        if p.initial_delay.is_zero() {
            return Err(Error::ZeroInitialDelay);
        }
        if p.maximum_delay < p.initial_delay {
            return Err(Error::MaximumBelowInitial {
                initial: p.initial_delay,
                maximum: p.maximum_delay,
            });
        }
        Ok(p)
    }

    /// Creates the policy, moving invalid parameters into range.
    pub fn clamp(self) -> ExponentialBackoff {
        let p = self.policy;
        let maximum_delay = p.maximum_delay.clamp(MIN_DELAY, MAX_DELAY);
        ExponentialBackoff {
            initial_delay: p.initial_delay.clamp(MIN_DELAY, maximum_delay),
            maximum_delay,
            scaling: p.scaling.clamp(1.0, MAX_SCALING),
        }
    }
}

impl Default for ExponentialBackoffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncated exponential backoff with full jitter.
///
/// After the n-th consecutive failure the nominal delay is
/// `initial_delay * scaling^(n-1)`, capped at `maximum_delay`. The upload
/// waits a random duration between zero and the nominal delay, so uploads
/// that failed at the same time do not resume at the same time.
#[derive(Clone, Debug, PartialEq)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    maximum_delay: Duration,
    scaling: f64,
}

impl ExponentialBackoff {
    /// The default policy after transient errors and conflicts.
    ///
    /// Starts at 1 second, doubling up to 60 seconds.
    pub fn transient() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            maximum_delay: Duration::from_secs(60),
            scaling: 2.0,
        }
    }

    /// The default policy when the service throttles the upload.
    ///
    /// Starts at 5 seconds, growing 4x per failure up to 120 seconds.
    pub fn throttled() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            maximum_delay: Duration::from_secs(120),
            scaling: 4.0,
        }
    }

    fn nominal(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.scaling.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .map_or(self.maximum_delay, |d| d.min(self.maximum_delay))
    }

    fn jittered<R: rand::Rng>(&self, failures: u32, rng: &mut R) -> Duration {
        self.nominal(failures).mul_f64(rng.random::<f64>())
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::transient()
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn on_failure(&self, state: &RetryState) -> Duration {
        self.jittered(state.attempt_count, &mut rand::rng())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::SeedableRng;
    use test_case::test_case;

    mockall::mock! {
        #[derive(Debug)]
        pub BackoffPolicy {}
        impl BackoffPolicy for BackoffPolicy {
            fn on_failure(&self, state: &RetryState) -> Duration;
        }
    }

    #[test]
    fn build_validates() {
        let b = ExponentialBackoffBuilder::new().with_scaling(0.5).build();
        assert_eq!(b.err(), Some(Error::ScalingTooSmall(0.5)));

        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::ZERO)
            .build();
        assert_eq!(b.err(), Some(Error::ZeroInitialDelay));

        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(10))
            .with_maximum_delay(Duration::from_secs(5))
            .build();
        assert_eq!(
            b.err(),
            Some(Error::MaximumBelowInitial {
                initial: Duration::from_secs(10),
                maximum: Duration::from_secs(5)
            })
        );
    }

    #[test]
    fn builder_defaults() -> anyhow::Result<()> {
        let b = ExponentialBackoffBuilder::default().build()?;
        assert_eq!(b, ExponentialBackoff::default());
        assert_eq!(b, ExponentialBackoff::transient());
        Ok(())
    }

    #[test_case(0, 1)]
    #[test_case(1, 1)]
    #[test_case(2, 2)]
    #[test_case(3, 4)]
    #[test_case(5, 16)]
    #[test_case(6, 20)]
    #[test_case(1000, 20)]
    #[test_case(u32::MAX, 20)]
    fn nominal(failures: u32, want_secs: u64) -> anyhow::Result<()> {
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_maximum_delay(Duration::from_secs(20))
            .with_scaling(2.0)
            .build()?;
        assert_eq!(b.nominal(failures), Duration::from_secs(want_secs));
        Ok(())
    }

    #[test]
    fn jitter_is_bounded() {
        let b = ExponentialBackoff::transient();
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for failures in 1..20 {
            let got = b.jittered(failures, &mut rng);
            assert!(got <= b.nominal(failures), "failures={failures}, got={got:?}");
        }
    }

    #[test]
    fn clamp() {
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::ZERO)
            .with_maximum_delay(Duration::from_secs(7 * 24 * 60 * 60))
            .with_scaling(64.0)
            .clamp();
        assert_eq!(b.initial_delay, MIN_DELAY);
        assert_eq!(b.maximum_delay, MAX_DELAY);
        assert_eq!(b.scaling, MAX_SCALING);

        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(10))
            .with_maximum_delay(Duration::from_secs(5))
            .with_scaling(0.5)
            .clamp();
        assert_eq!(b.initial_delay, Duration::from_secs(5));
        assert_eq!(b.scaling, 1.0);
    }

    #[test]
    fn arg_conversions() {
        let _ = BackoffPolicyArg::from(ExponentialBackoff::default());
        let policy: Arc<dyn BackoffPolicy> = Arc::new(ExponentialBackoff::throttled());
        let _ = BackoffPolicyArg::from(policy);
    }

    #[test]
    fn throttled_is_slower() {
        let transient = ExponentialBackoff::transient();
        let throttled = ExponentialBackoff::throttled();
        for failures in 1..8 {
            assert!(
                throttled.nominal(failures) >= transient.nominal(failures),
                "failures={failures}"
            );
        }
    }
}
