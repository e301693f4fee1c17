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

//! Limits how often uploads resume while the service is failing.
//!
//! A client typically runs many uploads at once. If the service fails all of
//! them, resuming every upload at full rate slows down the recovery. A
//! throttler is shared by all the uploads in a client. It observes the
//! outcome of each write attempt and may hold back resume attempts while the
//! failure rate is high. A held back attempt is not sent to the service: it
//! consumes time from the retry policy, but is not counted as an attempt.
//!
//! Configure the throttler with [ClientBuilder::with_retry_throttler], or
//! per upload with [StartUpload::with_retry_throttler].
//!
//! [ClientBuilder::with_retry_throttler]: crate::client::ClientBuilder::with_retry_throttler
//! [StartUpload::with_retry_throttler]: crate::client::StartUpload::with_retry_throttler
//!
//! # Example
//! ```
//! # use google_cloud_storage_write::retry_throttler::*;
//! // Hold back resumes once more than half of the recent attempts fail.
//! let adaptive = AdaptiveThrottler::new(2.0)?;
//! // Stop resuming after 25 failures, until 250 attempts succeed.
//! let breaker = CircuitBreaker::new(1000, 750, 10)?;
//! # Ok::<(), Error>(())
//! ```

use crate::retry_policy::RetryResult;
use std::sync::{Arc, Mutex};

/// The error type for throttler creation.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("the throttling factor ({0}) cannot be negative")]
    NegativeFactor(f64),
    #[error("the token floor ({floor}) cannot exceed the token capacity ({capacity})")]
    FloorAboveCapacity { floor: u64, capacity: u64 },
}

/// Decides if an upload may resume after a failure.
///
/// The client library calls these functions with the throttler lock held,
/// implementations should not block.
pub trait RetryThrottler: Send + Sync + std::fmt::Debug {
    /// Returns `true` if the next resume attempt should be held back.
    fn throttle_retry_attempt(&self) -> bool;

    /// A write attempt failed, `flow` is the retry policy decision.
    fn on_retry_failure(&mut self, flow: &RetryResult);

    /// A write attempt made progress, or finalized the object.
    fn on_success(&mut self);
}

/// A throttler shared by several uploads.
pub type SharedRetryThrottler = Arc<Mutex<dyn RetryThrottler>>;

/// Accepts any [RetryThrottler] in builders.
///
/// Pass a [SharedRetryThrottler] to share the throttler across clients.
#[derive(Clone)]
pub struct RetryThrottlerArg(pub(crate) SharedRetryThrottler);

impl<T: RetryThrottler + 'static> From<T> for RetryThrottlerArg {
    fn from(value: T) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }
}

impl From<SharedRetryThrottler> for RetryThrottlerArg {
    fn from(value: SharedRetryThrottler) -> Self {
        Self(value)
    }
}

/// Holds back resume attempts at random, based on the failure rate.
///
/// Each attempt is accepted (it succeeded, or failed with an error that
/// does not resume) or rejected (it failed with a resumable error). A resume
/// attempt is held back with probability:
///
/// ```norust
/// max(0, (attempts - factor * accepted) / (attempts + 1))
/// ```
///
/// With the default `factor` of 2.0 the throttler starts holding back
/// resumes once more than half of the attempts are rejected.
#[derive(Clone, Debug)]
pub struct AdaptiveThrottler {
    attempts: u64,
    accepted: u64,
    factor: f64,
}

impl AdaptiveThrottler {
    pub fn new(factor: f64) -> Result<Self, Error> {
        if factor < 0.0 {
            return Err(Error::NegativeFactor(factor));
        }
        Ok(Self::clamp(factor))
    }

    /// Like [new()][Self::new], treating negative factors as zero.
    pub fn clamp(factor: f64) -> Self {
        Self {
            attempts: 0,
            accepted: 0,
            factor: factor.max(0.0),
        }
    }

    fn hold_back_probability(&self) -> f64 {
        let attempts = self.attempts as f64;
        let p = (attempts - self.factor * self.accepted as f64) / (attempts + 1.0);
        p.clamp(0.0, 1.0)
    }

    fn hold_back<R: rand::Rng>(&self, rng: &mut R) -> bool {
        rng.random_bool(self.hold_back_probability())
    }
}

impl Default for AdaptiveThrottler {
    fn default() -> Self {
        Self::clamp(2.0)
    }
}

impl RetryThrottler for AdaptiveThrottler {
    fn throttle_retry_attempt(&self) -> bool {
        self.hold_back(&mut rand::rng())
    }

    fn on_retry_failure(&mut self, flow: &RetryResult) {
        self.attempts += 1;
        // Errors that do not resume say nothing about the service health.
        if flow.is_permanent() {
            self.accepted += 1;
        }
    }

    fn on_success(&mut self) {
        self.attempts += 1;
        self.accepted += 1;
    }
}

/// Stops all resume attempts after too many failures.
///
/// The breaker starts with `capacity` tokens. Each resumable failure takes
/// `failure_cost` tokens, each successful attempt returns one. While the
/// tokens are at or below `floor` the breaker is open and no upload resumes.
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    tokens: u64,
    capacity: u64,
    floor: u64,
    failure_cost: u64,
}

impl CircuitBreaker {
    pub fn new(capacity: u64, floor: u64, failure_cost: u64) -> Result<Self, Error> {
        if floor > capacity {
            return Err(Error::FloorAboveCapacity { floor, capacity });
        }
        Ok(Self::clamp(capacity, floor, failure_cost))
    }

    /// Like [new()][Self::new], lowering `floor` to `capacity` if needed.
    pub fn clamp(capacity: u64, floor: u64, failure_cost: u64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            floor: floor.min(capacity),
            failure_cost,
        }
    }

    fn is_open(&self) -> bool {
        self.tokens <= self.floor
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::clamp(100, 50, 10)
    }
}

impl RetryThrottler for CircuitBreaker {
    fn throttle_retry_attempt(&self) -> bool {
        self.is_open()
    }

    fn on_retry_failure(&mut self, flow: &RetryResult) {
        match flow {
            RetryResult::Permanent(_) => self.on_success(),
            _ => self.tokens = self.tokens.saturating_sub(self.failure_cost),
        }
    }

    fn on_success(&mut self) {
        self.tokens = (self.tokens + 1).min(self.capacity);
    }
}
