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

//! Defines the retry policies for resumable writes.
//!
//! A resumable write may fail many times before it completes. The client
//! library classifies each failure (see [ErrorCategory]) and consults the
//! retry policy to decide if the upload should resume. The policy bounds the
//! total number of attempts, or the total elapsed time, or both.
//!
//! # Example
//! ```
//! # use google_cloud_storage_write::retry_policy::*;
//! use std::time::Duration;
//! let policy = RetryableErrors
//!     .with_attempt_limit(5)
//!     .with_time_limit(Duration::from_secs(60));
//! ```
//!
//! [ErrorCategory]: crate::error::ErrorCategory

use crate::Error;
use std::sync::Arc;
use std::time::Duration;

/// The default retry policy for resumable writes.
///
/// Retries all resumable errors, for at most 10 attempts or 5 minutes,
/// whichever comes first.
pub(crate) fn default() -> impl RetryPolicy {
    RetryableErrors
        .with_attempt_limit(10)
        .with_time_limit(Duration::from_secs(300))
}

/// The state of a retry loop.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct RetryState {
    /// When the retry loop started.
    pub start: tokio::time::Instant,
    /// The number of failed attempts so far.
    pub attempt_count: u32,
}

impl RetryState {
    /// Creates the state for a retry loop starting now.
    pub fn new() -> Self {
        Self {
            start: tokio::time::Instant::now(),
            attempt_count: 0,
        }
    }

    /// Changes the start time.
    pub fn set_start(mut self, v: tokio::time::Instant) -> Self {
        self.start = v;
        self
    }

    /// Changes the attempt count.
    pub fn set_attempt_count<T: Into<u32>>(mut self, v: T) -> Self {
        self.attempt_count = v.into();
        self
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

/// The result of a retry policy decision.
#[derive(Debug)]
pub enum RetryResult {
    /// The error is not retryable.
    Permanent(Error),
    /// The error is retryable, but the policy has no budget left.
    Exhausted(Error),
    /// The error is retryable, resume the upload.
    Continue(Error),
}

impl RetryResult {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue(_))
    }
}

/// The result of a retry policy decision for a throttled attempt.
#[derive(Debug)]
pub enum ThrottleResult {
    /// The policy has no budget left.
    Exhausted(Error),
    /// Wait and try again.
    Continue(Error),
}

/// Determines how errors are handled in the retry loop.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Query the retry policy after an error.
    ///
    /// # Parameters
    /// * `state` - the start time and the number of failed attempts,
    ///   including this one.
    /// * `error` - the last error in the loop.
    fn on_error(&self, state: &RetryState, error: Error) -> RetryResult;

    /// Query the retry policy after a retry attempt is throttled.
    ///
    /// Throttled attempts are not sent to the service. They do not increase
    /// the attempt count, but they do use time.
    fn on_throttle(&self, _state: &RetryState, error: Error) -> ThrottleResult {
        ThrottleResult::Continue(error)
    }

    /// The remaining time in the retry policy, if bounded.
    fn remaining_time(&self, _state: &RetryState) -> Option<Duration> {
        None
    }
}

/// Extension trait for [RetryPolicy].
pub trait RetryPolicyExt: RetryPolicy + Sized {
    /// Decorate a [RetryPolicy] to limit the total elapsed time.
    fn with_time_limit(self, maximum_duration: Duration) -> LimitedElapsedTime<Self> {
        LimitedElapsedTime::custom(self, maximum_duration)
    }

    /// Decorate a [RetryPolicy] to limit the number of attempts.
    ///
    /// The limit counts all attempts, including the first one. With a limit of
    /// 3 the upload fails after the third failed attempt.
    fn with_attempt_limit(self, maximum_attempts: u32) -> LimitedAttemptCount<Self> {
        LimitedAttemptCount::custom(self, maximum_attempts)
    }
}

impl<T: RetryPolicy> RetryPolicyExt for T {}

/// A helper type to accept any [RetryPolicy] in builders.
#[derive(Clone, Debug)]
pub struct RetryPolicyArg(pub(crate) Arc<dyn RetryPolicy>);

impl<T: RetryPolicy + 'static> From<T> for RetryPolicyArg {
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl From<Arc<dyn RetryPolicy>> for RetryPolicyArg {
    fn from(value: Arc<dyn RetryPolicy>) -> Self {
        Self(value)
    }
}

/// Continue on every resumable error.
///
/// This policy resumes the upload on transient errors, on throttling, and on
/// conflicts. It stops on any other error. Use it with
/// [with_attempt_limit][RetryPolicyExt::with_attempt_limit] or
/// [with_time_limit][RetryPolicyExt::with_time_limit], otherwise it retries
/// forever.
#[derive(Clone, Debug)]
pub struct RetryableErrors;

impl RetryPolicy for RetryableErrors {
    fn on_error(&self, _state: &RetryState, error: Error) -> RetryResult {
        if error.category().is_resumable() {
            return RetryResult::Continue(error);
        }
        RetryResult::Permanent(error)
    }
}

/// A retry policy that never resumes.
///
/// Useful in tests, and for applications that implement their own resume
/// logic using [query_upload_status][crate::client::Storage::query_upload_status].
#[derive(Clone, Debug)]
pub struct NeverRetry;

impl RetryPolicy for NeverRetry {
    fn on_error(&self, _state: &RetryState, error: Error) -> RetryResult {
        if error.category().is_resumable() {
            return RetryResult::Exhausted(error);
        }
        RetryResult::Permanent(error)
    }
}

/// A retry policy decorator that limits the total time in the retry loop.
#[derive(Debug)]
pub struct LimitedElapsedTime<P> {
    inner: P,
    maximum_duration: Duration,
}

impl<P> LimitedElapsedTime<P>
where
    P: RetryPolicy,
{
    pub fn custom(inner: P, maximum_duration: Duration) -> Self {
        Self {
            inner,
            maximum_duration,
        }
    }

    fn error_if_exhausted(&self, state: &RetryState, error: Error) -> ThrottleResult {
        let deadline = state.start + self.maximum_duration;
        let now = tokio::time::Instant::now();
        if now < deadline {
            ThrottleResult::Continue(error)
        } else {
            ThrottleResult::Exhausted(error)
        }
    }
}

impl<P> RetryPolicy for LimitedElapsedTime<P>
where
    P: RetryPolicy + 'static,
{
    fn on_error(&self, state: &RetryState, error: Error) -> RetryResult {
        match self.inner.on_error(state, error) {
            RetryResult::Continue(e) => match self.error_if_exhausted(state, e) {
                ThrottleResult::Continue(e) => RetryResult::Continue(e),
                ThrottleResult::Exhausted(e) => RetryResult::Exhausted(e),
            },
            r => r,
        }
    }

    fn on_throttle(&self, state: &RetryState, error: Error) -> ThrottleResult {
        match self.inner.on_throttle(state, error) {
            ThrottleResult::Continue(e) => self.error_if_exhausted(state, e),
            e @ ThrottleResult::Exhausted(_) => e,
        }
    }

    fn remaining_time(&self, state: &RetryState) -> Option<Duration> {
        let deadline = state.start + self.maximum_duration;
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match self.inner.remaining_time(state) {
            Some(inner) => Some(std::cmp::min(remaining, inner)),
            None => Some(remaining),
        }
    }
}

/// A retry policy decorator that limits the number of attempts.
#[derive(Debug)]
pub struct LimitedAttemptCount<P> {
    inner: P,
    maximum_attempts: u32,
}

impl<P> LimitedAttemptCount<P>
where
    P: RetryPolicy,
{
    pub fn custom(inner: P, maximum_attempts: u32) -> Self {
        Self {
            inner,
            maximum_attempts,
        }
    }
}

impl<P> RetryPolicy for LimitedAttemptCount<P>
where
    P: RetryPolicy + 'static,
{
    fn on_error(&self, state: &RetryState, error: Error) -> RetryResult {
        match self.inner.on_error(state, error) {
            RetryResult::Continue(e) if state.attempt_count >= self.maximum_attempts => {
                RetryResult::Exhausted(e)
            }
            r => r,
        }
    }

    fn on_throttle(&self, state: &RetryState, error: Error) -> ThrottleResult {
        self.inner.on_throttle(state, error)
    }

    fn remaining_time(&self, state: &RetryState) -> Option<Duration> {
        self.inner.remaining_time(state)
    }
}
