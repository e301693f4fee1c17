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

use crate::Result;
use crate::backoff_policy::BackoffPolicy;
use crate::error::{Error, ErrorCategory};
use crate::request_options::RequestOptions;
use crate::retry_policy::{RetryResult, RetryState, ThrottleResult};
use crate::retry_throttler::SharedRetryThrottler;
use std::sync::Arc;
use std::time::Duration;

/// Runs the retry loop for a unary RPC.
///
/// Calls `inner` until it succeeds, the retry policy stops the loop, or the
/// throttler rejects too many attempts. `inner` receives the deadline for
/// the attempt.
pub(crate) async fn retry_loop<F, Fut, Response>(
    mut inner: F,
    options: &RequestOptions,
) -> Result<Response>
where
    F: FnMut(Duration) -> Fut + Send,
    Fut: Future<Output = Result<Response>> + Send,
{
    let throttler = &options.retry_throttler;
    let retry_policy = &options.retry_policy;
    let mut state = RetryState::new();
    loop {
        let timeout = effective_timeout(options, retry_policy.remaining_time(&state));
        let error = match inner(timeout).await {
            Ok(r) => {
                on_success(throttler);
                return Ok(r);
            }
            Err(e) => e,
        };
        state.attempt_count += 1;
        let backoff = backoff_for(options, &error).clone();
        let flow = retry_policy.on_error(&state, error);
        on_retry_failure(throttler, &flow);
        let mut error = match flow {
            RetryResult::Permanent(e) => return Err(e),
            RetryResult::Exhausted(e) => return Err(Error::exhausted(e)),
            RetryResult::Continue(e) => e,
        };
        loop {
            let delay = backoff.on_failure(&state);
            if retry_policy
                .remaining_time(&state)
                .is_some_and(|remaining| remaining < delay)
            {
                return Err(Error::exhausted(error));
            }
            tokio::time::sleep(delay).await;
            if !throttled(throttler) {
                break;
            }
            error = match retry_policy.on_throttle(&state, error) {
                ThrottleResult::Exhausted(e) => return Err(Error::exhausted(e)),
                ThrottleResult::Continue(e) => e,
            };
        }
    }
}

/// Returns the backoff policy for the error category.
pub(crate) fn backoff_for<'a>(
    options: &'a RequestOptions,
    error: &Error,
) -> &'a Arc<dyn BackoffPolicy> {
    if error.category() == ErrorCategory::ResumableThrottled {
        &options.throttled_backoff_policy
    } else {
        &options.backoff_policy
    }
}

/// The deadline for a single attempt, capped by the remaining retry time.
pub(crate) fn effective_timeout(options: &RequestOptions, remaining: Option<Duration>) -> Duration {
    match remaining {
        None => options.attempt_timeout,
        Some(r) => std::cmp::min(options.attempt_timeout, r),
    }
}

pub(crate) fn throttled(throttler: &SharedRetryThrottler) -> bool {
    throttler
        .lock()
        .expect("retry throttler lock is never poisoned")
        .throttle_retry_attempt()
}

pub(crate) fn on_success(throttler: &SharedRetryThrottler) {
    throttler
        .lock()
        .expect("retry throttler lock is never poisoned")
        .on_success();
}

pub(crate) fn on_retry_failure(throttler: &SharedRetryThrottler, flow: &RetryResult) {
    throttler
        .lock()
        .expect("retry throttler lock is never poisoned")
        .on_retry_failure(flow);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff_policy::tests::MockBackoffPolicy;
    use crate::error::rpc::Code;
    use crate::retry_policy::tests::{MockRetryPolicy, grpc_error};
    use crate::retry_policy::{RetryPolicyExt, RetryableErrors};
    use crate::retry_throttler::tests::MockRetryThrottler;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use test_case::test_case;

    fn test_options() -> RequestOptions {
        let mut options = RequestOptions::new();
        options.retry_policy = Arc::new(RetryableErrors.with_attempt_limit(5));
        options.backoff_policy = Arc::new(fixed_backoff(Duration::from_millis(10)));
        options.throttled_backoff_policy = Arc::new(fixed_backoff(Duration::from_secs(10)));
        options.retry_throttler = Arc::new(Mutex::new(crate::retry_throttler::CircuitBreaker::clamp(
            1000, 0, 1,
        )));
        options
    }

    fn fixed_backoff(delay: Duration) -> MockBackoffPolicy {
        let mut backoff = MockBackoffPolicy::new();
        backoff.expect_on_failure().return_const(delay);
        backoff
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_success() -> anyhow::Result<()> {
        let options = test_options();
        let got = retry_loop(|_| async { Ok(42) }, &options).await?;
        assert_eq!(got, 42);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success() -> anyhow::Result<()> {
        let options = test_options();
        let count = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let got = retry_loop(
            |_| {
                let n = count.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(grpc_error(Code::Unavailable))
                    } else {
                        Ok(n)
                    }
                }
            },
            &options,
        )
        .await?;
        assert_eq!(got, 2);
        assert_eq!(start.elapsed(), Duration::from_millis(20));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_uses_throttled_backoff() -> anyhow::Result<()> {
        let options = test_options();
        let count = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let got = retry_loop(
            |_| {
                let n = count.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(grpc_error(Code::ResourceExhausted))
                    } else {
                        Ok(n)
                    }
                }
            },
            &options,
        )
        .await?;
        assert_eq!(got, 1);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        Ok(())
    }

    #[test_case(Code::NotFound)]
    #[test_case(Code::PermissionDenied)]
    #[tokio::test(start_paused = true)]
    async fn permanent(code: Code) {
        let options = test_options();
        let count = AtomicU32::new(0);
        let got = retry_loop(
            |_| {
                count.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(grpc_error(code)) }
            },
            &options,
        )
        .await;
        let err = got.expect_err("permanent errors stop the loop");
        assert_eq!(err.status().map(|s| s.code), Some(code), "{err:?}");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted() {
        let options = test_options();
        let count = AtomicU32::new(0);
        let got = retry_loop(
            |_| {
                count.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(grpc_error(Code::Internal)) }
            },
            &options,
        )
        .await;
        let err = got.expect_err("the retry policy is limited");
        assert!(err.is_exhausted(), "{err:?}");
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_attempts_are_skipped() {
        let mut options = test_options();
        let mut throttler = MockRetryThrottler::new();
        throttler.expect_on_retry_failure().return_const(());
        throttler.expect_on_success().never();
        throttler.expect_throttle_retry_attempt().return_const(true);
        options.retry_throttler = Arc::new(Mutex::new(throttler));
        let mut policy = MockRetryPolicy::new();
        policy.expect_remaining_time().return_const(None);
        policy
            .expect_on_error()
            .times(1)
            .returning(|_, e| RetryResult::Continue(e));
        policy
            .expect_on_throttle()
            .times(1)
            .returning(|_, e| ThrottleResult::Continue(e));
        policy
            .expect_on_throttle()
            .times(1)
            .returning(|_, e| ThrottleResult::Exhausted(e));
        options.retry_policy = Arc::new(policy);

        let count = AtomicU32::new(0);
        let got = retry_loop(
            |_| {
                count.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(grpc_error(Code::Unavailable)) }
            },
            &options,
        )
        .await;
        let err = got.expect_err("throttled loop is exhausted");
        assert!(err.is_exhausted(), "{err:?}");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timeouts() {
        let options = test_options();
        assert_eq!(effective_timeout(&options, None), options.attempt_timeout);
        assert_eq!(
            effective_timeout(&options, Some(Duration::from_secs(1))),
            Duration::from_secs(1)
        );
        assert_eq!(
            effective_timeout(&options, Some(Duration::from_secs(3600))),
            options.attempt_timeout
        );
    }
}
