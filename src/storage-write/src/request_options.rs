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

use crate::backoff_policy::{BackoffPolicy, ExponentialBackoff};
use crate::retry_policy::RetryPolicy;
use crate::retry_throttler::{AdaptiveThrottler, SharedRetryThrottler};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// All non-final messages must be a multiple of this size.
pub const WRITE_ALIGNMENT: usize = 256 * 1024;

const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;
const DEFAULT_FLUSH_INTERVAL: usize = 16 * 1024 * 1024;
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Selects the streaming RPC used to upload data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum WriteProtocol {
    /// Uses `WriteObject`, a client-streaming RPC.
    ///
    /// The service reports the persisted size when the client closes the
    /// stream. The client library opens a new stream after each flush
    /// interval.
    #[default]
    ClientStreaming,
    /// Uses `BidiWriteObject`, a bidirectional streaming RPC.
    ///
    /// The client library requests a flush and a state lookup after each
    /// flush interval, and keeps the stream open until the upload finalizes.
    Bidi,
}

#[derive(Clone, Debug)]
pub(crate) struct RequestOptions {
    pub retry_policy: Arc<dyn RetryPolicy>,
    pub backoff_policy: Arc<dyn BackoffPolicy>,
    pub throttled_backoff_policy: Arc<dyn BackoffPolicy>,
    pub retry_throttler: SharedRetryThrottler,
    pub attempt_timeout: Duration,
    pub protocol: WriteProtocol,
    pub crc32c_per_message: bool,
    pub compute_md5: bool,
    chunk_size: usize,
    flush_interval: usize,
}

impl RequestOptions {
    pub(crate) fn new() -> Self {
        Self {
            retry_policy: Arc::new(crate::retry_policy::default()),
            backoff_policy: Arc::new(ExponentialBackoff::transient()),
            throttled_backoff_policy: Arc::new(ExponentialBackoff::throttled()),
            retry_throttler: Arc::new(Mutex::new(AdaptiveThrottler::default())),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            protocol: WriteProtocol::default(),
            crc32c_per_message: true,
            compute_md5: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    /// The payload size for each message, a multiple of [WRITE_ALIGNMENT].
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Changes the chunk size, rounding up to a multiple of [WRITE_ALIGNMENT].
    pub fn set_chunk_size(&mut self, v: usize) {
        self.chunk_size = round_up(v, WRITE_ALIGNMENT);
        self.flush_interval = round_up(self.flush_interval, self.chunk_size);
    }

    /// The number of bytes between flush points, a multiple of the chunk size.
    pub fn flush_interval(&self) -> usize {
        self.flush_interval
    }

    /// Changes the flush interval, rounding up to a multiple of the chunk size.
    pub fn set_flush_interval(&mut self, v: usize) {
        self.flush_interval = round_up(v, self.chunk_size);
    }
}

/// Rounds `v` up to a non-zero multiple of `quantum`.
pub(crate) fn round_up(v: usize, quantum: usize) -> usize {
    let v = v.max(1);
    v.div_ceil(quantum) * quantum
}

/// Halves `v`, keeping the result a non-zero multiple of `quantum`.
pub(crate) fn halve(v: usize, quantum: usize) -> usize {
    let half = (v / 2) / quantum * quantum;
    half.max(quantum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn defaults() {
        let options = RequestOptions::new();
        assert_eq!(options.chunk_size(), 2 * 1024 * 1024);
        assert_eq!(options.flush_interval(), 16 * 1024 * 1024);
        assert_eq!(options.attempt_timeout, Duration::from_secs(60));
        assert_eq!(options.protocol, WriteProtocol::ClientStreaming);
        assert!(options.crc32c_per_message);
        assert!(!options.compute_md5);
    }

    #[test_case(0, WRITE_ALIGNMENT)]
    #[test_case(1, WRITE_ALIGNMENT)]
    #[test_case(WRITE_ALIGNMENT, WRITE_ALIGNMENT)]
    #[test_case(WRITE_ALIGNMENT + 1, 2 * WRITE_ALIGNMENT)]
    #[test_case(3 * WRITE_ALIGNMENT - 7, 3 * WRITE_ALIGNMENT)]
    fn chunk_size(input: usize, want: usize) {
        let mut options = RequestOptions::new();
        options.set_chunk_size(input);
        assert_eq!(options.chunk_size(), want);
        assert_eq!(options.flush_interval() % want, 0);
        assert!(options.flush_interval() >= 16 * 1024 * 1024);
    }

    #[test]
    fn flush_interval() {
        let mut options = RequestOptions::new();
        options.set_chunk_size(3 * WRITE_ALIGNMENT);
        options.set_flush_interval(4 * WRITE_ALIGNMENT);
        assert_eq!(options.flush_interval(), 6 * WRITE_ALIGNMENT);
        options.set_flush_interval(0);
        assert_eq!(options.flush_interval(), 3 * WRITE_ALIGNMENT);
    }

    #[test_case(8 * WRITE_ALIGNMENT, 4 * WRITE_ALIGNMENT)]
    #[test_case(3 * WRITE_ALIGNMENT, WRITE_ALIGNMENT)]
    #[test_case(WRITE_ALIGNMENT, WRITE_ALIGNMENT)]
    fn halve_interval(input: usize, want: usize) {
        assert_eq!(halve(input, WRITE_ALIGNMENT), want);
    }
}
