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

//! Tracks the persisted size of an upload.
//!
//! The service reports the persisted size in response to status queries, in
//! the response of each write stream, and (for bidi streams) after each flush
//! or state lookup. The reports for a given upload id never decrease, and
//! never exceed the number of bytes the client sent. Any report violating
//! these rules fails the upload.

use crate::error::WriteError;
use crate::model::{CommonObjectRequestParams, WriteStatus};
use crate::stub::dynamic::Storage;
use crate::{Error, Result};
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct PersistedSize {
    persisted: u64,
    // `None` until the client sends any data on a resumed upload.
    sent: Option<u64>,
}

impl PersistedSize {
    /// Tracks a new upload, nothing is persisted or sent.
    pub fn new() -> Self {
        Self {
            persisted: 0,
            sent: Some(0),
        }
    }

    /// Tracks an upload started elsewhere, the bytes sent are unknown.
    pub fn resumed() -> Self {
        Self {
            persisted: 0,
            sent: None,
        }
    }

    /// The last persisted size confirmed by the service.
    pub fn persisted(&self) -> u64 {
        self.persisted
    }

    /// Returns true if the client cannot tell the persisted size without
    /// asking the service.
    pub fn needs_query(&self) -> bool {
        self.sent.is_none_or(|s| s != self.persisted)
    }

    /// The client has sent all the bytes before `end`.
    pub fn record_sent(&mut self, end: u64) {
        self.sent = Some(self.sent.map_or(end, |s| s.max(end)));
    }

    /// Records a status reported by the service.
    ///
    /// Returns the new persisted size.
    pub fn observe(&mut self, status: &WriteStatus) -> Result<u64> {
        let reported = status.persisted_size();
        if reported < self.persisted {
            return Err(Error::deser(WriteError::UnexpectedRewind {
                offset: self.persisted,
                persisted: reported,
            }));
        }
        match (status, self.sent) {
            // The size of a finalized object is verified against the data
            // source by the caller.
            (WriteStatus::Finalized(_), _) => {}
            (WriteStatus::Persisted(_), Some(sent)) if reported > sent => {
                return Err(Error::deser(WriteError::TooMuchProgress {
                    sent,
                    persisted: reported,
                }));
            }
            (WriteStatus::Persisted(_), _) => {}
        }
        self.persisted = reported;
        Ok(reported)
    }
}

/// Queries the status of an upload, subject to a deadline.
///
/// Expired deadlines are reported as [Error::timeout], a resumable error.
pub(crate) async fn query(
    stub: &dyn Storage,
    upload_id: &str,
    params: Option<CommonObjectRequestParams>,
    deadline: Duration,
) -> Result<WriteStatus> {
    tracing::debug!(upload_id, "querying the persisted size");
    let status = tokio::time::timeout(
        deadline,
        stub.query_write_status(upload_id.to_string(), params),
    )
    .await
    .map_err(Error::timeout)??;
    tracing::debug!(upload_id, persisted_size = status.persisted_size(), "query completed");
    Ok(status)
}
