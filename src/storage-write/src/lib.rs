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

//! Google Cloud Client Libraries for Rust - Storage resumable writes
//!
//! This crate uploads objects to [Google Cloud Storage] using resumable
//! writes. The uploads survive transient errors: the client queries the
//! persisted size from the service and resumes the upload at that offset.
//! Most applications will use [Storage][client::Storage] to start an upload,
//! and [UploadSession][session::UploadSession] to write the data.
//!
//! **WARNING:** this crate is under active development. We expect multiple
//! breaking changes in the upcoming releases. Testing is also incomplete, we do
//! **not** recommend that you use this crate in production. We welcome feedback
//! about the APIs, documentation, missing features, bugs, etc.
//!
//! [Google Cloud Storage]: https://cloud.google.com/storage

extern crate google_cloud_auth as auth;

pub use error::Error;
/// The result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

pub mod backoff_policy;
pub mod bidi;
pub mod client;
pub mod error;
pub mod model;
pub mod retry_policy;
pub mod retry_throttler;
pub mod session;
pub mod stub;
pub mod upload_source;

pub use request_options::{WRITE_ALIGNMENT, WriteProtocol};

mod checksum;
mod chunk_writer;
mod persisted_size;
mod replay;
mod request_options;
mod resume;
mod retry_loop;
mod transport;

#[allow(dead_code)]
#[allow(clippy::large_enum_variant)]
pub(crate) mod google {
    pub mod storage {
        pub mod v2 {
            include!("generated/protos/google.storage.v2.rs");
        }
    }
}
