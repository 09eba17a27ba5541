//! Download task execution -- fetching one asset of one episode into the archive.
//!
//! Split into focused submodules:
//! - [`context`] - Task description and shared handles
//! - [`transfer`] - Candidate ordering, streaming into staging, per-request retry
//! - [`quality`] - Audio bitrate estimation and the bitrate floor
//! - [`finalization`] - Recording the result on the episode row
//! - [`orchestration`] - Top-level task lifecycle

mod context;
mod finalization;
mod orchestration;
mod quality;
mod transfer;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use context::DownloadTask;
pub(crate) use context::DownloadTaskContext;
pub(crate) use orchestration::run_download_task;
