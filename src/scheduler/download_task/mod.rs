//! One book, end to end: fan-out chapter fetch, ordered merge, atomic write.
//!
//! Split into focused submodules:
//! - [`context`] - The [`DownloadTask`] handle and its pre-flight checks
//! - [`fetch`] - Bounded concurrent chapter fetches with first-failure cancellation
//! - [`merge`] - Index ordering, rendering and the atomic output write
//! - [`orchestration`] - Top-level task lifecycle

mod context;
mod fetch;
mod merge;
mod orchestration;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use context::DownloadTask;
