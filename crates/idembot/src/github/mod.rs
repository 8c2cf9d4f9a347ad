//! GitHub REST access.
//!
//! - [`error`] - error type and helpers
//! - [`types`] - payloads and request parameters
//! - [`client`] - the typed client over [`crate::http::HttpTransport`]

mod client;
mod error;
pub mod types;

pub use client::{GITHUB_API_URL, GitHubClient, PAGE_SIZE};
pub use error::{GitHubError, short_error_message};
pub use types::{IssueState, MergeMethod, MergeOptions, RateLimitInfo};
