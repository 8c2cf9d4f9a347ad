//! Canonical entities handed to rules.
//!
//! Each type implements [`crate::pool::Canonical`], so at most one live
//! instance exists per identity key during a run.

mod comment;
mod issue;
mod refs;
mod user;

pub use comment::Comment;
pub use issue::{GitRef, Issue, IssueKind, IssuePayload, PullRequestDetails};
pub use refs::{IssueRef, RefParseError, RepoRef};
pub use user::{Label, Milestone, User};
