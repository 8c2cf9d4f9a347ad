//! Crate-level error type.

use thiserror::Error;

use crate::entity::RepoRef;
use crate::github::GitHubError;
use crate::query::QueryError;
use crate::snapshot::SnapshotError;

/// A write was requested whose preconditions do not hold.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("{item}: mergeability is still unknown after polling")]
    MergeabilityUnknown { item: String },

    #[error("{item} is not mergeable (state: {})", .state.as_deref().unwrap_or("unknown"))]
    NotMergeable { item: String, state: Option<String> },

    #[error("{item} is not a pull request")]
    NotAPullRequest { item: String },

    #[error("project {project_id} has no column named {column:?}")]
    UnknownColumn { project_id: u64, column: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Query(#[from] QueryError),

    /// Syncing a repository failed part-way; its rules were not run.
    #[error("sync of {repo} failed: {source}")]
    Sync {
        repo: RepoRef,
        #[source]
        source: Box<Error>,
    },

    /// An action's write (or the reads that decide it) failed.
    #[error("action \"{summary}\" failed: {source}")]
    Action {
        summary: String,
        #[source]
        source: Box<Error>,
    },

    #[error("unknown rule: {0}")]
    UnknownRule(String),
}

impl Error {
    /// The innermost non-wrapper error.
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Error::Sync { source, .. } | Error::Action { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
