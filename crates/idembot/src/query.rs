//! Batch queries selecting which items a run visits.
//!
//! A query is a small JSON document:
//!
//! ```json
//! {"kind": "prs", "repo": "octo/bot", "state": "open", "count": 20, "sort": "updated"}
//! ```
//!
//! Every field except `kind` and `repo` has a default.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::entity::RepoRef;
use crate::github::types::{Direction, IssueSort, PullSort, StateFilter};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query must specify \"kind\"")]
    MissingKind,

    #[error("query kind {0:?} must be \"prs\" or \"issues\"")]
    UnknownKind(String),

    #[error("invalid {kind} query: {source}")]
    Invalid {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("query is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("failed to read query file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How many items a query visits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawCount")]
pub enum QueryCount {
    #[default]
    All,
    Limit(u32),
}

impl QueryCount {
    /// Whether `seen` items exhaust the count.
    #[must_use]
    pub fn reached(self, seen: usize) -> bool {
        match self {
            QueryCount::All => false,
            QueryCount::Limit(limit) => seen >= limit as usize,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCount {
    Word(String),
    Number(u64),
}

impl TryFrom<RawCount> for QueryCount {
    type Error = String;

    fn try_from(raw: RawCount) -> Result<Self, Self::Error> {
        match raw {
            RawCount::Word(word) if word == "all" => Ok(QueryCount::All),
            RawCount::Word(word) => Err(format!("count must be \"all\" or a number, got {word:?}")),
            RawCount::Number(0) => Err("count must be positive".to_string()),
            RawCount::Number(n) => u32::try_from(n)
                .map(QueryCount::Limit)
                .map_err(|_| format!("count {n} is too large")),
        }
    }
}

/// Pull requests listed from `/repos/{o}/{r}/pulls`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullQuery {
    pub repo: RepoRef,
    #[serde(default)]
    pub state: StateFilter,
    #[serde(default)]
    pub count: QueryCount,
    #[serde(default)]
    pub sort: PullSort,
    #[serde(default)]
    pub direction: Direction,
}

/// Issues listed from `/repos/{o}/{r}/issues`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssueQuery {
    pub repo: RepoRef,
    #[serde(default)]
    pub state: StateFilter,
    #[serde(default)]
    pub count: QueryCount,
    #[serde(default)]
    pub sort: IssueSort,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Prs(PullQuery),
    Issues(IssueQuery),
}

impl Query {
    pub fn repo(&self) -> &RepoRef {
        match self {
            Query::Prs(q) => &q.repo,
            Query::Issues(q) => &q.repo,
        }
    }

    pub fn count(&self) -> QueryCount {
        match self {
            Query::Prs(q) => q.count,
            Query::Issues(q) => q.count,
        }
    }

    /// Read and parse a query file.
    pub async fn load(path: &Path) -> Result<Self, QueryError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| QueryError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        text.parse()
    }
}

impl FromStr for Query {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: Value = serde_json::from_str(s).map_err(QueryError::Json)?;
        parse_query(&value)
    }
}

/// Validate a decoded query document.
pub fn parse_query(value: &Value) -> Result<Query, QueryError> {
    let kind = value.get("kind").ok_or(QueryError::MissingKind)?;
    match kind.as_str() {
        Some("prs") => serde_json::from_value(value.clone())
            .map(Query::Prs)
            .map_err(|source| QueryError::Invalid { kind: "prs", source }),
        Some("issues") => serde_json::from_value(value.clone())
            .map(Query::Issues)
            .map_err(|source| QueryError::Invalid {
                kind: "issues",
                source,
            }),
        Some(other) => Err(QueryError::UnknownKind(other.to_string())),
        None => Err(QueryError::UnknownKind(kind.to_string())),
    }
}
