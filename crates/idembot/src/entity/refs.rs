//! Repository and issue references.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefParseError {
    #[error("expected owner/name, got {0:?}")]
    Repo(String),

    #[error("expected owner/name#number, got {0:?}")]
    Issue(String),
}

/// A repository, identified by `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

fn valid_part(part: &str) -> bool {
    !part.is_empty() && !part.contains(['/', '#']) && !part.chars().any(char::is_whitespace)
}

impl FromStr for RepoRef {
    type Err = RefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name)) if valid_part(owner) && valid_part(name) => {
                Ok(RepoRef::new(owner, name))
            }
            _ => Err(RefParseError::Repo(s.to_string())),
        }
    }
}

impl TryFrom<String> for RepoRef {
    type Error = RefParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RepoRef> for String {
    fn from(value: RepoRef) -> Self {
        value.to_string()
    }
}

/// One issue or pull request, written `owner/name#number`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueRef {
    pub repo: RepoRef,
    pub number: u64,
}

impl fmt::Display for IssueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repo, self.number)
    }
}

impl FromStr for IssueRef {
    type Err = RefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || RefParseError::Issue(s.to_string());
        let (repo, number) = s.split_once('#').ok_or_else(err)?;
        let repo: RepoRef = repo.parse().map_err(|_| err())?;
        let number = number.parse::<u64>().map_err(|_| err())?;
        Ok(IssueRef { repo, number })
    }
}
