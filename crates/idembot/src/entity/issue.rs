//! Issues and pull requests.
//!
//! GitHub models a pull request as an issue with extra fields, so both share
//! one [`Issue`] wrapper and the extras live in [`IssueKind::PullRequest`].
//! That keeps a single pool entry per `owner/name#number` no matter which
//! endpoint produced the payload.

use chrono::{DateTime, Utc};

use super::{Comment, Label, Milestone, RepoRef, User};
use crate::github::IssueState;
use crate::github::types::{BranchRef, RawIssue, RawLabel, RawMilestone, RawPullRequest, RawUser};
use crate::pool::{Canonical, Handle, Pools};
use crate::snapshot::EntityKind;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitRef {
    pub name: String,
    pub sha: String,
}

impl From<&BranchRef> for GitRef {
    fn from(value: &BranchRef) -> Self {
        GitRef {
            name: value.ref_name.clone(),
            sha: value.sha.clone(),
        }
    }
}

/// Fields only pull requests have.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullRequestDetails {
    /// Id of the pull request resource, distinct from the issue id.
    pub id: u64,
    pub merged: bool,
    pub merged_at: Option<DateTime<Utc>>,
    /// `None` while GitHub is still computing mergeability.
    pub mergeable: Option<bool>,
    pub mergeable_state: Option<String>,
    pub draft: bool,
    pub head: GitRef,
    pub base: GitRef,
    pub additions: u64,
    pub deletions: u64,
    pub changed_files: u64,
    pub commits: u64,
    pub review_comments: u64,
}

impl From<&RawPullRequest> for PullRequestDetails {
    fn from(raw: &RawPullRequest) -> Self {
        PullRequestDetails {
            id: raw.id,
            merged: raw.merged || raw.merged_at.is_some(),
            merged_at: raw.merged_at,
            mergeable: raw.mergeable,
            mergeable_state: raw.mergeable_state.clone(),
            draft: raw.draft,
            head: GitRef::from(&raw.head),
            base: GitRef::from(&raw.base),
            additions: raw.additions,
            deletions: raw.deletions,
            changed_files: raw.changed_files,
            commits: raw.commits,
            review_comments: raw.review_comments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueKind {
    Issue,
    PullRequest(Box<PullRequestDetails>),
}

/// Raw input accepted by the issue pool.
#[derive(Debug, Clone)]
pub enum IssuePayload {
    Issue(RawIssue),
    PullRequest(RawPullRequest),
}

impl IssuePayload {
    #[must_use]
    pub fn number(&self) -> u64 {
        match self {
            IssuePayload::Issue(raw) => raw.number,
            IssuePayload::PullRequest(raw) => raw.number,
        }
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            IssuePayload::Issue(raw) => raw.updated_at,
            IssuePayload::PullRequest(raw) => raw.updated_at,
        }
    }
}

/// Shared view of the fields both payload shapes carry.
struct CommonFields<'a> {
    id: u64,
    number: u64,
    title: &'a str,
    body: Option<&'a str>,
    state: IssueState,
    locked: bool,
    user: &'a RawUser,
    labels: &'a [RawLabel],
    assignees: &'a [RawUser],
    milestone: Option<&'a RawMilestone>,
    comments: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    url: &'a str,
    html_url: &'a str,
}

impl IssuePayload {
    fn common(&self) -> CommonFields<'_> {
        match self {
            IssuePayload::Issue(raw) => CommonFields {
                id: raw.id,
                number: raw.number,
                title: &raw.title,
                body: raw.body.as_deref(),
                state: raw.state,
                locked: raw.locked,
                user: &raw.user,
                labels: &raw.labels,
                assignees: &raw.assignees,
                milestone: raw.milestone.as_ref(),
                comments: raw.comments,
                created_at: raw.created_at,
                updated_at: raw.updated_at,
                closed_at: raw.closed_at,
                url: &raw.url,
                html_url: &raw.html_url,
            },
            IssuePayload::PullRequest(raw) => CommonFields {
                id: raw.id,
                number: raw.number,
                title: &raw.title,
                body: raw.body.as_deref(),
                state: raw.state,
                locked: raw.locked,
                user: &raw.user,
                labels: &raw.labels,
                assignees: &raw.assignees,
                milestone: raw.milestone.as_ref(),
                comments: raw.comments,
                created_at: raw.created_at,
                updated_at: raw.updated_at,
                closed_at: raw.closed_at,
                // The issue-flavoured URL is what project cards point at.
                url: if raw.issue_url.is_empty() {
                    raw.url.as_str()
                } else {
                    raw.issue_url.as_str()
                },
                html_url: &raw.html_url,
            },
        }
    }
}

/// Canonical issue or pull request.
#[derive(Debug, Clone)]
pub struct Issue {
    pub repo: RepoRef,
    pub id: u64,
    pub number: u64,
    pub title: String,
    pub body: String,
    pub state: IssueState,
    pub locked: bool,
    pub author: Handle<User>,
    pub labels: Vec<Handle<Label>>,
    pub assignees: Vec<Handle<User>>,
    pub milestone: Option<Handle<Milestone>>,
    pub comment_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// API URL of the issue resource.
    pub url: String,
    pub html_url: String,
    pub kind: IssueKind,
    /// Comments fetched during this run, if any.
    pub comments: Option<Vec<Handle<Comment>>>,
}

impl Issue {
    #[must_use]
    pub fn key(repo: &RepoRef, number: u64) -> String {
        format!("{}/{}#{}", repo.owner, repo.name, number)
    }

    #[must_use]
    pub fn is_pull_request(&self) -> bool {
        matches!(self.kind, IssueKind::PullRequest(_))
    }

    #[must_use]
    pub fn entity_kind(&self) -> EntityKind {
        if self.is_pull_request() {
            EntityKind::PullRequest
        } else {
            EntityKind::Issue
        }
    }

    #[must_use]
    pub fn pull_request(&self) -> Option<&PullRequestDetails> {
        match &self.kind {
            IssueKind::PullRequest(details) => Some(&**details),
            IssueKind::Issue => None,
        }
    }

    pub fn pull_request_mut(&mut self) -> Option<&mut PullRequestDetails> {
        match &mut self.kind {
            IssueKind::PullRequest(details) => Some(&mut **details),
            IssueKind::Issue => None,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == IssueState::Open
    }

    #[must_use]
    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.read().name.clone()).collect()
    }

    #[must_use]
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.read().name == name)
    }

    #[must_use]
    pub fn author_login(&self) -> String {
        self.author.read().login.clone()
    }

    /// `owner/name#number`, for logs.
    #[must_use]
    pub fn reference(&self) -> String {
        Issue::key(&self.repo, self.number)
    }

    /// Replace the label set from a write response.
    pub fn replace_labels(&mut self, raw: &[RawLabel], pools: &Pools) {
        self.labels = raw
            .iter()
            .map(|l| pools.labels.ingest(&self.repo, l, pools))
            .collect();
    }
}

impl Canonical for Issue {
    type Raw = IssuePayload;

    fn pool_key(repo: &RepoRef, raw: &IssuePayload) -> String {
        Issue::key(repo, raw.number())
    }

    fn create(repo: &RepoRef, raw: &IssuePayload, pools: &Pools) -> Self {
        let fields = raw.common();
        let kind = match raw {
            IssuePayload::PullRequest(pr) => {
                IssueKind::PullRequest(Box::new(PullRequestDetails::from(pr)))
            }
            IssuePayload::Issue(issue) if issue.is_pull_request() => {
                IssueKind::PullRequest(Box::default())
            }
            IssuePayload::Issue(_) => IssueKind::Issue,
        };
        let mut issue = Issue {
            repo: repo.clone(),
            id: fields.id,
            number: fields.number,
            title: String::new(),
            body: String::new(),
            state: fields.state,
            locked: fields.locked,
            author: pools.users.ingest(repo, fields.user, pools),
            labels: Vec::new(),
            assignees: Vec::new(),
            milestone: None,
            comment_count: 0,
            created_at: fields.created_at,
            updated_at: fields.updated_at,
            closed_at: None,
            url: String::new(),
            html_url: String::new(),
            kind,
            comments: None,
        };
        issue.update(raw, pools);
        issue
    }

    fn update(&mut self, raw: &IssuePayload, pools: &Pools) {
        let fields = raw.common();
        if fields.updated_at != self.updated_at {
            self.comments = None;
        }

        if let IssuePayload::Issue(issue) = raw {
            self.id = issue.id;
        }
        self.title = fields.title.to_string();
        self.body = fields.body.unwrap_or_default().to_string();
        self.state = fields.state;
        self.locked = fields.locked;
        self.author = pools.users.ingest(&self.repo, fields.user, pools);
        self.replace_labels(fields.labels, pools);
        self.assignees = fields
            .assignees
            .iter()
            .map(|u| pools.users.ingest(&self.repo, u, pools))
            .collect();
        self.milestone = fields
            .milestone
            .map(|m| pools.milestones.ingest(&self.repo, m, pools));
        self.comment_count = fields.comments;
        self.created_at = fields.created_at;
        self.updated_at = fields.updated_at;
        self.closed_at = fields.closed_at;
        if !fields.url.is_empty() {
            self.url = fields.url.to_string();
        }
        if !fields.html_url.is_empty() {
            self.html_url = fields.html_url.to_string();
        }

        // An issue-shaped payload for a pull request keeps the details we
        // already have.
        if let IssuePayload::PullRequest(pr) = raw {
            self.kind = IssueKind::PullRequest(Box::new(PullRequestDetails::from(pr)));
        }
    }
}
