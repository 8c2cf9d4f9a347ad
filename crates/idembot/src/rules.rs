//! Rule registry and the context rules run in.
//!
//! A rule looks at one issue or pull request and enqueues actions. Rules are
//! registered under a name with a [`RuleTarget`], and run in registration
//! order. Closures work as rules directly:
//!
//! ```ignore
//! registry.register("needs-triage", RuleTarget::Issues, |item: &Handle<Issue>, ctx: &RuleContext<'_>| {
//!     if item.read().labels.is_empty() {
//!         ctx.queue().add_labels(item, ["needs-triage"]);
//!     }
//!     Ok(())
//! });
//! ```

use async_trait::async_trait;
use thiserror::Error;

use crate::action::ActionQueue;
use crate::entity::{Comment, Issue, RepoRef};
use crate::error::{Error, PreconditionError, Result};
use crate::github::GitHubError;
use crate::github::types::{CombinedStatus, RawReview};
use crate::pool::Handle;
use crate::session::Session;

/// Failure inside user rule code. Logged per item; never aborts a run.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RuleError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl RuleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<Error> for RuleError {
    fn from(err: Error) -> Self {
        Self::with_source(err.to_string(), err)
    }
}

impl From<GitHubError> for RuleError {
    fn from(err: GitHubError) -> Self {
        Self::with_source(err.to_string(), err)
    }
}

impl From<PreconditionError> for RuleError {
    fn from(err: PreconditionError) -> Self {
        Self::with_source(err.to_string(), err)
    }
}

/// Which items a rule is shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RuleTarget {
    Issues,
    PullRequests,
    #[default]
    IssuesAndPullRequests,
}

impl RuleTarget {
    #[must_use]
    pub fn matches(self, issue: &Issue) -> bool {
        match self {
            RuleTarget::Issues => !issue.is_pull_request(),
            RuleTarget::PullRequests => issue.is_pull_request(),
            RuleTarget::IssuesAndPullRequests => true,
        }
    }
}

#[async_trait]
pub trait Rule: Send + Sync {
    async fn evaluate(&self, item: &Handle<Issue>, ctx: &RuleContext<'_>) -> Result<(), RuleError>;
}

#[async_trait]
impl<F> Rule for F
where
    F: Fn(&Handle<Issue>, &RuleContext<'_>) -> Result<(), RuleError> + Send + Sync,
{
    async fn evaluate(&self, item: &Handle<Issue>, ctx: &RuleContext<'_>) -> Result<(), RuleError> {
        self(item, ctx)
    }
}

/// What a rule can reach while it runs.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    session: &'a Session,
}

impl<'a> RuleContext<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &'a Session {
        self.session
    }

    pub fn queue(&self) -> &'a ActionQueue {
        self.session.queue()
    }

    pub fn dry_run(&self) -> bool {
        self.session.options().dry_run
    }

    pub async fn issue(&self, repo: &RepoRef, number: u64) -> Result<Handle<Issue>> {
        self.session.issue(repo, number).await
    }

    pub async fn comments(&self, item: &Handle<Issue>) -> Result<Vec<Handle<Comment>>> {
        self.session.comments(item).await
    }

    /// Polls while GitHub is still computing the answer.
    pub async fn mergeable(&self, item: &Handle<Issue>) -> Result<Option<bool>> {
        self.session.mergeable(item).await
    }

    pub async fn reviews(&self, item: &Handle<Issue>) -> Result<Vec<RawReview>> {
        self.session.reviews(item).await
    }

    pub async fn combined_status(&self, item: &Handle<Issue>) -> Result<CombinedStatus> {
        self.session.combined_status(item).await
    }
}

struct RegisteredRule {
    name: String,
    target: RuleTarget,
    rule: Box<dyn Rule>,
}

/// Named rules, kept in registration order.
#[derive(Default)]
pub struct RuleRegistry {
    rules: Vec<RegisteredRule>,
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. Registering an existing name replaces that rule in place.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        target: RuleTarget,
        rule: impl Rule + 'static,
    ) -> &mut Self {
        let entry = RegisteredRule {
            name: name.into(),
            target,
            rule: Box::new(rule),
        };
        match self.rules.iter_mut().find(|r| r.name == entry.name) {
            Some(existing) => {
                tracing::warn!(rule = %entry.name, "Replacing rule registered under the same name");
                *existing = entry;
            }
            None => self.rules.push(entry),
        }
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name.as_str()).collect()
    }

    /// Keep only the named rules. Fails on the first unknown name and leaves
    /// the registry untouched.
    pub fn retain<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        if let Some(unknown) = names
            .iter()
            .map(AsRef::as_ref)
            .find(|n| !self.rules.iter().any(|r| r.name == *n))
        {
            return Err(Error::UnknownRule(unknown.to_string()));
        }
        self.rules
            .retain(|r| names.iter().any(|n| n.as_ref() == r.name));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules that apply to `issue`, with their names.
    pub fn matching<'r>(&'r self, issue: &Issue) -> Vec<(&'r str, &'r dyn Rule)> {
        self.rules
            .iter()
            .filter(|r| r.target.matches(issue))
            .map(|r| (r.name.as_str(), r.rule.as_ref()))
            .collect()
    }
}
