//! Per-run execution context.
//!
//! A [`Session`] owns everything whose lifetime is one bot run: the GitHub
//! client, the snapshot store, the identity pools, the action queue and a few
//! small caches. Rules and actions receive it by reference.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::action::ActionQueue;
use crate::entity::{Comment, Issue, IssuePayload, RepoRef, User};
use crate::error::{Error, PreconditionError, Result};
use crate::github::GitHubClient;
use crate::github::types::{
    CombinedStatus, ProjectColumn, RawCommit, RawIssue, RawPullFile, RawPullRequest, RawReview,
};
use crate::poll::{PollConfig, poll_until_resolved};
use crate::pool::{Handle, Pools};
use crate::progress::{ProgressCallback, RunProgress, emit};
use crate::snapshot::{CacheKey, EntityKind, SnapshotError, SnapshotStore};

/// What to do when an action's write fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abort the drain and the repository pass on the first failure.
    #[default]
    FailFast,
    /// Record the failure and carry on with the next action.
    Continue,
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Evaluate actions but never write.
    pub dry_run: bool,
    pub failure_policy: FailurePolicy,
    /// Bounds for mergeability polling.
    pub poll: PollConfig,
}

pub struct Session {
    client: GitHubClient,
    store: SnapshotStore,
    pools: Pools,
    queue: ActionQueue,
    options: SessionOptions,
    progress: Option<ProgressCallback>,
    me: OnceCell<String>,
    project_columns: Mutex<HashMap<u64, Vec<ProjectColumn>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client", &self.client)
            .field("store", &self.store)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(client: GitHubClient, store: SnapshotStore, options: SessionOptions) -> Self {
        Self {
            client,
            store,
            pools: Pools::new(),
            queue: ActionQueue::new(),
            options,
            progress: None,
            me: OnceCell::new(),
            project_columns: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn client(&self) -> &GitHubClient {
        &self.client
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn pools(&self) -> &Pools {
        &self.pools
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn progress(&self) -> Option<&ProgressCallback> {
        self.progress.as_ref()
    }

    pub(crate) fn emit(&self, event: RunProgress) {
        emit(self.progress.as_ref(), event);
    }

    /// Login of the authenticated account, fetched once per session.
    pub async fn my_login(&self) -> Result<String> {
        let login = self
            .me
            .get_or_try_init(|| async {
                let me = self.client.get_authenticated_user().await?;
                tracing::debug!(login = %me.login, "Authenticated");
                Ok::<_, Error>(me.login)
            })
            .await?;
        Ok(login.clone())
    }

    // ---------- issue resolution ----------

    /// Intern a payload without persisting it.
    pub fn ingest(&self, repo: &RepoRef, payload: &IssuePayload) -> Handle<Issue> {
        self.pools.issues.ingest(repo, payload, &self.pools)
    }

    /// Persist a payload with its fetch time, then intern it.
    pub async fn record(
        &self,
        repo: &RepoRef,
        payload: IssuePayload,
        fetched_at: DateTime<Utc>,
    ) -> Result<Handle<Issue>> {
        match &payload {
            IssuePayload::Issue(raw) => {
                let key = CacheKey::new(repo, EntityKind::Issue, raw.number);
                self.store.save(&key, raw, fetched_at).await?;
            }
            IssuePayload::PullRequest(raw) => {
                let key = CacheKey::new(repo, EntityKind::PullRequest, raw.number);
                self.store.save(&key, raw, fetched_at).await?;
            }
        }
        Ok(self.ingest(repo, &payload))
    }

    /// Fetch an item from GitHub, persist it and intern it.
    ///
    /// Pull requests get a second fetch from the pulls endpoint, which is the
    /// only one that reports merge state.
    pub async fn fetch_issue(&self, repo: &RepoRef, number: u64) -> Result<Handle<Issue>> {
        let fetched_at = Utc::now();
        let raw = self.client.get_issue(repo, number).await?;
        self.record_listed(repo, raw, fetched_at).await
    }

    /// Persist and intern an item from an issues listing.
    pub async fn record_listed(
        &self,
        repo: &RepoRef,
        raw: RawIssue,
        fetched_at: DateTime<Utc>,
    ) -> Result<Handle<Issue>> {
        if raw.is_pull_request() {
            let pr = self.client.get_pull(repo, raw.number).await?;
            self.record(repo, IssuePayload::PullRequest(pr), fetched_at)
                .await
        } else {
            self.record(repo, IssuePayload::Issue(raw), fetched_at).await
        }
    }

    /// Resolve an item: live instance first, then the snapshot store, then
    /// GitHub.
    pub async fn issue(&self, repo: &RepoRef, number: u64) -> Result<Handle<Issue>> {
        if let Some(live) = self.pools.issues.get(&Issue::key(repo, number)) {
            return Ok(live);
        }
        if let Some(payload) = self.load_cached(repo, number).await? {
            return Ok(self.ingest(repo, &payload));
        }
        self.fetch_issue(repo, number).await
    }

    /// Like [`Session::issue`], but ignores snapshots older than
    /// `updated_at`.
    pub async fn issue_fresh(
        &self,
        repo: &RepoRef,
        number: u64,
        updated_at: DateTime<Utc>,
    ) -> Result<Handle<Issue>> {
        let kinds = [EntityKind::PullRequest, EntityKind::Issue];
        match self.current(repo, number, updated_at, &kinds).await? {
            Some(issue) => Ok(issue),
            None => self.fetch_issue(repo, number).await,
        }
    }

    /// [`Session::issue_fresh`] for an item known to be a pull request.
    /// Skips the issues endpoint when a fetch is needed.
    pub async fn pull_fresh(
        &self,
        repo: &RepoRef,
        number: u64,
        updated_at: DateTime<Utc>,
    ) -> Result<Handle<Issue>> {
        match self
            .current(repo, number, updated_at, &[EntityKind::PullRequest])
            .await?
        {
            Some(pull) => Ok(pull),
            None => self.fetch_pull(repo, number).await,
        }
    }

    /// Fetch a pull request from the pulls endpoint, persist it and intern it.
    pub async fn fetch_pull(&self, repo: &RepoRef, number: u64) -> Result<Handle<Issue>> {
        let fetched_at = Utc::now();
        let pr = self.client.get_pull(repo, number).await?;
        self.record(repo, IssuePayload::PullRequest(pr), fetched_at)
            .await
    }

    /// The live instance or a snapshot, if either is at least as new as
    /// `updated_at`.
    async fn current(
        &self,
        repo: &RepoRef,
        number: u64,
        updated_at: DateTime<Utc>,
        kinds: &[EntityKind],
    ) -> Result<Option<Handle<Issue>>> {
        if let Some(live) = self.pools.issues.get(&Issue::key(repo, number)) {
            let current = live.read().updated_at >= updated_at;
            if current {
                return Ok(Some(live));
            }
        }
        for kind in kinds {
            let key = CacheKey::new(repo, *kind, number);
            if let Some(ts) = self.cached_timestamp(&key).await?
                && ts >= updated_at
                && let Some(payload) = self.load_payload(&key).await?
            {
                return Ok(Some(self.ingest(repo, &payload)));
            }
        }
        Ok(None)
    }

    /// Re-fetch an item that is already live so rules see current state.
    pub async fn refresh(&self, issue: &Handle<Issue>) -> Result<()> {
        let (repo, number, is_pr) = {
            let issue = issue.read();
            (issue.repo.clone(), issue.number, issue.is_pull_request())
        };
        if is_pr {
            self.fetch_pull(&repo, number).await?;
        } else {
            self.fetch_issue(&repo, number).await?;
        }
        Ok(())
    }

    async fn load_cached(&self, repo: &RepoRef, number: u64) -> Result<Option<IssuePayload>> {
        // A number is either an issue or a pull request, never both.
        for kind in [EntityKind::PullRequest, EntityKind::Issue] {
            if let Some(payload) = self.load_payload(&CacheKey::new(repo, kind, number)).await? {
                return Ok(Some(payload));
            }
        }
        Ok(None)
    }

    async fn load_payload(&self, key: &CacheKey) -> Result<Option<IssuePayload>> {
        let loaded = match key.kind {
            EntityKind::Issue => self
                .store
                .load::<RawIssue>(key)
                .await
                .map(|s| s.map(|s| IssuePayload::Issue(s.content))),
            EntityKind::PullRequest => self
                .store
                .load::<RawPullRequest>(key)
                .await
                .map(|s| s.map(|s| IssuePayload::PullRequest(s.content))),
        };
        match loaded {
            Ok(payload) => Ok(payload),
            Err(SnapshotError::Decode { path, source }) => {
                tracing::warn!(path = %path.display(), error = %source, "Ignoring unreadable snapshot");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Snapshot timestamp for `key`. Unreadable snapshots count as missing so
    /// they get refreshed instead of wedging the sync.
    pub(crate) async fn cached_timestamp(&self, key: &CacheKey) -> Result<Option<DateTime<Utc>>> {
        match self.store.timestamp(key).await {
            Ok(ts) => Ok(ts),
            Err(SnapshotError::Decode { path, source }) => {
                tracing::warn!(path = %path.display(), error = %source, "Ignoring unreadable snapshot");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ---------- related resources ----------

    pub async fn user(&self, login: &str) -> Result<Handle<User>> {
        if let Some(user) = self.pools.users.get(login) {
            return Ok(user);
        }
        let raw = self.client.get_user(login).await?;
        // User keys ignore the repository.
        let anywhere = RepoRef::new("", "");
        Ok(self.pools.users.ingest(&anywhere, &raw, &self.pools))
    }

    /// Comments on an item, fetched once per session and then served from
    /// the item itself.
    pub async fn comments(&self, issue: &Handle<Issue>) -> Result<Vec<Handle<Comment>>> {
        let (repo, number) = {
            let issue = issue.read();
            if let Some(cached) = &issue.comments {
                return Ok(cached.clone());
            }
            (issue.repo.clone(), issue.number)
        };

        let raw = self.client.list_comments(&repo, number).await?;
        let comments: Vec<_> = raw
            .iter()
            .map(|c| self.pools.comments.ingest(&repo, c, &self.pools))
            .collect();
        issue.write().comments = Some(comments.clone());
        Ok(comments)
    }

    /// Mergeability of a pull request, polling GitHub while it is unknown.
    ///
    /// Each poll persists the refreshed payload. The result is `None` when
    /// GitHub still had no answer after the configured attempts.
    pub async fn mergeable(&self, issue: &Handle<Issue>) -> Result<Option<bool>> {
        let (repo, number, current) = {
            let issue = issue.read();
            let details =
                issue
                    .pull_request()
                    .ok_or_else(|| PreconditionError::NotAPullRequest {
                        item: issue.reference(),
                    })?;
            (issue.repo.clone(), issue.number, details.mergeable)
        };
        if current.is_some() {
            return Ok(current);
        }

        let item = format!("{repo}#{number}");
        poll_until_resolved(
            self.options.poll,
            || {
                let repo = repo.clone();
                async move {
                    let fetched_at = Utc::now();
                    let pr = self.client.get_pull(&repo, number).await?;
                    let mergeable = pr.mergeable;
                    self.record(&repo, IssuePayload::PullRequest(pr), fetched_at)
                        .await?;
                    Ok::<_, Error>(mergeable)
                }
            },
            |attempt| {
                self.emit(RunProgress::PollingMergeable {
                    item: item.clone(),
                    attempt,
                });
            },
        )
        .await
    }

    pub async fn reviews(&self, issue: &Handle<Issue>) -> Result<Vec<RawReview>> {
        let (repo, number) = Self::pull_coordinates(issue)?;
        Ok(self.client.list_reviews(&repo, number).await?)
    }

    pub async fn pull_commits(&self, issue: &Handle<Issue>) -> Result<Vec<RawCommit>> {
        let (repo, number) = Self::pull_coordinates(issue)?;
        Ok(self.client.list_pull_commits(&repo, number).await?)
    }

    pub async fn pull_files(&self, issue: &Handle<Issue>) -> Result<Vec<RawPullFile>> {
        let (repo, number) = Self::pull_coordinates(issue)?;
        Ok(self.client.list_pull_files(&repo, number).await?)
    }

    /// Combined CI status of the pull request's head commit.
    pub async fn combined_status(&self, issue: &Handle<Issue>) -> Result<CombinedStatus> {
        let (repo, sha) = {
            let issue = issue.read();
            let details =
                issue
                    .pull_request()
                    .ok_or_else(|| PreconditionError::NotAPullRequest {
                        item: issue.reference(),
                    })?;
            (issue.repo.clone(), details.head.sha.clone())
        };
        Ok(self.client.get_combined_status(&repo, &sha).await?)
    }

    fn pull_coordinates(issue: &Handle<Issue>) -> Result<(RepoRef, u64)> {
        let issue = issue.read();
        if !issue.is_pull_request() {
            return Err(PreconditionError::NotAPullRequest {
                item: issue.reference(),
            }
            .into());
        }
        Ok((issue.repo.clone(), issue.number))
    }

    /// Columns of a project board, fetched once per session.
    pub async fn project_columns(&self, project_id: u64) -> Result<Vec<ProjectColumn>> {
        if let Some(columns) = self
            .project_columns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&project_id)
        {
            return Ok(columns.clone());
        }
        let columns = self.client.list_project_columns(project_id).await?;
        self.project_columns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(project_id, columns.clone());
        Ok(columns)
    }
}
