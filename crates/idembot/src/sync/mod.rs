//! Incremental repository sync.
//!
//! Keeps the snapshot store current with as few requests as possible:
//!
//! 1. Fetch the first page of items ordered by most recently updated.
//! 2. Walk it newest first. The first item whose snapshot is at least as new
//!    as its `updated_at` proves everything older is current too, so stop.
//! 3. Items before that point are re-fetched and persisted.
//! 4. Running off the end of the page means the store is too far behind to
//!    patch; fall back to a full fetch of every item, oldest first.
//!
//! Every persisted item is also interned in the session's pools. The outcome
//! also lists the whole first page, which is what rules run over: a snapshot
//! being current says nothing about whether its actions were ever applied.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Issue, RepoRef};
use crate::error::{Error, Result};
use crate::github::PAGE_SIZE;
use crate::github::types::{Direction, IssueSort, ListIssuesParams, RawIssue, StateFilter};
use crate::pool::Handle;
use crate::progress::RunProgress;
use crate::session::Session;
use crate::snapshot::CacheKey;

/// Which items a repository sync looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueFilter {
    pub state: StateFilter,
    /// Only items carrying all of these labels.
    pub labels: Vec<String>,
}

impl Default for IssueFilter {
    fn default() -> Self {
        Self {
            state: StateFilter::All,
            labels: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncOutcome {
    /// Items fetched and persisted by this sync, in processing order.
    pub refreshed: Vec<Handle<Issue>>,
    /// Whether the changed-items probe ran dry and a full fetch was needed.
    pub full_fetch: bool,
    /// Number and `updated_at` of every item on the most recently updated
    /// page, newest first.
    pub recent: Vec<(u64, DateTime<Utc>)>,
}

/// Bring the snapshot store for `repo` up to date.
///
/// Any failed request aborts the sync with [`Error::Sync`].
pub async fn sync_repo(session: &Session, repo: &RepoRef, filter: &IssueFilter) -> Result<SyncOutcome> {
    session.emit(RunProgress::SyncStarted {
        repo: repo.to_string(),
    });

    let outcome = run(session, repo, filter)
        .await
        .map_err(|source| Error::Sync {
            repo: repo.clone(),
            source: Box::new(source),
        })?;

    session.emit(RunProgress::SyncComplete {
        repo: repo.to_string(),
        refreshed: outcome.refreshed.len(),
        full_fetch: outcome.full_fetch,
    });
    Ok(outcome)
}

async fn run(session: &Session, repo: &RepoRef, filter: &IssueFilter) -> Result<SyncOutcome> {
    let mut outcome = SyncOutcome::default();
    let mut seen = HashSet::new();

    if probe_changed(session, repo, filter, &mut outcome, &mut seen).await? {
        tracing::info!(repo = %repo, refreshed = outcome.refreshed.len(), "Sync completed");
        session.emit(RunProgress::CacheCurrent {
            repo: repo.to_string(),
            refreshed: outcome.refreshed.len(),
        });
        return Ok(outcome);
    }

    tracing::info!(repo = %repo, "Cache is too far out of date; running a full issue fetch");
    session.emit(RunProgress::FullFetchStarted {
        repo: repo.to_string(),
    });
    outcome.full_fetch = true;
    full_fetch(session, repo, filter, &mut outcome, &mut seen).await?;
    tracing::info!(repo = %repo, refreshed = outcome.refreshed.len(), "Full issue fetch complete");
    Ok(outcome)
}

/// Walk the most recently updated page. Returns `true` once an up-to-date
/// snapshot is found.
async fn probe_changed(
    session: &Session,
    repo: &RepoRef,
    filter: &IssueFilter,
    outcome: &mut SyncOutcome,
    seen: &mut HashSet<String>,
) -> Result<bool> {
    let fetched_at = Utc::now();
    let params = ListIssuesParams {
        sort: IssueSort::Updated,
        direction: Direction::Desc,
        state: filter.state,
        labels: filter.labels.clone(),
        page: 1,
    };
    let page = session.client().list_issues(repo, &params).await?;
    outcome.recent = page.iter().map(|raw| (raw.number, raw.updated_at)).collect();

    for raw in page {
        let key = CacheKey::issue(repo, raw.number, raw.is_pull_request());
        if let Some(cached_at) = session.cached_timestamp(&key).await?
            && cached_at >= raw.updated_at
        {
            tracing::debug!(repo = %repo, number = raw.number, "Reached up-to-date item");
            return Ok(true);
        }
        persist(session, repo, raw, fetched_at, outcome, seen).await?;
    }

    Ok(false)
}

async fn full_fetch(
    session: &Session,
    repo: &RepoRef,
    filter: &IssueFilter,
    outcome: &mut SyncOutcome,
    seen: &mut HashSet<String>,
) -> Result<()> {
    let mut page_number = 1;
    loop {
        let fetched_at = Utc::now();
        let params = ListIssuesParams {
            sort: IssueSort::Created,
            direction: Direction::Asc,
            state: filter.state,
            labels: filter.labels.clone(),
            page: page_number,
        };
        let page = session.client().list_issues(repo, &params).await?;
        let count = page.len();

        for raw in page {
            persist(session, repo, raw, fetched_at, outcome, seen).await?;
        }
        tracing::debug!(repo = %repo, page = page_number, count, "Fetched page");
        session.emit(RunProgress::FullFetchPage {
            repo: repo.to_string(),
            page: page_number,
            count,
        });

        if count < PAGE_SIZE as usize {
            return Ok(());
        }
        page_number += 1;
    }
}

async fn persist(
    session: &Session,
    repo: &RepoRef,
    raw: RawIssue,
    fetched_at: DateTime<Utc>,
    outcome: &mut SyncOutcome,
    seen: &mut HashSet<String>,
) -> Result<()> {
    let handle = session.record_listed(repo, raw, fetched_at).await?;
    let key = handle.read().reference();
    if seen.insert(key) {
        outcome.refreshed.push(handle);
    }
    Ok(())
}
