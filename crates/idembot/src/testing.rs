//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::entity::{Issue, IssuePayload, RepoRef};
use crate::github::GitHubClient;
use crate::http::{HttpMethod, MockTransport};
use crate::poll::PollConfig;
use crate::pool::Handle;
use crate::rules::RuleRegistry;
use crate::runner::Bot;
use crate::session::{Session, SessionOptions};
use crate::snapshot::{CacheKey, EntityKind, SnapshotStore};

pub const BASE: &str = "https://api.test";

pub fn repo() -> RepoRef {
    RepoRef::new("octo", "bot")
}

pub fn ts(value: &str) -> DateTime<Utc> {
    value.parse().expect("rfc3339 timestamp")
}

pub fn issue_json(number: u64, updated_at: &str) -> Value {
    json!({
        "id": 1000 + number,
        "number": number,
        "title": format!("Issue {number}"),
        "body": "",
        "state": "open",
        "locked": false,
        "user": {"login": "alice", "id": 1},
        "labels": [],
        "assignees": [],
        "comments": 0,
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": updated_at,
        "url": format!("{BASE}/repos/octo/bot/issues/{number}"),
        "html_url": format!("https://github.test/octo/bot/issues/{number}")
    })
}

pub fn pull_json(number: u64, updated_at: &str, mergeable: Option<bool>) -> Value {
    json!({
        "id": 5000 + number,
        "number": number,
        "title": format!("PR {number}"),
        "body": "",
        "state": "open",
        "locked": false,
        "user": {"login": "alice", "id": 1},
        "labels": [],
        "assignees": [],
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": updated_at,
        "url": format!("{BASE}/repos/octo/bot/pulls/{number}"),
        "issue_url": format!("{BASE}/repos/octo/bot/issues/{number}"),
        "html_url": format!("https://github.test/octo/bot/pull/{number}"),
        "merged": false,
        "mergeable": mergeable,
        "mergeable_state": if mergeable == Some(false) { "dirty" } else { "clean" },
        "head": {"ref": "feature", "sha": "headsha"},
        "base": {"ref": "main", "sha": "basesha"}
    })
}

pub fn label_json(name: &str) -> Value {
    json!({"name": name, "color": "ededed"})
}

pub fn comment_json(id: u64, login: &str, body: &str) -> Value {
    json!({
        "id": id,
        "body": body,
        "user": {"login": login},
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z",
        "html_url": format!("https://github.test/octo/bot/issues/1#issuecomment-{id}")
    })
}

/// A session wired to a [`MockTransport`] and a throwaway snapshot store.
pub struct Fixture {
    pub transport: MockTransport,
    pub session: Session,
    _dir: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_options(SessionOptions::default())
    }

    /// Polling always runs without delay in tests.
    pub fn with_options(mut options: SessionOptions) -> Self {
        options.poll = PollConfig::new(options.poll.attempts, Duration::ZERO);
        let dir = tempfile::tempdir().expect("tempdir");
        let transport = MockTransport::new();
        let client = GitHubClient::new_with_transport(BASE, "test-token", Arc::new(transport.clone()))
            .expect("client");
        let session = Session::new(client, SnapshotStore::new(dir.path()), options);
        Self {
            transport,
            session,
            _dir: dir,
        }
    }

    pub async fn seed_issue(&self, number: u64, updated_at: &str, cached_at: &str) {
        seed_issue(self.session.store(), number, updated_at, cached_at).await;
    }

    pub async fn seed_pull(&self, number: u64, updated_at: &str, cached_at: &str) {
        seed_pull(self.session.store(), number, updated_at, cached_at).await;
    }

    /// Hand the session to a [`Bot`] running `rules`.
    pub fn into_bot(self, rules: RuleRegistry) -> BotFixture {
        BotFixture {
            transport: self.transport,
            bot: Bot::new(self.session, rules),
            _dir: self._dir,
        }
    }

    /// Intern an issue built from `json` without any network traffic.
    pub fn issue(&self, json: Value) -> Handle<Issue> {
        let raw = serde_json::from_value(json).expect("raw issue");
        self.session.ingest(&repo(), &IssuePayload::Issue(raw))
    }

    pub fn pull(&self, json: Value) -> Handle<Issue> {
        let raw = serde_json::from_value(json).expect("raw pull");
        self.session.ingest(&repo(), &IssuePayload::PullRequest(raw))
    }

    pub fn expect_login(&self, login: &str) {
        self.transport.push_json(
            HttpMethod::Get,
            format!("{BASE}/user"),
            200,
            json!({"login": login}),
        );
    }
}

async fn seed_issue(store: &SnapshotStore, number: u64, updated_at: &str, cached_at: &str) {
    let key = CacheKey::new(&repo(), EntityKind::Issue, number);
    store
        .save(&key, &issue_json(number, updated_at), ts(cached_at))
        .await
        .expect("seed issue");
}

async fn seed_pull(store: &SnapshotStore, number: u64, updated_at: &str, cached_at: &str) {
    let key = CacheKey::new(&repo(), EntityKind::PullRequest, number);
    store
        .save(&key, &pull_json(number, updated_at, None), ts(cached_at))
        .await
        .expect("seed pull");
}

pub struct BotFixture {
    pub transport: MockTransport,
    pub bot: Bot,
    _dir: tempfile::TempDir,
}

impl BotFixture {
    pub async fn seed_issue(&self, number: u64, updated_at: &str, cached_at: &str) {
        seed_issue(self.bot.session().store(), number, updated_at, cached_at).await;
    }

    pub async fn seed_pull(&self, number: u64, updated_at: &str, cached_at: &str) {
        seed_pull(self.bot.session().store(), number, updated_at, cached_at).await;
    }
}
