//! Idempotent actions.
//!
//! Rules never write to GitHub directly. They enqueue [`Action`]s, and the
//! executor diffs each one against the canonical issue before deciding what,
//! if anything, to send. After a write the canonical issue is refreshed from
//! the response, so running the same action again is a no-op.

mod board;
mod queue;

use std::fmt;

use chrono::Utc;

pub use board::BoardPlan;
pub use queue::{
    ActionFailure, ActionHandle, ActionQueue, ChangeObserver, DrainReport, drain,
};

use crate::comment::{self, UpsertPlan};
use crate::entity::{Comment, Issue, IssuePayload};
use crate::error::{PreconditionError, Result};
use crate::github::types::MergeOptions;
use crate::github::IssueState;
use crate::pool::Handle;
use crate::session::Session;

/// The change an action asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    AddLabels(Vec<String>),
    RemoveLabels(Vec<String>),
    /// Replace the label set exactly.
    SetLabels(Vec<String>),
    /// Create or update the bot's comment identified by `slug`.
    AddComment { slug: String, body: String },
    Lock,
    Unlock,
    Close,
    Reopen,
    /// Put the item's card in `column` of a project, or take it off the
    /// board when `column` is `None`.
    SetColumn {
        project_id: u64,
        column: Option<String>,
    },
    MergePr(MergeOptions),
}

/// A requested change to one issue or pull request.
#[derive(Clone)]
pub struct Action {
    pub issue: Handle<Issue>,
    pub kind: ActionKind,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("issue", &self.issue.read().reference())
            .field("kind", &self.kind)
            .finish()
    }
}

/// The write an action resolved to.
#[derive(Debug, Clone)]
pub(crate) enum Write {
    AddLabels(Vec<String>),
    RemoveLabels(Vec<String>),
    SetLabels(Vec<String>),
    CreateComment(String),
    EditComment { comment: Handle<Comment>, text: String },
    Lock,
    Unlock,
    SetState(IssueState),
    Board(BoardPlan),
    Merge(MergeOptions),
}

fn dedup(labels: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        if !out.contains(label) {
            out.push(label.clone());
        }
    }
    out
}

fn sorted(mut labels: Vec<String>) -> Vec<String> {
    labels.sort();
    labels.dedup();
    labels
}

impl Action {
    pub fn new(issue: &Handle<Issue>, kind: ActionKind) -> Self {
        Self {
            issue: issue.clone(),
            kind,
        }
    }

    /// One-line description for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        let item = self.issue.read().reference();
        match &self.kind {
            ActionKind::AddLabels(labels) => format!("Add labels [{}] to {item}", labels.join(", ")),
            ActionKind::RemoveLabels(labels) => {
                format!("Remove labels [{}] from {item}", labels.join(", "))
            }
            ActionKind::SetLabels(labels) => {
                format!("Set labels of {item} to [{}]", labels.join(", "))
            }
            ActionKind::AddComment { slug, .. } => format!("Add comment \"{slug}\" to {item}"),
            ActionKind::Lock => format!("Lock {item}"),
            ActionKind::Unlock => format!("Unlock {item}"),
            ActionKind::Close => format!("Close {item}"),
            ActionKind::Reopen => format!("Reopen {item}"),
            ActionKind::SetColumn {
                project_id,
                column: Some(column),
            } => format!("Move {item} to column \"{column}\" of project {project_id}"),
            ActionKind::SetColumn {
                project_id,
                column: None,
            } => format!("Remove {item} from project {project_id}"),
            ActionKind::MergePr(options) => {
                format!("Merge {item} ({})", options.merge_method.as_str())
            }
        }
    }

    /// Whether the action would write anything. Only reads from GitHub.
    pub async fn should_apply(&self, session: &Session) -> Result<bool> {
        Ok(self.plan(session).await?.is_some())
    }

    /// Perform the action if needed. Returns whether a write happened.
    pub async fn apply(&self, session: &Session) -> Result<bool> {
        match self.plan(session).await? {
            Some(write) => {
                self.execute(write, session).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Diff the request against current state.
    pub(crate) async fn plan(&self, session: &Session) -> Result<Option<Write>> {
        let write = match &self.kind {
            ActionKind::AddLabels(labels) => {
                let current = self.issue.read().label_names();
                let missing: Vec<String> = dedup(labels)
                    .into_iter()
                    .filter(|l| !current.contains(l))
                    .collect();
                (!missing.is_empty()).then_some(Write::AddLabels(missing))
            }
            ActionKind::RemoveLabels(labels) => {
                let current = self.issue.read().label_names();
                let present: Vec<String> = dedup(labels)
                    .into_iter()
                    .filter(|l| current.contains(l))
                    .collect();
                (!present.is_empty()).then_some(Write::RemoveLabels(present))
            }
            ActionKind::SetLabels(labels) => {
                let current = sorted(self.issue.read().label_names());
                (sorted(labels.clone()) != current).then(|| Write::SetLabels(dedup(labels)))
            }
            ActionKind::AddComment { slug, body } => {
                let comments = session.comments(&self.issue).await?;
                let me = session.my_login().await?;
                match comment::plan_upsert(&comments, &me, slug, body) {
                    UpsertPlan::Unchanged(_) => None,
                    UpsertPlan::Edit(existing) => Some(Write::EditComment {
                        comment: existing,
                        text: comment::render(slug, body),
                    }),
                    UpsertPlan::Create => Some(Write::CreateComment(comment::render(slug, body))),
                }
            }
            ActionKind::Lock => (!self.issue.read().locked).then_some(Write::Lock),
            ActionKind::Unlock => self.issue.read().locked.then_some(Write::Unlock),
            ActionKind::Close => self
                .issue
                .read()
                .is_open()
                .then_some(Write::SetState(IssueState::Closed)),
            ActionKind::Reopen => (!self.issue.read().is_open())
                .then_some(Write::SetState(IssueState::Open)),
            ActionKind::SetColumn { project_id, column } => {
                board::plan(session, &self.issue, *project_id, column.as_deref())
                    .await?
                    .map(Write::Board)
            }
            ActionKind::MergePr(options) => self.plan_merge(session, options).await?,
        };
        Ok(write)
    }

    async fn plan_merge(&self, session: &Session, options: &MergeOptions) -> Result<Option<Write>> {
        let item = self.issue.read().reference();
        let merged = {
            let issue = self.issue.read();
            let details = issue
                .pull_request()
                .ok_or_else(|| PreconditionError::NotAPullRequest { item: item.clone() })?;
            details.merged
        };
        if merged {
            return Ok(None);
        }

        match session.mergeable(&self.issue).await? {
            Some(true) => {
                let mut options = options.clone();
                if options.sha.is_none() {
                    options.sha = self
                        .issue
                        .read()
                        .pull_request()
                        .map(|d| d.head.sha.clone())
                        .filter(|sha| !sha.is_empty());
                }
                Ok(Some(Write::Merge(options)))
            }
            Some(false) => {
                let state = self
                    .issue
                    .read()
                    .pull_request()
                    .and_then(|d| d.mergeable_state.clone());
                Err(PreconditionError::NotMergeable { item, state }.into())
            }
            None => Err(PreconditionError::MergeabilityUnknown { item }.into()),
        }
    }

    /// Send the write and fold the response back into the canonical issue.
    pub(crate) async fn execute(&self, write: Write, session: &Session) -> Result<()> {
        let client = session.client();
        let pools = session.pools();
        let (repo, number) = {
            let issue = self.issue.read();
            (issue.repo.clone(), issue.number)
        };

        match write {
            Write::AddLabels(labels) => {
                let now = client.add_labels(&repo, number, &labels).await?;
                self.issue.write().replace_labels(&now, pools);
            }
            Write::RemoveLabels(labels) => {
                for label in labels {
                    match client.remove_label(&repo, number, &label).await {
                        Ok(remaining) => self.issue.write().replace_labels(&remaining, pools),
                        // Someone else removed it first.
                        Err(e) if e.is_not_found() => {
                            self.issue.write().labels.retain(|l| l.read().name != label);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            Write::SetLabels(labels) => {
                let now = client.set_labels(&repo, number, &labels).await?;
                self.issue.write().replace_labels(&now, pools);
            }
            Write::CreateComment(text) => {
                let raw = client.create_comment(&repo, number, &text).await?;
                let created = pools.comments.ingest(&repo, &raw, pools);
                let mut issue = self.issue.write();
                issue.comment_count += 1;
                if let Some(comments) = issue.comments.as_mut() {
                    comments.push(created);
                }
            }
            Write::EditComment { comment, text } => {
                let id = comment.read().id;
                let raw = client.edit_comment(&repo, id, &text).await?;
                pools.comments.ingest(&repo, &raw, pools);
            }
            Write::Lock => {
                client.lock(&repo, number).await?;
                self.issue.write().locked = true;
            }
            Write::Unlock => {
                client.unlock(&repo, number).await?;
                self.issue.write().locked = false;
            }
            Write::SetState(state) => {
                let raw = client.set_state(&repo, number, state).await?;
                session.ingest(&repo, &IssuePayload::Issue(raw));
            }
            Write::Board(plan) => board::execute(session, &self.issue, plan).await?,
            Write::Merge(options) => {
                let result = client.merge_pull(&repo, number, &options).await?;
                tracing::debug!(sha = ?result.sha, message = %result.message, "Merge response");
                let mut issue = self.issue.write();
                if result.merged {
                    issue.state = IssueState::Closed;
                    if let Some(details) = issue.pull_request_mut() {
                        details.merged = true;
                        details.merged_at = Some(Utc::now());
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::http::HttpMethod;
    use crate::testing::{Fixture, comment_json, issue_json, label_json, pull_json};
    use serde_json::json;

    const ISSUE_1: &str = "https://api.test/repos/octo/bot/issues/1";

    fn labelled(labels: &[&str]) -> serde_json::Value {
        let mut issue = issue_json(1, "2024-01-01T00:00:00Z");
        issue["labels"] = json!(labels.iter().map(|l| label_json(l)).collect::<Vec<_>>());
        issue
    }

    #[tokio::test]
    async fn add_labels_writes_only_missing_delta() {
        let fx = Fixture::new();
        let issue = fx.issue(labelled(&["bug"]));
        fx.transport.push_json(
            HttpMethod::Post,
            format!("{ISSUE_1}/labels"),
            200,
            json!([label_json("bug"), label_json("triage")]),
        );

        let action = Action::new(&issue, ActionKind::AddLabels(vec!["bug".into(), "triage".into()]));
        assert!(action.apply(&fx.session).await.expect("apply"));

        let sent = &fx.transport.writes()[0];
        let body: serde_json::Value = serde_json::from_slice(&sent.body).expect("body");
        assert_eq!(body, json!({"labels": ["triage"]}));
        assert!(!action.should_apply(&fx.session).await.expect("second check"));
    }

    #[tokio::test]
    async fn set_labels_writes_once_then_never() {
        let fx = Fixture::new();
        let issue = fx.issue(labelled(&["a", "b"]));
        fx.transport.push_json(
            HttpMethod::Put,
            format!("{ISSUE_1}/labels"),
            200,
            json!([label_json("b"), label_json("c")]),
        );

        let action = Action::new(&issue, ActionKind::SetLabels(vec!["c".into(), "b".into()]));
        assert!(action.apply(&fx.session).await.expect("first"));
        assert!(!action.apply(&fx.session).await.expect("second"));
        assert_eq!(fx.transport.writes().len(), 1);
        assert_eq!(issue.read().label_names(), vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn set_labels_ignores_order() {
        let fx = Fixture::new();
        let issue = fx.issue(labelled(&["x", "y"]));
        let action = Action::new(&issue, ActionKind::SetLabels(vec!["y".into(), "x".into()]));
        assert!(!action.should_apply(&fx.session).await.expect("check"));
        assert!(fx.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn remove_labels_skips_absent_and_tolerates_races() {
        let fx = Fixture::new();
        let issue = fx.issue(labelled(&["stale", "gone"]));
        fx.transport.push_json(
            HttpMethod::Delete,
            format!("{ISSUE_1}/labels/stale"),
            200,
            json!([label_json("gone")]),
        );
        fx.transport.push_json(
            HttpMethod::Delete,
            format!("{ISSUE_1}/labels/gone"),
            404,
            json!({"message": "Label does not exist"}),
        );

        let action = Action::new(
            &issue,
            ActionKind::RemoveLabels(vec!["stale".into(), "gone".into(), "never".into()]),
        );
        action.apply(&fx.session).await.expect("apply");

        assert!(issue.read().labels.is_empty());
        assert_eq!(fx.transport.writes().len(), 2);
    }

    #[tokio::test]
    async fn lock_and_close_are_idempotent() {
        let fx = Fixture::new();
        let issue = fx.issue(issue_json(1, "2024-01-01T00:00:00Z"));
        fx.transport
            .push_json(HttpMethod::Put, format!("{ISSUE_1}/lock"), 204, json!(null));
        let mut closed = issue_json(1, "2024-01-02T00:00:00Z");
        closed["state"] = json!("closed");
        fx.transport.push_json(HttpMethod::Patch, ISSUE_1, 200, closed);

        for _ in 0..2 {
            Action::new(&issue, ActionKind::Lock)
                .apply(&fx.session)
                .await
                .expect("lock");
            Action::new(&issue, ActionKind::Close)
                .apply(&fx.session)
                .await
                .expect("close");
        }

        assert_eq!(fx.transport.writes().len(), 2);
        let issue = issue.read();
        assert!(issue.locked);
        assert_eq!(issue.state, IssueState::Closed);
        let patch = &fx.transport.writes()[1];
        assert_eq!(patch.body_text(), r#"{"state":"closed"}"#);
    }

    #[tokio::test]
    async fn unlock_and_reopen_skip_when_already_there() {
        let fx = Fixture::new();
        let issue = fx.issue(issue_json(1, "2024-01-01T00:00:00Z"));
        assert!(!Action::new(&issue, ActionKind::Unlock)
            .should_apply(&fx.session)
            .await
            .expect("unlock"));
        assert!(!Action::new(&issue, ActionKind::Reopen)
            .should_apply(&fx.session)
            .await
            .expect("reopen"));
    }

    #[tokio::test]
    async fn comment_upsert_creates_then_edits_then_rests() {
        let fx = Fixture::new();
        let issue = fx.issue(issue_json(1, "2024-01-01T00:00:00Z"));
        fx.expect_login("idembot");
        fx.transport.push_json(
            HttpMethod::Get,
            format!("{ISSUE_1}/comments?per_page=100&page=1"),
            200,
            json!([comment_json(10, "human", "first!")]),
        );
        let v1 = comment::render("status", "v1");
        fx.transport.push_json(
            HttpMethod::Post,
            format!("{ISSUE_1}/comments"),
            201,
            comment_json(11, "idembot", &v1),
        );
        let v2 = comment::render("status", "v2");
        fx.transport.push_json(
            HttpMethod::Patch,
            "https://api.test/repos/octo/bot/issues/comments/11",
            200,
            comment_json(11, "idembot", &v2),
        );

        let say = |body: &str| {
            Action::new(
                &issue,
                ActionKind::AddComment {
                    slug: "status".into(),
                    body: body.into(),
                },
            )
        };

        assert!(say("v1").apply(&fx.session).await.expect("create"));
        assert!(!say("v1").apply(&fx.session).await.expect("unchanged"));
        assert!(say("v2").apply(&fx.session).await.expect("edit"));
        assert!(!say("v2").apply(&fx.session).await.expect("settled"));

        let writes = fx.transport.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].method, HttpMethod::Post);
        assert_eq!(writes[1].method, HttpMethod::Patch);
        let posted: serde_json::Value = serde_json::from_slice(&writes[0].body).expect("body");
        assert_eq!(posted["body"], json!(v1));
    }

    #[tokio::test]
    async fn merge_requires_resolved_mergeability() {
        let fx = Fixture::new();
        let pr = fx.pull(pull_json(4, "2024-01-01T00:00:00Z", None));
        for _ in 0..5 {
            fx.transport.push_json(
                HttpMethod::Get,
                "https://api.test/repos/octo/bot/pulls/4",
                200,
                pull_json(4, "2024-01-01T00:00:00Z", None),
            );
        }

        let err = Action::new(&pr, ActionKind::MergePr(MergeOptions::default()))
            .apply(&fx.session)
            .await
            .expect_err("unknown mergeability");
        assert!(matches!(
            err,
            Error::Precondition(PreconditionError::MergeabilityUnknown { .. })
        ));
        assert_eq!(
            fx.transport
                .count(HttpMethod::Get, "https://api.test/repos/octo/bot/pulls/4"),
            5
        );
        assert!(fx.transport.writes().is_empty());
    }

    #[tokio::test]
    async fn merge_squashes_at_head_sha_once() {
        let fx = Fixture::new();
        let pr = fx.pull(pull_json(4, "2024-01-01T00:00:00Z", Some(true)));
        fx.transport.push_json(
            HttpMethod::Put,
            "https://api.test/repos/octo/bot/pulls/4/merge",
            200,
            json!({"sha": "merged", "merged": true, "message": "Pull Request successfully merged"}),
        );

        let merge = Action::new(&pr, ActionKind::MergePr(MergeOptions::default()));
        assert!(merge.apply(&fx.session).await.expect("merge"));
        assert!(!merge.apply(&fx.session).await.expect("already merged"));

        let writes = fx.transport.writes();
        assert_eq!(writes.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&writes[0].body).expect("body");
        assert_eq!(body, json!({"merge_method": "squash", "sha": "headsha"}));
    }

    #[tokio::test]
    async fn merge_of_conflicted_pull_is_refused() {
        let fx = Fixture::new();
        let pr = fx.pull(pull_json(6, "2024-01-01T00:00:00Z", Some(false)));
        let err = Action::new(&pr, ActionKind::MergePr(MergeOptions::default()))
            .should_apply(&fx.session)
            .await
            .expect_err("not mergeable");
        match err {
            Error::Precondition(PreconditionError::NotMergeable { state, .. }) => {
                assert_eq!(state.as_deref(), Some("dirty"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn summaries_name_the_item() {
        let fx = Fixture::new();
        let issue = fx.issue(issue_json(1, "2024-01-01T00:00:00Z"));
        let action = Action::new(
            &issue,
            ActionKind::SetColumn {
                project_id: 9,
                column: Some("Done".into()),
            },
        );
        assert_eq!(action.summary(), "Move octo/bot#1 to column \"Done\" of project 9");
        assert_eq!(
            Action::new(&issue, ActionKind::Close).summary(),
            "Close octo/bot#1"
        );
    }
}
