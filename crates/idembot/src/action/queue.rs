//! The per-session action queue and its executor.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{Action, ActionKind};
use crate::entity::Issue;
use crate::error::{Error, Result};
use crate::github::types::MergeOptions;
use crate::pool::Handle;
use crate::progress::RunProgress;
use crate::rules::RuleError;
use crate::session::{FailurePolicy, Session};

/// Callback run around an action's write.
///
/// Observers only run when a write actually happens: never for no-op
/// actions and never in dry runs. A failing observer is logged and does not
/// stop the drain.
#[async_trait]
pub trait ChangeObserver: Send + Sync {
    async fn notify(&self, issue: &Handle<Issue>) -> Result<(), RuleError>;
}

#[async_trait]
impl<F> ChangeObserver for F
where
    F: Fn(&Handle<Issue>) -> Result<(), RuleError> + Send + Sync,
{
    async fn notify(&self, issue: &Handle<Issue>) -> Result<(), RuleError> {
        self(issue)
    }
}

struct QueuedAction {
    id: u64,
    action: Action,
    before: Vec<Box<dyn ChangeObserver>>,
    after: Vec<Box<dyn ChangeObserver>>,
}

/// FIFO of pending actions.
#[derive(Default)]
pub struct ActionQueue {
    entries: Mutex<VecDeque<QueuedAction>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionQueue")
            .field("pending", &self.len())
            .finish()
    }
}

/// Returned by [`ActionQueue::enqueue`] to attach observers.
pub struct ActionHandle<'q> {
    queue: &'q ActionQueue,
    id: u64,
}

impl ActionHandle<'_> {
    /// Run `observer` right before the write.
    pub fn on_before_change(self, observer: impl ChangeObserver + 'static) -> Self {
        self.queue.attach(self.id, Box::new(observer), true);
        self
    }

    /// Run `observer` after the write succeeded.
    pub fn on_changed(self, observer: impl ChangeObserver + 'static) -> Self {
        self.queue.attach(self.id, Box::new(observer), false);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<QueuedAction>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, action: Action) -> ActionHandle<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(action = %action.summary(), "Queued action");
        self.entries().push_back(QueuedAction {
            id,
            action,
            before: Vec::new(),
            after: Vec::new(),
        });
        ActionHandle { queue: self, id }
    }

    fn attach(&self, id: u64, observer: Box<dyn ChangeObserver>, before: bool) {
        let mut entries = self.entries();
        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) if before => entry.before.push(observer),
            Some(entry) => entry.after.push(observer),
            None => tracing::debug!(id, "Action already drained; observer dropped"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Summaries of pending actions, in execution order.
    pub fn summaries(&self) -> Vec<String> {
        self.entries().iter().map(|e| e.action.summary()).collect()
    }

    /// Drop every pending action. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries();
        let dropped = entries.len();
        entries.clear();
        dropped
    }

    fn pop(&self) -> Option<QueuedAction> {
        self.entries().pop_front()
    }

    // ---------- conveniences ----------

    pub fn add_labels<S: Into<String>>(
        &self,
        issue: &Handle<Issue>,
        labels: impl IntoIterator<Item = S>,
    ) -> ActionHandle<'_> {
        let labels = labels.into_iter().map(Into::into).collect();
        self.enqueue(Action::new(issue, ActionKind::AddLabels(labels)))
    }

    pub fn remove_labels<S: Into<String>>(
        &self,
        issue: &Handle<Issue>,
        labels: impl IntoIterator<Item = S>,
    ) -> ActionHandle<'_> {
        let labels = labels.into_iter().map(Into::into).collect();
        self.enqueue(Action::new(issue, ActionKind::RemoveLabels(labels)))
    }

    pub fn set_labels<S: Into<String>>(
        &self,
        issue: &Handle<Issue>,
        labels: impl IntoIterator<Item = S>,
    ) -> ActionHandle<'_> {
        let labels = labels.into_iter().map(Into::into).collect();
        self.enqueue(Action::new(issue, ActionKind::SetLabels(labels)))
    }

    pub fn add_comment(
        &self,
        issue: &Handle<Issue>,
        slug: impl Into<String>,
        body: impl Into<String>,
    ) -> ActionHandle<'_> {
        self.enqueue(Action::new(
            issue,
            ActionKind::AddComment {
                slug: slug.into(),
                body: body.into(),
            },
        ))
    }

    pub fn lock(&self, issue: &Handle<Issue>) -> ActionHandle<'_> {
        self.enqueue(Action::new(issue, ActionKind::Lock))
    }

    pub fn unlock(&self, issue: &Handle<Issue>) -> ActionHandle<'_> {
        self.enqueue(Action::new(issue, ActionKind::Unlock))
    }

    pub fn close(&self, issue: &Handle<Issue>) -> ActionHandle<'_> {
        self.enqueue(Action::new(issue, ActionKind::Close))
    }

    pub fn reopen(&self, issue: &Handle<Issue>) -> ActionHandle<'_> {
        self.enqueue(Action::new(issue, ActionKind::Reopen))
    }

    pub fn set_column(
        &self,
        issue: &Handle<Issue>,
        project_id: u64,
        column: Option<&str>,
    ) -> ActionHandle<'_> {
        self.enqueue(Action::new(
            issue,
            ActionKind::SetColumn {
                project_id,
                column: column.map(str::to_string),
            },
        ))
    }

    pub fn merge(&self, issue: &Handle<Issue>, options: MergeOptions) -> ActionHandle<'_> {
        self.enqueue(Action::new(issue, ActionKind::MergePr(options)))
    }
}

#[derive(Debug)]
pub struct ActionFailure {
    pub summary: String,
    pub error: Error,
}

/// What one drain did.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub dry_run: bool,
    /// Actions that wrote, or in a dry run would have written.
    pub executed: Vec<String>,
    /// Actions whose target state already held.
    pub skipped: Vec<String>,
    /// Failures recorded under [`FailurePolicy::Continue`].
    pub failures: Vec<ActionFailure>,
}

enum Outcome {
    Executed,
    Skipped,
}

/// Execute every queued action in FIFO order.
///
/// Under [`FailurePolicy::FailFast`] the first failure discards the rest of
/// the queue and is returned as [`Error::Action`].
pub async fn drain(session: &Session) -> Result<DrainReport> {
    let dry_run = session.options().dry_run;
    let policy = session.options().failure_policy;
    let queue = session.queue();
    let mut report = DrainReport {
        dry_run,
        ..DrainReport::default()
    };

    while let Some(entry) = queue.pop() {
        let summary = entry.action.summary();
        match run(session, &entry, &summary, dry_run).await {
            Ok(Outcome::Executed) => report.executed.push(summary),
            Ok(Outcome::Skipped) => {
                session.emit(RunProgress::ActionSkipped {
                    summary: summary.clone(),
                });
                report.skipped.push(summary);
            }
            Err(error) => {
                tracing::error!(action = %summary, error = %error, "Action failed");
                session.emit(RunProgress::ActionFailed {
                    summary: summary.clone(),
                    error: error.to_string(),
                });
                match policy {
                    FailurePolicy::FailFast => {
                        let dropped = queue.clear();
                        if dropped > 0 {
                            tracing::warn!(dropped, "Discarding remaining actions");
                        }
                        return Err(Error::Action {
                            summary,
                            source: Box::new(error),
                        });
                    }
                    FailurePolicy::Continue => report.failures.push(ActionFailure { summary, error }),
                }
            }
        }
    }

    session.emit(RunProgress::DrainComplete {
        executed: report.executed.len(),
        skipped: report.skipped.len(),
        failed: report.failures.len(),
        dry_run,
    });
    Ok(report)
}

async fn run(session: &Session, entry: &QueuedAction, summary: &str, dry_run: bool) -> Result<Outcome> {
    let Some(write) = entry.action.plan(session).await? else {
        tracing::debug!(action = %summary, "Already in desired state");
        return Ok(Outcome::Skipped);
    };

    session.emit(RunProgress::ActionStarted {
        summary: summary.to_string(),
        dry_run,
    });
    if dry_run {
        tracing::info!("Execute action: {summary} (dry)");
        return Ok(Outcome::Executed);
    }

    tracing::info!("Execute action: {summary}");
    notify_all(&entry.before, &entry.action.issue, summary).await;
    entry.action.execute(write, session).await?;
    notify_all(&entry.after, &entry.action.issue, summary).await;
    Ok(Outcome::Executed)
}

async fn notify_all(observers: &[Box<dyn ChangeObserver>], issue: &Handle<Issue>, summary: &str) {
    for observer in observers {
        if let Err(e) = observer.notify(issue).await {
            tracing::warn!(action = %summary, error = %e, "Change observer failed");
        }
    }
}
