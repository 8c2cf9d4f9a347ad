//! Idembot - an idempotent rule bot for GitHub issues and pull requests.
//!
//! The bot mirrors a repository's issues and pull requests into a local
//! snapshot store, hands canonical objects to user rules, and turns the
//! actions those rules enqueue into the smallest set of writes that brings
//! GitHub to the requested state. Running the same rules twice writes
//! nothing the second time.
//!
//! # Example
//!
//! ```ignore
//! use idembot::{Bot, GitHubClient, RepoTarget, RuleRegistry, RuleTarget, Session, SnapshotStore};
//!
//! let client = GitHubClient::new(&token)?;
//! let session = Session::new(client, SnapshotStore::new("cache"), Default::default());
//!
//! let mut rules = RuleRegistry::new();
//! rules.register("needs-triage", RuleTarget::Issues, |item: &Handle<Issue>, ctx: &RuleContext<'_>| {
//!     if item.read().labels.is_empty() {
//!         ctx.queue().add_labels(item, ["needs-triage"]);
//!     }
//!     Ok(())
//! });
//!
//! let bot = Bot::new(session, rules);
//! bot.run_changed(&RepoTarget::new("octo/bot".parse()?)).await?;
//! ```

pub mod action;
pub mod comment;
pub mod entity;
pub mod error;
pub mod github;
pub mod http;
pub mod poll;
pub mod pool;
pub mod progress;
pub mod query;
pub mod rules;
pub mod runner;
pub mod session;
pub mod snapshot;
pub mod sync;

#[cfg(test)]
mod testing;

pub use action::{Action, ActionKind, ActionQueue, ChangeObserver, DrainReport, drain};
pub use entity::{Comment, Issue, IssueKind, IssueRef, Label, Milestone, RepoRef, User};
pub use error::{Error, PreconditionError, Result};
pub use github::{GitHubClient, GitHubError, MergeMethod, MergeOptions, RateLimitInfo};
pub use http::{HttpTransport, ReqwestTransport};
pub use poll::PollConfig;
pub use pool::Handle;
pub use progress::{ProgressCallback, RunProgress};
pub use query::{Query, QueryError};
pub use rules::{Rule, RuleContext, RuleError, RuleRegistry, RuleTarget};
pub use runner::{Bot, PassReport, RepoTarget};
pub use session::{FailurePolicy, Session, SessionOptions};
pub use snapshot::{SnapshotError, SnapshotStore};
pub use sync::{IssueFilter, SyncOutcome, sync_repo};
