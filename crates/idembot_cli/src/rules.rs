//! Rules compiled into the `idembot` binary.

use async_trait::async_trait;
use idembot::{
    Handle, Issue, MergeMethod, MergeOptions, RuleContext, RuleError, RuleRegistry, RuleTarget,
};

use crate::setup::RuleSettings;

/// Build the built-in rule set.
pub fn builtin(settings: &RuleSettings) -> RuleRegistry {
    let mut rules = RuleRegistry::new();

    let triage = settings.triage_label.clone();
    rules.register(
        "needs-triage",
        RuleTarget::Issues,
        move |item: &Handle<Issue>, ctx: &RuleContext<'_>| {
            let unlabeled = {
                let issue = item.read();
                issue.is_open() && issue.labels.is_empty()
            };
            if unlabeled {
                ctx.queue().add_labels(item, [triage.as_str()]);
            }
            Ok(())
        },
    );

    let triage = settings.triage_label.clone();
    rules.register(
        "triaged",
        RuleTarget::Issues,
        move |item: &Handle<Issue>, ctx: &RuleContext<'_>| {
            let triaged = {
                let issue = item.read();
                issue.has_label(&triage) && issue.labels.len() > 1
            };
            if triaged {
                ctx.queue().remove_labels(item, [triage.as_str()]);
            }
            Ok(())
        },
    );

    rules.register(
        "pr-summary",
        RuleTarget::PullRequests,
        |item: &Handle<Issue>, ctx: &RuleContext<'_>| {
            let body = {
                let issue = item.read();
                match issue.pull_request() {
                    Some(pr) if issue.is_open() => Some(summary_comment(
                        pr.changed_files,
                        pr.additions,
                        pr.deletions,
                        pr.commits,
                    )),
                    _ => None,
                }
            };
            if let Some(body) = body {
                ctx.queue().add_comment(item, "pr-summary", body);
            }
            Ok(())
        },
    );

    rules.register(
        "automerge",
        RuleTarget::PullRequests,
        AutoMerge {
            label: settings.automerge_label.clone(),
            method: settings.merge_method,
        },
    );

    if let Some(project) = settings.project {
        let column = settings.project_column.clone();
        rules.register(
            "project-board",
            RuleTarget::IssuesAndPullRequests,
            move |item: &Handle<Issue>, ctx: &RuleContext<'_>| {
                let open = item.read().is_open();
                let target = open.then_some(column.as_str());
                ctx.queue().set_column(item, project, target);
                Ok(())
            },
        );
    }

    rules
}

fn summary_comment(files: u64, additions: u64, deletions: u64, commits: u64) -> String {
    let plural = |n: u64, word: &str| {
        if n == 1 {
            format!("{n} {word}")
        } else {
            format!("{n} {word}s")
        }
    };
    format!(
        "This pull request changes {} (+{additions} -{deletions}) in {}.",
        plural(files, "file"),
        plural(commits, "commit"),
    )
}

/// Merges labeled pull requests once their combined status is green.
struct AutoMerge {
    label: String,
    method: MergeMethod,
}

#[async_trait]
impl idembot::Rule for AutoMerge {
    async fn evaluate(&self, item: &Handle<Issue>, ctx: &RuleContext<'_>) -> Result<(), RuleError> {
        let wanted = {
            let issue = item.read();
            issue.is_open()
                && issue.has_label(&self.label)
                && issue.pull_request().is_some_and(|pr| !pr.draft && !pr.merged)
        };
        if !wanted {
            return Ok(());
        }

        let status = ctx.combined_status(item).await?;
        if status.state != "success" {
            tracing::debug!(
                item = %item.read().reference(),
                state = %status.state,
                "Checks not green yet"
            );
            return Ok(());
        }

        ctx.queue().merge(
            item,
            MergeOptions {
                merge_method: self.method,
                ..MergeOptions::default()
            },
        );
        Ok(())
    }
}
