//! The bot's run loop.
//!
//! A run is a sequence of passes. Each pass collects a set of items (the most
//! recently updated page of a repository, one named item, or the result of a
//! query), runs every matching rule over each item, then drains the action
//! queue once.

use serde::Deserialize;

use crate::action::{DrainReport, drain};
use crate::entity::{Issue, IssueRef, RepoRef};
use crate::error::Result;
use crate::github::PAGE_SIZE;
use crate::github::types::{ListIssuesParams, ListPullsParams};
use crate::pool::Handle;
use crate::progress::RunProgress;
use crate::query::Query;
use crate::rules::{RuleContext, RuleRegistry};
use crate::session::Session;
use crate::sync::{IssueFilter, sync_repo};

/// A repository whose recently changed items the bot visits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoTarget {
    pub repo: RepoRef,
    #[serde(default)]
    pub filter: IssueFilter,
}

impl RepoTarget {
    pub fn new(repo: RepoRef) -> Self {
        Self {
            repo,
            filter: IssueFilter::default(),
        }
    }
}

/// Outcome of one pass.
#[derive(Debug, Default)]
pub struct PassReport {
    pub repo: Option<RepoRef>,
    /// Items the rules were run over.
    pub items: usize,
    /// Rule invocations that returned an error.
    pub rule_failures: usize,
    pub drain: DrainReport,
}

#[derive(Debug)]
pub struct Bot {
    session: Session,
    rules: RuleRegistry,
}

impl Bot {
    pub fn new(session: Session, rules: RuleRegistry) -> Self {
        Self { session, rules }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    /// Sync a repository, then run the rules over its most recently updated
    /// page.
    ///
    /// The page is taken as listed, whether or not sync found its snapshots
    /// current, so actions skipped by a dry run or a failed drain are tried
    /// again next time.
    pub async fn run_changed(&self, target: &RepoTarget) -> Result<PassReport> {
        let outcome = sync_repo(&self.session, &target.repo, &target.filter).await?;
        tracing::info!(
            repo = %target.repo,
            changed = outcome.refreshed.len(),
            recent = outcome.recent.len(),
            "Fetched changed issues and pull requests"
        );
        let mut items = Vec::with_capacity(outcome.recent.len());
        for &(number, updated_at) in &outcome.recent {
            items.push(
                self.session
                    .issue_fresh(&target.repo, number, updated_at)
                    .await?,
            );
        }
        self.run_pass(&target.repo, &items).await
    }

    /// Fetch one item fresh from GitHub and run the rules over it.
    pub async fn run_single(&self, item: &IssueRef) -> Result<PassReport> {
        let issue = self.session.fetch_issue(&item.repo, item.number).await?;
        self.run_pass(&item.repo, &[issue]).await
    }

    pub async fn run_query(&self, query: &Query) -> Result<PassReport> {
        let items = self.collect(query).await?;
        tracing::info!(repo = %query.repo(), items = items.len(), "Query matched");
        self.run_pass(query.repo(), &items).await
    }

    /// Page through a query's listing until its count is reached. Items are
    /// resolved through the session so current snapshots are reused.
    async fn collect(&self, query: &Query) -> Result<Vec<Handle<Issue>>> {
        let repo = query.repo();
        let count = query.count();
        let mut items = Vec::new();
        let mut page = 1;

        loop {
            let listed: Vec<(u64, chrono::DateTime<chrono::Utc>)> = match query {
                Query::Prs(q) => {
                    let params = ListPullsParams {
                        sort: q.sort,
                        direction: q.direction,
                        state: q.state,
                        page,
                    };
                    self.session
                        .client()
                        .list_pulls(repo, &params)
                        .await?
                        .iter()
                        .map(|pr| (pr.number, pr.updated_at))
                        .collect()
                }
                Query::Issues(q) => {
                    let params = ListIssuesParams {
                        sort: q.sort,
                        direction: q.direction,
                        state: q.state,
                        labels: q.labels.clone(),
                        page,
                    };
                    self.session
                        .client()
                        .list_issues(repo, &params)
                        .await?
                        .iter()
                        .map(|issue| (issue.number, issue.updated_at))
                        .collect()
                }
            };

            let short = listed.len() < PAGE_SIZE as usize;
            for (number, updated_at) in listed {
                let item = match query {
                    Query::Prs(_) => self.session.pull_fresh(repo, number, updated_at).await?,
                    Query::Issues(_) => self.session.issue_fresh(repo, number, updated_at).await?,
                };
                items.push(item);
                if count.reached(items.len()) {
                    return Ok(items);
                }
            }
            if short {
                return Ok(items);
            }
            page += 1;
        }
    }

    /// Run every matching rule over `items`, then drain the queue.
    ///
    /// Rule errors are logged and counted; they never stop the pass. Drain
    /// errors (under fail-fast) do.
    pub async fn run_pass(&self, repo: &RepoRef, items: &[Handle<Issue>]) -> Result<PassReport> {
        self.session.emit(RunProgress::EvaluatingRules {
            repo: repo.to_string(),
            items: items.len(),
            rules: self.rules.len(),
        });

        let ctx = RuleContext::new(&self.session);
        let mut rule_failures = 0;
        for item in items {
            let (reference, title) = {
                let issue = item.read();
                (issue.reference(), issue.title.clone())
            };
            tracing::debug!("Invoking rules on {reference}: {title}");

            let matching = self.rules.matching(&item.read());
            for (name, rule) in matching {
                if let Err(e) = rule.evaluate(item, &ctx).await {
                    let url = item.read().html_url.clone();
                    tracing::error!(
                        rule = name,
                        item = %reference,
                        error = %e,
                        "Rule {name} encountered an error running on {url}"
                    );
                    self.session.emit(RunProgress::RuleFailed {
                        rule: name.to_string(),
                        item: reference.clone(),
                        url,
                        error: e.to_string(),
                    });
                    rule_failures += 1;
                }
            }
        }

        let drain = drain(&self.session).await?;
        Ok(PassReport {
            repo: Some(repo.clone()),
            items: items.len(),
            rule_failures,
            drain,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use crate::query::parse_query;
    use crate::rules::{RuleError, RuleTarget};
    use crate::testing::{self, Fixture, issue_json, label_json, pull_json};
    use serde_json::json;

    const ISSUE_1: &str = "https://api.test/repos/octo/bot/issues/1";

    fn triage_rules() -> RuleRegistry {
        let mut rules = RuleRegistry::new();
        rules
            .register(
                "explode",
                RuleTarget::IssuesAndPullRequests,
                |_: &Handle<Issue>, _: &RuleContext<'_>| Err(RuleError::new("boom")),
            )
            .register(
                "triage",
                RuleTarget::Issues,
                |item: &Handle<Issue>, ctx: &RuleContext<'_>| {
                    if item.read().labels.is_empty() {
                        ctx.queue().add_labels(item, ["needs-triage"]);
                    }
                    Ok(())
                },
            );
        rules
    }

    #[tokio::test]
    async fn rule_errors_do_not_stop_the_pass() {
        let fx = Fixture::new().into_bot(triage_rules());
        fx.transport
            .push_json(HttpMethod::Get, ISSUE_1, 200, issue_json(1, "2024-01-01T00:00:00Z"));
        fx.transport.push_json(
            HttpMethod::Post,
            format!("{ISSUE_1}/labels"),
            200,
            json!([label_json("needs-triage")]),
        );

        let single = "octo/bot#1".parse().expect("issue ref");
        let report = fx.bot.run_single(&single).await.expect("run");

        assert_eq!(report.items, 1);
        assert_eq!(report.rule_failures, 1);
        assert_eq!(report.drain.executed.len(), 1);
        assert_eq!(fx.transport.writes().len(), 1);
    }

    #[tokio::test]
    async fn changed_items_pass_covers_the_whole_recent_page() {
        let fx = Fixture::new().into_bot(triage_rules());
        fx.seed_issue(1, "2024-01-01T00:00:00Z", "2024-01-02T00:00:00Z")
            .await;
        fx.transport.push_json(
            HttpMethod::Get,
            "https://api.test/repos/octo/bot/issues?sort=updated&direction=desc&filter=all&state=all&per_page=100&page=1",
            200,
            json!([
                issue_json(2, "2024-02-01T00:00:00Z"),
                issue_json(1, "2024-01-01T00:00:00Z"),
            ]),
        );
        for n in [2, 1] {
            fx.transport.push_json(
                HttpMethod::Post,
                format!("https://api.test/repos/octo/bot/issues/{n}/labels"),
                200,
                json!([label_json("needs-triage")]),
            );
        }

        let report = fx
            .bot
            .run_changed(&RepoTarget::new(testing::repo()))
            .await
            .expect("run");
        // #1's snapshot is current, so only #2 is fetched, yet both are
        // handed to the rules.
        assert_eq!(report.items, 2);
        assert_eq!(
            report.drain.executed,
            vec![
                "Add labels [needs-triage] to octo/bot#2".to_string(),
                "Add labels [needs-triage] to octo/bot#1".to_string(),
            ]
        );
        let reads: Vec<_> = fx
            .transport
            .requests()
            .into_iter()
            .filter(|r| r.method == HttpMethod::Get)
            .collect();
        assert_eq!(reads.len(), 1);
    }

    #[tokio::test]
    async fn pull_query_stops_at_count() {
        let fx = Fixture::new().into_bot(RuleRegistry::new());
        let list = "https://api.test/repos/octo/bot/pulls?sort=updated&state=open&direction=desc&per_page=100&page=1";
        fx.transport.push_json(
            HttpMethod::Get,
            list,
            200,
            json!([
                pull_json(3, "2024-01-03T00:00:00Z", Some(true)),
                pull_json(2, "2024-01-02T00:00:00Z", Some(true)),
                pull_json(1, "2024-01-01T00:00:00Z", Some(true)),
            ]),
        );
        for n in [3, 2] {
            fx.transport.push_json(
                HttpMethod::Get,
                format!("https://api.test/repos/octo/bot/pulls/{n}"),
                200,
                pull_json(n, &format!("2024-01-0{n}T00:00:00Z"), Some(true)),
            );
        }

        let query = parse_query(&json!({
            "kind": "prs",
            "repo": "octo/bot",
            "sort": "updated",
            "count": 2
        }))
        .expect("query");
        let report = fx.bot.run_query(&query).await.expect("run");

        assert_eq!(report.items, 2);
        // One listing, then one pulls fetch per item.
        assert_eq!(fx.transport.requests().len(), 3);
        assert!(
            fx.transport
                .requests()
                .iter()
                .all(|r| !r.url.contains("/issues/"))
        );
    }

    #[tokio::test]
    async fn query_reuses_current_snapshots() {
        let fx = Fixture::new().into_bot(RuleRegistry::new());
        fx.seed_pull(7, "2024-01-01T00:00:00Z", "2024-01-05T00:00:00Z")
            .await;
        fx.transport.push_json(
            HttpMethod::Get,
            "https://api.test/repos/octo/bot/pulls?sort=created&state=open&direction=desc&per_page=100&page=1",
            200,
            json!([pull_json(7, "2024-01-01T00:00:00Z", None)]),
        );

        let query = parse_query(&json!({"kind": "prs", "repo": "octo/bot"})).expect("query");
        let report = fx.bot.run_query(&query).await.expect("run");

        assert_eq!(report.items, 1);
        assert_eq!(fx.transport.requests().len(), 1);
    }
}
