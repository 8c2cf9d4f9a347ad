use std::sync::Arc;
use std::time::Duration;

use idembot::github::short_error_message;
use idembot::{
    Bot, FailurePolicy, GitHubClient, IssueRef, PassReport, Query, RepoTarget, ReqwestTransport,
    RuleRegistry, Session, SessionOptions, SnapshotStore,
};

use crate::Cli;
use crate::config::Config;
use crate::progress::ProgressReporter;
use crate::setup::SetupFile;
use crate::shutdown::is_shutdown_requested;

/// One unit of work: a set of items the rules run over, followed by a drain.
enum Pass {
    Single(IssueRef),
    Query(Query),
    Changed(RepoTarget),
}

impl Pass {
    fn describe(&self) -> String {
        match self {
            Pass::Single(item) => item.to_string(),
            Pass::Query(query) => format!("query on {}", query.repo()),
            Pass::Changed(target) => target.repo.to_string(),
        }
    }
}

#[derive(Default)]
struct Totals {
    passes: usize,
    failed_passes: usize,
    items: usize,
    rule_failures: usize,
    executed: usize,
    skipped: usize,
    action_failures: usize,
}

impl Totals {
    fn add(&mut self, report: &PassReport) {
        self.items += report.items;
        self.rule_failures += report.rule_failures;
        self.executed += report.drain.executed.len();
        self.skipped += report.drain.skipped.len();
        self.action_failures += report.drain.failures.len();
    }
}

/// Run the selected rules over a single item, a list of queries, or every
/// configured repository's changed items.
pub async fn handle_run(
    cli: &Cli,
    config: &Config,
    setup: Option<SetupFile>,
    registry: RuleRegistry,
) -> Result<(), Box<dyn std::error::Error>> {
    // Parse every query before touching the network.
    let mut queries = Vec::with_capacity(cli.query.len());
    for path in &cli.query {
        let query = Query::load(path)
            .await
            .map_err(|e| format!("Error parsing query file {}: {e}", path.display()))?;
        queries.push(query);
    }

    let passes: Vec<Pass> = if let Some(single) = &cli.single {
        vec![Pass::Single(single.clone())]
    } else if !queries.is_empty() {
        queries.into_iter().map(Pass::Query).collect()
    } else {
        let repos = setup.as_ref().map(|s| s.repos.clone()).unwrap_or_default();
        if repos.is_empty() {
            return Err(format!(
                "No repositories configured in {}. Add [[repos]] entries, or pass --single or --query.",
                cli.file.display()
            )
            .into());
        }
        repos.into_iter().map(Pass::Changed).collect()
    };

    let token = config.github_token().ok_or(
        "No GitHub token found. Set IDEMBOT_GITHUB_TOKEN (or AUTH_TOKEN), or add github.token to your config file.",
    )?;

    let cache_root = config
        .cache_root(setup.is_some().then_some(cli.file.as_path()))
        .ok_or("Could not determine a cache directory. Set cache.root in your config file.")?;
    tracing::debug!("Using snapshot cache at {}", cache_root.display());

    let transport = ReqwestTransport::with_timeout(Duration::from_secs(30))?;
    let client = GitHubClient::new_with_transport(config.api_url(), &token, Arc::new(transport))?;

    let options = SessionOptions {
        dry_run: cli.dry,
        failure_policy: if cli.keep_going {
            FailurePolicy::Continue
        } else {
            config.run.policy
        },
        poll: config.poll_config(),
    };

    let reporter = Arc::new(ProgressReporter::new());
    let session = Session::new(client, SnapshotStore::new(&cache_root), options)
        .with_progress(reporter.as_callback());
    let bot = Bot::new(session, registry);

    let mut totals = Totals::default();
    for pass in &passes {
        if is_shutdown_requested() {
            tracing::warn!("Shutdown requested, skipping remaining passes");
            break;
        }

        totals.passes += 1;
        let result = match pass {
            Pass::Single(item) => bot.run_single(item).await,
            Pass::Query(query) => bot.run_query(query).await,
            Pass::Changed(target) => bot.run_changed(target).await,
        };

        match result {
            Ok(report) => totals.add(&report),
            Err(e) => {
                totals.failed_passes += 1;
                tracing::error!(pass = %pass.describe(), error = %e, "Pass failed");
                let message = match e.root() {
                    idembot::Error::GitHub(gh) => short_error_message(gh),
                    other => other.to_string(),
                };
                reporter.println(&format!("✗ {}: {message}", pass.describe()));

                if let idembot::Error::GitHub(gh) = e.root()
                    && gh.is_rate_limited()
                {
                    let resets = bot
                        .session()
                        .client()
                        .rate_limit()
                        .and_then(|quota| quota.reset_at)
                        .map(|at| format!(" (resets at {at})"))
                        .unwrap_or_default();
                    tracing::warn!("GitHub rate limit exhausted{resets}, stopping");
                    break;
                }
            }
        }
    }
    reporter.finish();

    let verb = if cli.dry { "would change" } else { "changed" };
    reporter.println(&format!(
        "\n{} items checked, {} {verb}, {} already in place",
        totals.items, totals.executed, totals.skipped
    ));
    if totals.rule_failures > 0 || totals.action_failures > 0 {
        reporter.println(&format!(
            "{} rule errors, {} failed actions",
            totals.rule_failures, totals.action_failures
        ));
    }

    if let Some(quota) = bot.session().client().rate_limit() {
        tracing::info!(
            remaining = quota.remaining,
            limit = quota.limit,
            "GitHub rate limit"
        );
    }

    if totals.failed_passes > 0 {
        return Err(format!("{} of {} passes failed", totals.failed_passes, totals.passes).into());
    }
    Ok(())
}
