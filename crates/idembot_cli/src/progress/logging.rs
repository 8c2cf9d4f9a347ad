use idembot::RunProgress;

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, event: RunProgress) {
        match event {
            RunProgress::SyncStarted { repo } => {
                tracing::info!(repo = %repo, "Syncing changed issues and pull requests");
            }

            RunProgress::CacheCurrent { repo, refreshed } => {
                tracing::debug!(repo = %repo, refreshed, "Reached an up-to-date snapshot");
            }

            RunProgress::FullFetchStarted { repo } => {
                tracing::info!(repo = %repo, "No up-to-date snapshot found, fetching everything");
            }

            RunProgress::FullFetchPage { repo, page, count } => {
                tracing::debug!(repo = %repo, page, count, "Fetched page");
            }

            RunProgress::SyncComplete {
                repo,
                refreshed,
                full_fetch,
            } => {
                tracing::info!(repo = %repo, refreshed, full_fetch, "Sync complete");
            }

            RunProgress::EvaluatingRules { repo, items, rules } => {
                tracing::info!(repo = %repo, items, rules, "Evaluating rules");
            }

            // The library already logs rule errors and executed actions.
            RunProgress::RuleFailed { .. } | RunProgress::ActionStarted { .. } => {}

            RunProgress::ActionSkipped { summary } => {
                tracing::debug!(action = %summary, "Already in place");
            }

            RunProgress::ActionFailed { summary, error } => {
                tracing::warn!(action = %summary, error = %error, "Action failed");
            }

            RunProgress::DrainComplete {
                executed,
                skipped,
                failed,
                dry_run,
            } => {
                tracing::info!(executed, skipped, failed, dry_run, "Actions drained");
            }

            RunProgress::PollingMergeable { item, attempt } => {
                tracing::debug!(item = %item, attempt, "Waiting for mergeability");
            }

            _ => {
                tracing::debug!(?event, "Progress event");
            }
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}
