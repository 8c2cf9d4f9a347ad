use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use idembot::RunProgress;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Mutable progress state, kept under one lock.
#[derive(Default)]
struct ProgressState {
    /// One bar per repository, keyed by `owner/name`.
    bars: HashMap<String, ProgressBar>,
    /// Repository whose actions are draining.
    current: Option<String>,
}

/// Interactive progress reporter using indicatif.
///
/// Each repository pass gets a spinner that walks through syncing, rule
/// evaluation and draining, then finishes with the drain totals. Executed
/// actions and failures are printed above the bars.
pub struct InteractiveReporter {
    multi: MultiProgress,
    state: Mutex<ProgressState>,
}

impl InteractiveReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            state: Mutex::new(ProgressState::default()),
        }
    }

    pub fn handle(&self, event: RunProgress) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        match event {
            RunProgress::SyncStarted { repo } => {
                let bar = self.bar_for(&mut state, &repo);
                bar.set_message("Checking for changes...");
            }

            RunProgress::CacheCurrent { repo, refreshed } => {
                let bar = self.bar_for(&mut state, &repo);
                bar.set_message(format!("{refreshed} changed since last run"));
            }

            RunProgress::FullFetchStarted { repo } => {
                let bar = self.bar_for(&mut state, &repo);
                bar.set_style(Self::fetch_style());
                bar.set_message("Fetching everything...");
            }

            RunProgress::FullFetchPage { repo, page, count } => {
                let bar = self.bar_for(&mut state, &repo);
                bar.inc(count as u64);
                bar.set_message(format!("page {page}"));
            }

            RunProgress::SyncComplete {
                repo,
                refreshed,
                full_fetch,
            } => {
                let bar = self.bar_for(&mut state, &repo);
                bar.set_style(Self::spinner_style());
                let how = if full_fetch { " (full fetch)" } else { "" };
                bar.set_message(format!("Synced {refreshed} items{how}"));
            }

            RunProgress::EvaluatingRules { repo, items, rules } => {
                let bar = self.bar_for(&mut state, &repo);
                bar.set_message(format!("Running {rules} rules over {items} items..."));
                state.current = Some(repo);
            }

            RunProgress::RuleFailed {
                rule, item, error, ..
            } => {
                self.multi
                    .println(format!("  ⚠ {rule} failed on {item}: {error}"))
                    .ok();
            }

            RunProgress::ActionSkipped { .. } => {}

            RunProgress::ActionStarted { summary, dry_run } => {
                let line = if dry_run {
                    format!("  ○ {summary} (dry)")
                } else {
                    format!("  → {summary}")
                };
                self.multi.println(line).ok();
                if let Some(bar) = current_bar(&state) {
                    bar.set_message(summary);
                }
            }

            RunProgress::ActionFailed { summary, error } => {
                self.multi
                    .println(format!("  ✗ {summary}: {error}"))
                    .ok();
            }

            RunProgress::PollingMergeable { item, attempt } => {
                if let Some(bar) = current_bar(&state) {
                    bar.set_message(format!("Waiting for {item} mergeability (attempt {attempt})"));
                }
            }

            RunProgress::DrainComplete {
                executed,
                skipped,
                failed,
                dry_run,
            } => {
                if let Some(repo) = state.current.take()
                    && let Some(bar) = state.bars.remove(&repo)
                {
                    let verb = if dry_run { "would change" } else { "changed" };
                    let failed = if failed > 0 {
                        format!(", {failed} failed")
                    } else {
                        String::new()
                    };
                    bar.finish_with_message(format!(
                        "✓ {executed} {verb}, {skipped} already in place{failed}"
                    ));
                }
            }

            _ => {}
        }
    }

    pub fn println(&self, line: &str) {
        self.multi.println(line).ok();
    }

    /// Finish any bars a failed pass left behind.
    pub fn finish(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, bar) in state.bars.drain() {
            bar.abandon();
        }
        state.current = None;
    }

    fn bar_for(&self, state: &mut ProgressState, repo: &str) -> ProgressBar {
        state
            .bars
            .entry(repo.to_string())
            .or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(Self::spinner_style());
                bar.set_prefix(format!("{repo:24}"));
                bar.enable_steady_tick(Duration::from_millis(100));
                bar
            })
            .clone()
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.cyan} {spinner:.green} {msg}")
            .expect("Invalid template")
    }

    fn fetch_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.cyan} {spinner:.yellow} {pos:>5} items {msg}")
            .expect("Invalid template")
    }
}

fn current_bar(state: &ProgressState) -> Option<&ProgressBar> {
    state.current.as_ref().and_then(|repo| state.bars.get(repo))
}

impl Default for InteractiveReporter {
    fn default() -> Self {
        Self::new()
    }
}
