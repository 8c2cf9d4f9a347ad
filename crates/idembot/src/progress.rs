//! Progress events emitted during a run.
//!
//! The library never prints; callers that want feedback install a
//! [`ProgressCallback`] and render the events however they like.

/// Progress events emitted while syncing repositories and draining actions.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum RunProgress {
    /// Starting the incremental sync of a repository.
    SyncStarted {
        repo: String,
    },

    /// The changed-items probe reached an item that was already cached.
    CacheCurrent {
        repo: String,
        /// Items refreshed before the up-to-date one was found.
        refreshed: usize,
    },

    /// The probe ran off its page without finding a cached item.
    FullFetchStarted {
        repo: String,
    },

    /// A page of the full fetch was persisted.
    FullFetchPage {
        repo: String,
        page: u32,
        count: usize,
    },

    /// Sync of a repository finished.
    SyncComplete {
        repo: String,
        refreshed: usize,
        full_fetch: bool,
    },

    /// Rules are about to run over a set of items.
    EvaluatingRules {
        repo: String,
        items: usize,
        rules: usize,
    },

    /// A rule returned an error. The run continues.
    RuleFailed {
        rule: String,
        item: String,
        url: String,
        error: String,
    },

    /// An action needed no write.
    ActionSkipped {
        summary: String,
    },

    /// An action is about to execute (or would, in a dry run).
    ActionStarted {
        summary: String,
        dry_run: bool,
    },

    /// An action's write failed.
    ActionFailed {
        summary: String,
        error: String,
    },

    /// The queue for a repository pass was drained.
    DrainComplete {
        executed: usize,
        skipped: usize,
        failed: usize,
        dry_run: bool,
    },

    /// Polling for pull request mergeability.
    PollingMergeable {
        item: String,
        attempt: u32,
    },
}

/// Callback invoked for each progress event.
pub type ProgressCallback = Box<dyn Fn(RunProgress) + Send + Sync>;

/// Call `callback` if one is installed.
#[inline]
pub fn emit(callback: Option<&ProgressCallback>, event: RunProgress) {
    if let Some(cb) = callback {
        cb(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn emit_without_callback_is_a_no_op() {
        emit(
            None,
            RunProgress::SyncStarted {
                repo: "o/r".to_string(),
            },
        );
    }

    #[test]
    fn emit_forwards_events_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Box::new(move |event| {
            sink.lock().expect("lock").push(format!("{event:?}"));
        });

        emit(
            Some(&callback),
            RunProgress::ActionStarted {
                summary: "Close o/r#1".to_string(),
                dry_run: true,
            },
        );
        emit(
            Some(&callback),
            RunProgress::DrainComplete {
                executed: 0,
                skipped: 0,
                failed: 0,
                dry_run: true,
            },
        );

        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("Close o/r#1"));
        assert!(seen[1].starts_with("DrainComplete"));
    }
}
