//! Per-run cancellation scope and session draining.

use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::spawn::SpawnedTask;

/// Shutdown signal for one server run.
///
/// Created on start, cancelled and discarded on stop. Every session
/// dispatched during the run receives a [`token`](Self::token) that shares
/// this scope's state, so cancelling the scope is observed by all of them.
#[derive(Debug)]
pub struct CancellationScope {
    token: CancellationToken,
    created_at: Instant,
}

impl CancellationScope {
    /// Create a fresh, uncancelled scope.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            created_at: Instant::now(),
        }
    }

    /// A handle onto this scope's signal.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal every holder of a token. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the scope has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Time since the scope was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl Default for CancellationScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of waiting for drained sessions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Tracked session tasks that were waited on.
    pub total: usize,
    /// How many of them finished before the deadline.
    pub completed: usize,
    /// Whether the deadline passed with tasks still running.
    pub timed_out: bool,
}

/// Wait up to `timeout` for the given session tasks to finish.
///
/// Untracked tasks (from a spawner that keeps no join handle) are skipped.
/// Tasks still running at the deadline are left alone: cancellation is
/// cooperative and nothing here aborts them.
pub async fn wait_for_sessions(tasks: Vec<SpawnedTask>, timeout: Duration) -> DrainOutcome {
    let mut pending: FuturesUnordered<_> = tasks
        .into_iter()
        .filter_map(SpawnedTask::into_join_handle)
        .collect();
    let total = pending.len();
    let mut completed = 0;

    info!(
        task_count = total,
        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        "waiting for sessions to complete"
    );

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            next = pending.next() => match next {
                Some(_) => completed += 1,
                None => break,
            },
            () = &mut deadline => {
                warn!(
                    remaining = total - completed,
                    "drain timed out after {timeout:?}, some sessions may still be running"
                );
                return DrainOutcome { total, completed, timed_out: true };
            }
        }
    }

    DrainOutcome {
        total,
        completed,
        timed_out: false,
    }
}
