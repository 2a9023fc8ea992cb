//! Where dispatched session units are scheduled.
//!
//! The controller never awaits a session. It hands each unit to a
//! [`SessionSpawner`] and returns immediately, so a slow or stuck session
//! cannot block the adapter's accept path or an injecting caller.

use std::collections::VecDeque;
use std::fmt;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use vane_core::SessionId;

/// Handle to a scheduled session unit.
///
/// Tracked tasks carry a tokio join handle and can be awaited during a drain.
/// Detached tasks come from spawners that keep no handle of their own.
#[derive(Debug, Default)]
pub struct SpawnedTask {
    handle: Option<JoinHandle<()>>,
}

impl SpawnedTask {
    /// Track a tokio task.
    pub fn from_join_handle(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// A task nobody can wait on.
    pub fn detached() -> Self {
        Self { handle: None }
    }

    /// Whether a join handle is held.
    pub fn is_tracked(&self) -> bool {
        self.handle.is_some()
    }

    /// Take the join handle out, if any.
    pub fn into_join_handle(self) -> Option<JoinHandle<()>> {
        self.handle
    }
}

/// Schedules session units for concurrent execution.
pub trait SessionSpawner: Send + Sync {
    /// Schedule `session` to run. Must not run it inline.
    fn spawn(&self, session_id: &SessionId, session: BoxFuture<'static, ()>) -> SpawnedTask;
}

/// Spawns onto a tokio runtime.
#[derive(Clone, Debug)]
pub struct TokioSpawner {
    handle: Handle,
}

impl TokioSpawner {
    /// Spawn onto the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Spawn onto the runtime of the calling context.
    ///
    /// # Panics
    ///
    /// Panics outside a tokio runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Like [`current`](Self::current), but `None` outside a runtime.
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl SessionSpawner for TokioSpawner {
    fn spawn(&self, _session_id: &SessionId, session: BoxFuture<'static, ()>) -> SpawnedTask {
        SpawnedTask::from_join_handle(self.handle.spawn(session))
    }
}

/// Queues session units until the caller runs them.
///
/// Useful for deterministic tests and for hosts that want to pick the
/// execution context themselves. Queued units hold their registry entry
/// until they are run or discarded.
#[derive(Default)]
pub struct ManualSpawner {
    queue: Mutex<VecDeque<(SessionId, BoxFuture<'static, ()>)>>,
}

impl ManualSpawner {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued units.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Session ids of the queued units, oldest first.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.queue.lock().iter().map(|(id, _)| id.clone()).collect()
    }

    /// Run the oldest queued unit to completion. Returns `false` if empty.
    pub async fn run_next(&self) -> bool {
        let next = self.queue.lock().pop_front();
        match next {
            Some((_, session)) => {
                session.await;
                true
            }
            None => false,
        }
    }

    /// Run every queued unit in order, including ones queued meanwhile.
    pub async fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next().await {
            ran += 1;
        }
        ran
    }

    /// Drop every queued unit without running it.
    pub fn discard(&self) -> usize {
        let drained: Vec<_> = self.queue.lock().drain(..).collect();
        drained.len()
    }
}

impl SessionSpawner for ManualSpawner {
    fn spawn(&self, session_id: &SessionId, session: BoxFuture<'static, ()>) -> SpawnedTask {
        self.queue.lock().push_back((session_id.clone(), session));
        SpawnedTask::detached()
    }
}

impl fmt::Debug for ManualSpawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualSpawner")
            .field("queued", &self.len())
            .finish()
    }
}
