//! Server controller: lifecycle, adapter wiring, and connection dispatch.
//!
//! The controller owns the stopped/running state machine and the per-run
//! [`CancellationScope`]. Every connection, whether surfaced by the
//! transport adapter or injected directly, is announced to the
//! connection-observed subscribers and then handed to the
//! [`SessionSpawner`] as an independent unit that runs the
//! [`SessionExecutor`]. The controller never awaits those units; `stop`
//! signals them and returns.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info, info_span, warn};
use vane_core::{
    CancellationToken, ClientConnected, ClientId, ConnectionListener, Observers, Result,
    ServerError, ServerOptions, SessionExecutor, SessionId, SubscriptionId, TransportAdapter,
    TransportHandle,
};

use crate::metrics::{
    CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL, SERVER_START_FAILURES_TOTAL,
    SERVER_STARTS_TOTAL, SERVER_STOPS_TOTAL, SESSIONS_ACTIVE, SESSIONS_COMPLETED_TOTAL,
};
use crate::registry::{ConnectedClient, SessionRegistry};
use crate::shutdown::{CancellationScope, DrainOutcome, wait_for_sessions};
use crate::spawn::{SessionSpawner, TokioSpawner};

/// Lifecycle state of the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// Not accepting connections. Initial state.
    #[default]
    Stopped,
    /// Accepting and dispatching connections.
    Running,
}

impl ServerState {
    /// Lowercase name, as serialized.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a dispatched connection came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnectionSource {
    Adapter,
    Injected,
}

impl ConnectionSource {
    fn as_str(self) -> &'static str {
        match self {
            Self::Adapter => "adapter",
            Self::Injected => "injected",
        }
    }
}

/// Everything a run owns. `Default` is the stopped record.
#[derive(Debug, Default)]
struct Lifecycle {
    state: ServerState,
    scope: Option<CancellationScope>,
    subscription: Option<SubscriptionId>,
}

impl Lifecycle {
    /// Token of the current run, if running and not yet torn down.
    fn running_token(&self) -> Option<CancellationToken> {
        match (self.state, &self.scope) {
            (ServerState::Running, Some(scope)) if !scope.is_cancelled() => Some(scope.token()),
            _ => None,
        }
    }
}

struct Inner {
    options: ServerOptions,
    adapter: Arc<dyn TransportAdapter>,
    executor: Arc<dyn SessionExecutor>,
    spawner: Arc<dyn SessionSpawner>,
    registry: Arc<SessionRegistry>,
    connected: Observers<ClientConnected>,
    /// Serializes start/stop. Never held while dispatching.
    transition: Mutex<()>,
    /// Adapter calls are never made while this is held.
    lifecycle: RwLock<Lifecycle>,
}

/// Admission and dispatch core of the broker.
///
/// Cheap to clone; clones share the same server.
#[derive(Clone)]
pub struct ServerController {
    inner: Arc<Inner>,
}

impl ServerController {
    /// Build a stopped controller around its collaborators.
    pub fn new(
        options: ServerOptions,
        adapter: Arc<dyn TransportAdapter>,
        executor: Arc<dyn SessionExecutor>,
        spawner: Arc<dyn SessionSpawner>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                adapter,
                executor,
                spawner,
                registry: Arc::new(SessionRegistry::new()),
                connected: Observers::new(),
                transition: Mutex::new(()),
                lifecycle: RwLock::new(Lifecycle::default()),
            }),
        }
    }

    /// Build a controller that spawns sessions on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn with_tokio(
        options: ServerOptions,
        adapter: Arc<dyn TransportAdapter>,
        executor: Arc<dyn SessionExecutor>,
    ) -> Self {
        Self::new(options, adapter, executor, Arc::new(TokioSpawner::current()))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.inner.lifecycle.read().state
    }

    /// Whether the server is running.
    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Options handed to the adapter on start.
    pub fn options(&self) -> &ServerOptions {
        &self.inner.options
    }

    /// Transition Stopped to Running.
    ///
    /// Fails with [`ServerError::AlreadyRunning`] while running,
    /// [`ServerError::InvalidOptions`] before touching anything, or
    /// [`ServerError::Transport`] after rolling back to Stopped when the
    /// adapter refuses to start.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let _transition = inner.transition.lock();

        if inner.lifecycle.read().state == ServerState::Running {
            return Err(ServerError::AlreadyRunning);
        }
        inner.options.validate()?;

        let scope = CancellationScope::new();
        let weak: Weak<Inner> = Arc::downgrade(inner);
        let listener: ConnectionListener = Arc::new(move |event: &ClientConnected| {
            if let Some(inner) = weak.upgrade() {
                inner.on_adapter_connection(event);
            }
        });
        let subscription = inner.adapter.subscribe(listener);

        *inner.lifecycle.write() = Lifecycle {
            state: ServerState::Running,
            scope: Some(scope),
            subscription: Some(subscription),
        };

        if let Err(error) = inner.adapter.start(&inner.options) {
            let failed = std::mem::take(&mut *inner.lifecycle.write());
            if let Some(scope) = &failed.scope {
                scope.cancel();
            }
            let _ = inner.adapter.unsubscribe(subscription);
            let _ = inner.registry.clear();
            counter!(SERVER_START_FAILURES_TOTAL).increment(1);
            warn!(error = %error, "transport adapter failed to start, server left stopped");
            return Err(error.into());
        }

        counter!(SERVER_STARTS_TOTAL).increment(1);
        let options = &inner.options;
        info!(
            endpoint = %options.default_endpoint.address(),
            endpoint_enabled = options.default_endpoint.enabled,
            tls_endpoint = %options.tls_endpoint.address(),
            tls_enabled = options.tls_endpoint.enabled,
            "server started"
        );
        Ok(())
    }

    /// Transition Running to Stopped. A no-op when already stopped.
    ///
    /// Signals every dispatched session and forgets them without waiting.
    pub fn stop(&self) {
        let _ = self.inner.tear_down(false);
    }

    /// Stop, then wait up to `timeout` for the sessions of the run to end.
    pub async fn shutdown(&self, timeout: Duration) -> DrainOutcome {
        let tasks = self
            .inner
            .tear_down(true)
            .into_iter()
            .filter_map(ConnectedClient::into_task)
            .collect();
        wait_for_sessions(tasks, timeout).await
    }

    /// Register a connection-observed subscriber.
    ///
    /// Called synchronously on the dispatching thread before each session is
    /// scheduled, so it should return quickly.
    ///
    /// A callback may call [`stop`](Self::stop) when the connection came
    /// through [`inject`](Self::inject) or from the adapter after `start`
    /// returned. It must not call `start` or `stop` for a notification the
    /// adapter delivers synchronously from inside its own `start`: the
    /// transition lock is held then and is not reentrant.
    pub fn subscribe_connected(
        &self,
        callback: impl Fn(&ClientConnected) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.connected.subscribe(Arc::new(callback))
    }

    /// Remove a connection-observed subscriber.
    pub fn unsubscribe_connected(&self, id: SubscriptionId) -> bool {
        self.inner.connected.unsubscribe(id)
    }

    /// Dispatch a pre-established connection, bypassing the adapter.
    pub fn inject(&self, client_id: impl Into<ClientId>, transport: TransportHandle) -> Result<()> {
        let client_id = client_id.into();
        let result = check_injection(&client_id, &transport).and_then(|()| {
            self.inner.dispatch(
                ClientConnected::new(client_id.clone(), transport),
                ConnectionSource::Injected,
            )
        });
        if let Err(error) = &result {
            counter!(CONNECTIONS_REJECTED_TOTAL, "reason" => error.error_kind()).increment(1);
            debug!(client_id = %client_id, error = %error, "injected connection rejected");
        }
        result
    }

    /// Client identifiers that currently have a session, sorted.
    pub fn connected_clients(&self) -> Vec<ClientId> {
        self.inner.registry.snapshot()
    }
}

impl fmt::Debug for ServerController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerController")
            .field("state", &self.state())
            .field("connected", &self.inner.registry.len())
            .field("observers", &self.inner.connected.len())
            .finish()
    }
}

fn check_injection(client_id: &ClientId, transport: &TransportHandle) -> Result<()> {
    if client_id.is_empty() {
        return Err(ServerError::InvalidConnection(
            "client identifier is empty".into(),
        ));
    }
    if !transport.is_connected() {
        return Err(ServerError::InvalidConnection(format!(
            "transport from {} is not connected",
            transport.remote_endpoint()
        )));
    }
    Ok(())
}

impl Inner {
    fn on_adapter_connection(&self, event: &ClientConnected) {
        if let Err(error) = self.dispatch(event.clone(), ConnectionSource::Adapter) {
            counter!(CONNECTIONS_REJECTED_TOTAL, "reason" => error.error_kind()).increment(1);
            warn!(
                client_id = %event.client_id,
                error = %error,
                "dropping connection notification received after stop"
            );
            event.transport.close();
        }
    }

    fn dispatch(&self, event: ClientConnected, source: ConnectionSource) -> Result<()> {
        let Some(token) = self.lifecycle.read().running_token() else {
            return Err(ServerError::ServerNotStarted);
        };

        counter!(CONNECTIONS_TOTAL, "source" => source.as_str()).increment(1);
        info!(
            client_id = %event.client_id,
            source = source.as_str(),
            remote = event.transport.remote_endpoint(),
            "client connected"
        );
        let _ = self.connected.notify(&event);

        let ClientConnected {
            client_id,
            transport,
        } = event;
        let session_id = SessionId::new();

        // Stop cancels under the write lock and clears afterwards, so holding
        // the read lock here means either the clear removes this entry or
        // the cancellation is already visible and nothing is recorded.
        let previous = {
            let _lifecycle = self.lifecycle.read();
            if token.is_cancelled() {
                debug!(
                    client_id = %client_id,
                    "server stopped during dispatch, session not scheduled"
                );
                return Ok(());
            }
            self.registry.record(client_id.clone(), session_id.clone())
        };
        if let Some(previous) = previous {
            debug!(
                client_id = %client_id,
                previous_session = %previous.session_id,
                "client identifier reused, replacing registry entry"
            );
        }

        let guard = ReleaseOnDrop::new(
            Arc::clone(&self.registry),
            client_id.clone(),
            session_id.clone(),
        );
        let executor = Arc::clone(&self.executor);
        let span = info_span!("session", client_id = %client_id, session_id = %session_id);
        let session_client = client_id.clone();
        let unit = async move {
            let mut guard = guard;
            guard.started = true;
            executor.run(session_client, transport, token).await;
        }
        .instrument(span)
        .boxed();

        let task = self.spawner.spawn(&session_id, unit);
        let _ = self.registry.attach(&client_id, &session_id, task);
        Ok(())
    }

    /// Shared body of stop and shutdown. Returns drained entries when
    /// `drain` is set, nothing otherwise.
    fn tear_down(&self, drain: bool) -> Vec<ConnectedClient> {
        let _transition = self.transition.lock();

        let previous = {
            let mut lifecycle = self.lifecycle.write();
            if let Some(scope) = &lifecycle.scope {
                scope.cancel();
            }
            std::mem::take(&mut *lifecycle)
        };
        let Lifecycle {
            state,
            scope,
            subscription,
        } = previous;
        let run_ms = scope
            .map(|scope| u64::try_from(scope.age().as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();

        if let Some(id) = subscription {
            let _ = self.adapter.unsubscribe(id);
        }
        let was_running = state == ServerState::Running;
        if was_running {
            self.adapter.stop();
        }

        let drained = if drain {
            self.registry.drain()
        } else {
            let _ = self.registry.clear();
            Vec::new()
        };

        if was_running {
            counter!(SERVER_STOPS_TOTAL).increment(1);
            info!(discarded_sessions = drained.len(), run_ms, "server stopped");
        } else {
            debug!("stop requested while already stopped");
        }
        drained
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let lifecycle = std::mem::take(self.lifecycle.get_mut());
        if let Some(scope) = &lifecycle.scope {
            scope.cancel();
        }
        if let Some(id) = lifecycle.subscription {
            let _ = self.adapter.unsubscribe(id);
        }
        if lifecycle.state == ServerState::Running {
            self.adapter.stop();
        }
    }
}

/// Owned by a dispatched unit. Releases the unit's registry entry when the
/// unit finishes, panics, or is dropped unpolled.
struct ReleaseOnDrop {
    registry: Arc<SessionRegistry>,
    client_id: ClientId,
    session_id: SessionId,
    /// Set once the unit is first polled; discarded units never ran.
    started: bool,
}

impl ReleaseOnDrop {
    fn new(registry: Arc<SessionRegistry>, client_id: ClientId, session_id: SessionId) -> Self {
        gauge!(SESSIONS_ACTIVE).increment(1.0);
        Self {
            registry,
            client_id,
            session_id,
            started: false,
        }
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        gauge!(SESSIONS_ACTIVE).decrement(1.0);
        if self.started {
            counter!(SESSIONS_COMPLETED_TOTAL).increment(1);
        }
        let released = self.registry.release(&self.client_id, &self.session_id);
        debug!(
            client_id = %self.client_id,
            session_id = %self.session_id,
            started = self.started,
            released,
            "session ended"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::ManualSpawner;
    use crate::transport::memory::{MemoryTransport, MemoryTransportAdapter};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tracing::Level;
    use vane_core::{ClientTransport, TransportError};

    /// Records each run and returns immediately.
    #[derive(Default)]
    struct InstantExecutor {
        runs: Mutex<Vec<(ClientId, bool)>>,
    }

    #[async_trait]
    impl SessionExecutor for InstantExecutor {
        async fn run(&self, client_id: ClientId, _: TransportHandle, cancel: CancellationToken) {
            self.runs.lock().push((client_id, cancel.is_cancelled()));
        }
    }

    /// Holds every session open until cancelled, keeping the tokens.
    #[derive(Default)]
    struct WaitForCancel {
        tokens: Mutex<Vec<CancellationToken>>,
    }

    #[async_trait]
    impl SessionExecutor for WaitForCancel {
        async fn run(&self, _: ClientId, _: TransportHandle, cancel: CancellationToken) {
            self.tokens.lock().push(cancel.clone());
            cancel.cancelled().await;
        }
    }

    /// Never observes cancellation.
    struct Stubborn;

    #[async_trait]
    impl SessionExecutor for Stubborn {
        async fn run(&self, _: ClientId, _: TransportHandle, _: CancellationToken) {
            futures::future::pending::<()>().await;
        }
    }

    /// Adapter that keeps every listener it was ever given, standing in
    /// for a notification already in flight when stop runs.
    #[derive(Default)]
    struct LaggingAdapter {
        listeners: Mutex<Vec<ConnectionListener>>,
    }

    impl LaggingAdapter {
        fn deliver(&self, client_id: &str, transport: TransportHandle) {
            let event = ClientConnected::new(ClientId::from(client_id), transport);
            let listeners = self.listeners.lock().clone();
            for listener in listeners {
                listener(&event);
            }
        }
    }

    impl TransportAdapter for LaggingAdapter {
        fn subscribe(&self, listener: ConnectionListener) -> SubscriptionId {
            let mut listeners = self.listeners.lock();
            listeners.push(listener);
            SubscriptionId::from_raw(listeners.len() as u64)
        }
        fn unsubscribe(&self, _: SubscriptionId) -> bool {
            true
        }
        fn start(&self, _: &ServerOptions) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        fn stop(&self) {}
    }

    struct Harness {
        server: ServerController,
        adapter: Arc<MemoryTransportAdapter>,
        executor: Arc<InstantExecutor>,
        spawner: Arc<ManualSpawner>,
    }

    fn harness() -> Harness {
        let adapter = MemoryTransportAdapter::new();
        let executor = Arc::new(InstantExecutor::default());
        let spawner = Arc::new(ManualSpawner::new());
        let server = ServerController::new(
            ServerOptions::default(),
            adapter.clone(),
            executor.clone(),
            spawner.clone(),
        );
        Harness {
            server,
            adapter,
            executor,
            spawner,
        }
    }

    fn handle(name: &str) -> TransportHandle {
        MemoryTransport::new(format!("mem://{name}"))
    }

    fn ids(names: &[&str]) -> Vec<ClientId> {
        names.iter().map(|n| ClientId::from(*n)).collect()
    }

    #[test]
    fn starts_stopped() {
        let h = harness();
        assert_eq!(h.server.state(), ServerState::Stopped);
        assert!(!h.server.is_running());
        assert!(h.server.connected_clients().is_empty());
        assert_eq!(h.adapter.listener_count(), 0);
    }

    #[test]
    fn start_subscribes_and_starts_adapter() {
        let h = harness();
        h.server.start().unwrap();
        assert!(h.server.is_running());
        assert!(h.adapter.is_accepting());
        assert_eq!(h.adapter.listener_count(), 1);
        assert_eq!(h.adapter.last_options(), Some(ServerOptions::default()));
    }

    #[test]
    fn second_start_rejected_and_state_kept() {
        let h = harness();
        h.server.start().unwrap();
        assert_matches!(h.server.start(), Err(ServerError::AlreadyRunning));
        assert!(h.server.is_running());
        assert_eq!(h.adapter.start_count(), 1);
        assert_eq!(h.adapter.listener_count(), 1);
    }

    #[test]
    fn stop_is_idempotent() {
        let h = harness();
        h.server.stop();
        assert_eq!(h.adapter.stop_count(), 0);

        h.server.start().unwrap();
        h.server.stop();
        h.server.stop();
        assert_eq!(h.server.state(), ServerState::Stopped);
        assert_eq!(h.adapter.stop_count(), 1);
        assert_eq!(h.adapter.listener_count(), 0);
    }

    #[test]
    fn restart_after_stop() {
        let h = harness();
        h.server.start().unwrap();
        h.server.stop();
        h.server.start().unwrap();
        assert!(h.server.is_running());
        assert_eq!(h.adapter.start_count(), 2);
        assert_eq!(h.adapter.listener_count(), 1);
    }

    #[test]
    fn inject_while_stopped_has_no_effect() {
        let h = harness();
        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        let _ = h.server.subscribe_connected(move |_| *counter.lock() += 1);

        assert_matches!(
            h.server.inject("c1", handle("c1")),
            Err(ServerError::ServerNotStarted)
        );
        assert_eq!(*seen.lock(), 0);
        assert!(h.server.connected_clients().is_empty());
        assert!(h.spawner.is_empty());
    }

    #[test]
    fn inject_rejects_invalid_connection() {
        let h = harness();
        h.server.start().unwrap();

        assert_matches!(
            h.server.inject("", handle("anon")),
            Err(ServerError::InvalidConnection(msg)) if msg.contains("empty")
        );
        assert_matches!(
            h.server.inject("c1", MemoryTransport::closed("mem://gone")),
            Err(ServerError::InvalidConnection(msg)) if msg.contains("mem://gone")
        );
        assert!(h.server.connected_clients().is_empty());
    }

    #[test]
    fn invalid_connection_checked_before_state() {
        let h = harness();
        assert_matches!(
            h.server.inject("", handle("anon")),
            Err(ServerError::InvalidConnection(_))
        );
    }

    #[test]
    fn dispatch_notifies_in_order_and_records() {
        let h = harness();
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&first), Arc::clone(&second));
        let _ = h
            .server
            .subscribe_connected(move |e| a.lock().push(e.client_id.clone()));
        let _ = h
            .server
            .subscribe_connected(move |e| b.lock().push(e.client_id.clone()));

        h.server.start().unwrap();
        h.server.inject("c1", handle("c1")).unwrap();
        assert!(h.adapter.connect("c2", handle("c2")));
        h.server.inject("c3", handle("c3")).unwrap();

        let expected = ids(&["c1", "c2", "c3"]);
        assert_eq!(*first.lock(), expected);
        assert_eq!(*second.lock(), expected);
        assert_eq!(h.server.connected_clients(), expected);
        assert_eq!(h.spawner.len(), 3);
    }

    #[test]
    fn unsubscribed_observer_stops_receiving() {
        let h = harness();
        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        let id = h.server.subscribe_connected(move |_| *counter.lock() += 1);

        h.server.start().unwrap();
        h.server.inject("c1", handle("c1")).unwrap();
        assert!(h.server.unsubscribe_connected(id));
        assert!(!h.server.unsubscribe_connected(id));
        h.server.inject("c2", handle("c2")).unwrap();
        assert_eq!(*seen.lock(), 1);
    }

    #[tokio::test]
    async fn completed_session_leaves_registry() {
        let h = harness();
        h.server.start().unwrap();
        h.server.inject("c1", handle("c1")).unwrap();
        assert_eq!(h.server.connected_clients(), ids(&["c1"]));

        assert_eq!(h.spawner.run_all().await, 1);
        assert!(h.server.connected_clients().is_empty());
        assert_eq!(*h.executor.runs.lock(), vec![(ClientId::from("c1"), false)]);
    }

    #[test]
    fn discarded_unit_releases_entry() {
        let h = harness();
        h.server.start().unwrap();
        h.server.inject("c1", handle("c1")).unwrap();
        assert_eq!(h.spawner.discard(), 1);
        assert!(h.server.connected_clients().is_empty());
    }

    #[tokio::test]
    async fn stop_clears_registry_and_cancels_pending_sessions() {
        let h = harness();
        h.server.start().unwrap();
        h.server.inject("c1", handle("c1")).unwrap();
        h.server.inject("c2", handle("c2")).unwrap();
        assert_eq!(h.server.connected_clients().len(), 2);

        h.server.stop();
        assert!(h.server.connected_clients().is_empty());
        assert!(!h.adapter.is_accepting());

        // Units scheduled before stop still run, and see the signal.
        assert_eq!(h.spawner.run_all().await, 2);
        assert!(h.executor.runs.lock().iter().all(|(_, cancelled)| *cancelled));
        assert!(h.server.connected_clients().is_empty());
    }

    #[tokio::test]
    async fn duplicate_identifier_last_writer_wins() {
        let h = harness();
        h.server.start().unwrap();
        h.server.inject("dup", handle("dup-1")).unwrap();
        h.server.inject("dup", handle("dup-2")).unwrap();
        assert_eq!(h.server.connected_clients(), ids(&["dup"]));

        // The superseded session ending leaves its replacement in place.
        assert!(h.spawner.run_next().await);
        assert_eq!(h.server.connected_clients(), ids(&["dup"]));
        assert!(h.spawner.run_next().await);
        assert!(h.server.connected_clients().is_empty());
    }

    #[test]
    fn adapter_start_failure_rolls_back() {
        let h = harness();
        h.adapter.fail_next_start("address in use");

        assert_matches!(
            h.server.start(),
            Err(ServerError::Transport(TransportError::Failed(reason))) if reason == "address in use"
        );
        assert_eq!(h.server.state(), ServerState::Stopped);
        assert_eq!(h.adapter.listener_count(), 0);
        assert_matches!(
            h.server.inject("c1", handle("c1")),
            Err(ServerError::ServerNotStarted)
        );

        h.server.start().unwrap();
        assert!(h.server.is_running());
    }

    #[test]
    fn invalid_options_fail_before_any_effect() {
        let adapter = MemoryTransportAdapter::new();
        let mut options = ServerOptions::default();
        options.connection_backlog = 0;
        let server = ServerController::new(
            options,
            adapter.clone(),
            Arc::new(InstantExecutor::default()),
            Arc::new(ManualSpawner::new()),
        );

        assert_matches!(server.start(), Err(ServerError::InvalidOptions(_)));
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(adapter.listener_count(), 0);
        assert_eq!(adapter.start_count(), 0);
    }

    #[test]
    fn late_notification_after_stop_is_dropped() {
        let adapter = Arc::new(LaggingAdapter::default());
        let spawner = Arc::new(ManualSpawner::new());
        let server = ServerController::new(
            ServerOptions::default(),
            adapter.clone(),
            Arc::new(InstantExecutor::default()),
            spawner.clone(),
        );
        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        let _ = server.subscribe_connected(move |_| *counter.lock() += 1);

        server.start().unwrap();
        server.stop();

        let (logs, _guard) = vane_logging::test_utils::capture_logs();
        let transport = MemoryTransport::new("mem://late");
        adapter.deliver("late", transport.clone());

        assert!(!transport.is_connected());
        assert_eq!(*seen.lock(), 0);
        assert!(server.connected_clients().is_empty());
        assert!(spawner.is_empty());
        assert!(logs.has_event(Level::WARN, "dropping connection notification"));
    }

    #[test]
    fn dropped_controller_detaches_from_adapter() {
        let h = harness();
        h.server.start().unwrap();
        let adapter = Arc::clone(&h.adapter);
        drop(h);
        assert!(!adapter.is_accepting());
        assert_eq!(adapter.listener_count(), 0);
    }

    #[test]
    fn lifecycle_trace_events() {
        let (logs, _guard) = vane_logging::test_utils::capture_logs();
        let h = harness();
        h.server.start().unwrap();
        h.server.inject("c1", handle("c1")).unwrap();
        h.server.stop();

        assert!(logs.has_event(Level::INFO, "server started"));
        assert!(logs.has_event(Level::INFO, "server stopped"));
        let connected = logs.matching("client connected");
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].field("client_id"), Some("c1"));
        assert_eq!(connected[0].field("source"), Some("injected"));
    }

    #[tokio::test]
    async fn stop_signals_running_sessions() {
        let executor = Arc::new(WaitForCancel::default());
        let server = ServerController::with_tokio(
            ServerOptions::default(),
            MemoryTransportAdapter::new(),
            executor.clone(),
        );
        server.start().unwrap();
        for name in ["a", "b", "c"] {
            server.inject(name, handle(name)).unwrap();
        }
        while executor.tokens.lock().len() < 3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(server.connected_clients().len(), 3);

        server.stop();
        assert!(server.connected_clients().is_empty());
        assert!(executor.tokens.lock().iter().all(CancellationToken::is_cancelled));
    }

    #[tokio::test]
    async fn shutdown_drains_cooperative_sessions() {
        let executor = Arc::new(WaitForCancel::default());
        let server = ServerController::with_tokio(
            ServerOptions::default(),
            MemoryTransportAdapter::new(),
            executor,
        );
        server.start().unwrap();
        for name in ["a", "b"] {
            server.inject(name, handle(name)).unwrap();
        }

        let outcome = server.shutdown(Duration::from_secs(5)).await;
        assert_eq!(
            outcome,
            DrainOutcome {
                total: 2,
                completed: 2,
                timed_out: false
            }
        );
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.connected_clients().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_times_out_on_stubborn_session() {
        let server = ServerController::with_tokio(
            ServerOptions::default(),
            MemoryTransportAdapter::new(),
            Arc::new(Stubborn),
        );
        server.start().unwrap();
        server.inject("stuck", handle("stuck")).unwrap();

        let outcome = server.shutdown(Duration::from_millis(50)).await;
        assert!(outcome.timed_out);
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.completed, 0);
        assert!(server.connected_clients().is_empty());
    }

    #[test]
    fn state_display_and_serde() {
        assert_eq!(ServerState::Running.to_string(), "running");
        assert_eq!(
            serde_json::to_string(&ServerState::Stopped).unwrap(),
            "\"stopped\""
        );
        assert_eq!(ServerState::default(), ServerState::Stopped);
    }

    #[test]
    fn stop_from_subscriber_leaves_no_entry() {
        let h = harness();
        let slot = Arc::new(Mutex::new(Some(h.server.clone())));
        let in_callback = Arc::clone(&slot);
        let _ = h.server.subscribe_connected(move |_| {
            let server = in_callback.lock().clone();
            if let Some(server) = server {
                server.stop();
            }
        });

        let done = AtomicBool::new(false);
        let stale = std::thread::scope(|scope| {
            let watcher = scope.spawn(|| {
                let mut seen = 0usize;
                while !done.load(Ordering::Acquire) {
                    if !h.server.connected_clients().is_empty() {
                        seen += 1;
                    }
                }
                seen
            });
            for i in 0..2_000 {
                h.server.start().unwrap();
                h.server.inject(format!("c{i}"), handle("c")).unwrap();
                assert!(!h.server.is_running());
                assert!(h.server.connected_clients().is_empty());
            }
            done.store(true, Ordering::Release);
            watcher.join().unwrap()
        });

        assert_eq!(stale, 0, "registry entries seen after stop returned");
        assert!(h.spawner.is_empty());
        let _ = slot.lock().take();
    }

    #[test]
    fn concurrent_start_admits_one_caller() {
        const CALLERS: usize = 8;
        for _ in 0..50 {
            let h = harness();
            let barrier = Barrier::new(CALLERS);
            let results: Vec<Result<()>> = std::thread::scope(|scope| {
                let callers: Vec<_> = (0..CALLERS)
                    .map(|_| {
                        let server = h.server.clone();
                        let barrier = &barrier;
                        scope.spawn(move || {
                            let _ = barrier.wait();
                            server.start()
                        })
                    })
                    .collect();
                callers.into_iter().map(|t| t.join().unwrap()).collect()
            });

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(
                results
                    .iter()
                    .filter_map(|r| r.as_ref().err())
                    .all(|e| matches!(e, ServerError::AlreadyRunning))
            );
            assert!(h.server.is_running());
            assert_eq!(h.adapter.start_count(), 1);
            assert_eq!(h.adapter.listener_count(), 1);
        }
    }

    #[test]
    fn discarded_units_not_counted_as_completed() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let prometheus = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let h = harness();
            h.server.start().unwrap();
            h.server.inject("ran", handle("ran")).unwrap();
            assert_eq!(futures::executor::block_on(h.spawner.run_all()), 1);
            h.server.inject("dropped", handle("dropped")).unwrap();
            assert_eq!(h.spawner.discard(), 1);
            h.server.stop();
        });

        let output = crate::metrics::render(&prometheus);
        assert!(output.contains("sessions_completed_total 1"), "{output}");
        assert!(output.contains("server_starts_total 1"), "{output}");
    }

    #[test]
    fn started_event_reports_endpoints() {
        let (logs, _guard) = vane_logging::test_utils::capture_logs();
        let h = harness();
        h.server.start().unwrap();
        h.server.stop();

        let started = logs.matching("server started");
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].field("endpoint"), Some("0.0.0.0:1883"));
        assert_eq!(started[0].field("tls_enabled"), Some("false"));
        let stopped = logs.matching("server stopped");
        assert!(stopped[0].field("run_ms").is_some());
    }

    proptest! {
        #[test]
        fn start_stop_sequences_hold_one_state(ops in proptest::collection::vec(any::<bool>(), 0..32)) {
            let h = harness();
            let mut running = false;
            for start in ops {
                if start {
                    let result = h.server.start();
                    if running {
                        prop_assert!(matches!(result, Err(ServerError::AlreadyRunning)));
                    } else {
                        prop_assert!(result.is_ok());
                    }
                    running = true;
                } else {
                    h.server.stop();
                    running = false;
                    prop_assert!(h.server.connected_clients().is_empty());
                }
                let expected = if running { ServerState::Running } else { ServerState::Stopped };
                prop_assert_eq!(h.server.state(), expected);
                prop_assert_eq!(h.adapter.is_accepting(), running);
                prop_assert_eq!(h.adapter.listener_count(), usize::from(running));
            }
        }
    }
}
