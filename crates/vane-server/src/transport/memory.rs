//! In-process transport for embedded brokers and tests.
//!
//! [`MemoryTransportAdapter`] has no sockets. The host hands it
//! already-established connections through [`connect`](MemoryTransportAdapter::connect),
//! and it forwards them to its listeners while accepting.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::debug;
use vane_core::{
    ClientConnected, ClientId, ClientTransport, ConnectionListener, Observers, ServerOptions,
    SubscriptionId, TransportAdapter, TransportError, TransportHandle,
};

/// A client transport with nothing behind it but a connected flag.
pub struct MemoryTransport {
    endpoint: String,
    connected: AtomicBool,
}

impl MemoryTransport {
    /// Create a connected transport.
    pub fn new(endpoint: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.into(),
            connected: AtomicBool::new(true),
        })
    }

    /// Create a transport that already reports itself closed.
    pub fn closed(endpoint: impl Into<String>) -> Arc<Self> {
        let transport = Self::new(endpoint);
        transport.close();
        transport
    }
}

impl ClientTransport for MemoryTransport {
    fn remote_endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Transport adapter driven by the host instead of an accept loop.
#[derive(Default)]
pub struct MemoryTransportAdapter {
    listeners: Observers<ClientConnected>,
    accepting: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    last_options: Mutex<Option<ServerOptions>>,
    start_failure: Mutex<Option<String>>,
}

impl MemoryTransportAdapter {
    /// Create an adapter that is not yet accepting.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Offer a connection. Listeners are notified only while accepting.
    ///
    /// Returns whether the connection was delivered.
    pub fn connect(&self, client_id: impl Into<ClientId>, transport: TransportHandle) -> bool {
        if !self.is_accepting() {
            debug!("memory adapter not accepting, connection refused");
            return false;
        }
        let event = ClientConnected::new(client_id.into(), transport);
        let _ = self.listeners.notify(&event);
        true
    }

    /// Whether `start` has been called without a matching `stop`.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Number of successful `start` calls.
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::Acquire)
    }

    /// Number of `stop` calls.
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::Acquire)
    }

    /// Options passed to the most recent successful `start`.
    pub fn last_options(&self) -> Option<ServerOptions> {
        self.last_options.lock().clone()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Make the next `start` fail with `reason`.
    pub fn fail_next_start(&self, reason: impl Into<String>) {
        *self.start_failure.lock() = Some(reason.into());
    }
}

impl TransportAdapter for MemoryTransportAdapter {
    fn subscribe(&self, listener: ConnectionListener) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn start(&self, options: &ServerOptions) -> Result<(), TransportError> {
        if let Some(reason) = self.start_failure.lock().take() {
            return Err(TransportError::Failed(reason));
        }
        if self.accepting.swap(true, Ordering::AcqRel) {
            return Err(TransportError::AlreadyAccepting);
        }
        *self.last_options.lock() = Some(options.clone());
        let _ = self.starts.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn stop(&self) {
        self.accepting.store(false, Ordering::Release);
        let _ = self.stops.fetch_add(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for MemoryTransportAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransportAdapter")
            .field("accepting", &self.is_accepting())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
