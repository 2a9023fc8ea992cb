//! Transport-side collaborator contracts.

use std::fmt;
use std::sync::Arc;

use crate::errors::TransportError;
use crate::ids::{ClientId, SubscriptionId};
use crate::observers::Callback;
use crate::options::ServerOptions;

/// One accepted client transport.
///
/// The wire codec sits on top of this; the dispatch core only needs enough to
/// reject dead handles and to identify the peer in logs.
pub trait ClientTransport: Send + Sync + fmt::Debug {
    /// Peer address or other human-readable endpoint description.
    fn remote_endpoint(&self) -> &str;

    /// Whether the underlying connection is still usable.
    fn is_connected(&self) -> bool;

    /// Close the underlying connection. Idempotent.
    fn close(&self);
}

/// Shared handle to an accepted transport.
pub type TransportHandle = Arc<dyn ClientTransport>;

/// A connection that has been accepted, either by an adapter or by injection.
#[derive(Clone, Debug)]
pub struct ClientConnected {
    /// Identifier the client presented.
    pub client_id: ClientId,
    /// Transport the session will run over.
    pub transport: TransportHandle,
}

impl ClientConnected {
    /// Bundle an identifier with its transport.
    pub fn new(client_id: ClientId, transport: TransportHandle) -> Self {
        Self {
            client_id,
            transport,
        }
    }
}

/// Callback invoked by an adapter for each accepted connection.
pub type ConnectionListener = Callback<ClientConnected>;

/// Server-side transport adapter: owns listening sockets and surfaces
/// accepted connections as [`ClientConnected`] notifications.
///
/// Contract:
/// - no notification may be delivered after `stop` returns;
/// - `start` and `stop` are called at most once per lifecycle cycle;
/// - notifications are delivered synchronously on the adapter's own
///   accept thread or task.
pub trait TransportAdapter: Send + Sync {
    /// Register a connection listener.
    fn subscribe(&self, listener: ConnectionListener) -> SubscriptionId;

    /// Remove a connection listener. Returns `false` if it was unknown.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Begin accepting connections.
    fn start(&self, options: &ServerOptions) -> Result<(), TransportError>;

    /// Stop accepting connections.
    fn stop(&self);
}
