//! Session-execution collaborator contract.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::ids::ClientId;
use crate::transport::TransportHandle;

/// Drives the protocol conversation with one connected client.
///
/// `run` resolves when the session ends, whether the client disconnected,
/// the session failed, or `cancel` fired. It must not panic or otherwise let
/// a failure escape: errors are terminal to that session only, and the
/// implementation is expected to log them itself.
///
/// Cancellation is cooperative. An executor that never observes `cancel`
/// keeps running after the server stops.
#[async_trait]
pub trait SessionExecutor: Send + Sync {
    /// Run a session until it ends or is cancelled.
    async fn run(&self, client_id: ClientId, transport: TransportHandle, cancel: CancellationToken);
}
