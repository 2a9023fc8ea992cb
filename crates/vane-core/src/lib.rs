//! # vane-core
//!
//! Foundation types, collaborator traits, and errors for the vane broker.
//!
//! This crate provides the shared vocabulary the server crates depend on:
//!
//! - **Branded IDs**: `ClientId`, `SessionId` as newtypes for type safety
//! - **Observers**: [`Observers`], an ordered, synchronous callback registry
//! - **Options**: [`ServerOptions`] handed to the transport adapter on start
//! - **Collaborators**: [`TransportAdapter`], [`ClientTransport`], [`SessionExecutor`]
//! - **Errors**: [`ServerError`] hierarchy via `thiserror`

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod observers;
pub mod options;
pub mod session;
pub mod transport;

pub use errors::{OptionsError, Result, ServerError, TransportError};
pub use ids::{ClientId, SessionId, SubscriptionId};
pub use observers::{Callback, Observers};
pub use options::{EndpointOptions, ServerOptions, TlsEndpointOptions};
pub use session::SessionExecutor;
pub use transport::{
    ClientConnected, ClientTransport, ConnectionListener, TransportAdapter, TransportHandle,
};

/// Re-exported so collaborators can name the token type without a direct
/// `tokio-util` dependency.
pub use tokio_util::sync::CancellationToken;
