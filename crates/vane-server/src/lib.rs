//! # vane-server
//!
//! Connection admission and session dispatch for the vane broker.
//!
//! - [`ServerController`]: stopped/running lifecycle, adapter wiring, dispatch
//! - [`SessionRegistry`]: which client identifiers currently have a session
//! - [`CancellationScope`]: the per-run shutdown signal shared by every session
//! - [`SessionSpawner`]: where dispatched session units get scheduled
//! - [`transport::memory`]: in-process transport for embedded use and tests
//!
//! The wire codec, per-session packet handling, and message routing live
//! behind [`vane_core::SessionExecutor`] and are not part of this crate.

#![deny(unsafe_code)]

pub mod metrics;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod spawn;
pub mod transport;

pub use registry::{ConnectedClient, SessionRegistry};
pub use server::{ServerController, ServerState};
pub use shutdown::{CancellationScope, DrainOutcome, wait_for_sessions};
pub use spawn::{ManualSpawner, SessionSpawner, SpawnedTask, TokioSpawner};
