//! Transport adapters shipped with the server.

pub mod memory;

pub use memory::{MemoryTransport, MemoryTransportAdapter};
