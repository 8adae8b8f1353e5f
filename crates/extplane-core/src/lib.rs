//! extplane-core: Core types and error definitions for the ExtPlane client.
//!
//! This crate defines the protocol-agnostic vocabulary shared by the client,
//! the test harness and applications: data references, their value types,
//! connection lifecycle events and the error type.
//!
//! # Key types
//!
//! - [`DataRef`] -- a snapshot of one named simulator variable
//! - [`DataType`] -- the value type the host reports for a data reference
//! - [`ConnectionEvent`] -- lifecycle notifications from the I/O loops
//! - [`LoopState`] -- state machine of the send and receive loops
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod types;

// Re-export key types at crate root for ergonomic `use extplane_core::*`.
pub use error::{Error, Result};
pub use events::ConnectionEvent;
pub use types::*;
