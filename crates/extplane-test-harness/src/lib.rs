//! extplane-test-harness: Test utilities for the ExtPlane client.
//!
//! This crate provides [`MockExtPlaneServer`], a scripted stand-in for the
//! simulator plugin, so that the client's loops and facade can be tested
//! against real localhost sockets without a running simulator.

pub mod mock_server;

pub use mock_server::{DEFAULT_GREETING, MockExtPlaneServer};
