//! ExtPlane TCP client.
//!
//! This crate talks to the ExtPlane plugin of a flight simulator over its
//! line-oriented TCP protocol. It provides:
//!
//! - **Codec** ([`codec`]) -- render typed commands into wire-lines and
//!   decode inbound greeting, warning and dataref update lines.
//! - **Store** ([`store`]) -- latest snapshot of every dataref seen.
//! - **Registry** ([`registry`]) -- per-dataref listeners notified on update.
//! - **Queue** ([`queue`]) -- unbounded FIFO handoff from callers to the
//!   send loop.
//! - **I/O loops** ([`io`]) -- the send and receive tasks of a session.
//! - **ExtPlaneClient** ([`client`]) -- the facade applications use.
//! - **ExtPlaneBuilder** ([`builder`]) -- fluent construction with
//!   configurable timeouts.
//!
//! # Architecture
//!
//! ```text
//! caller -> ExtPlaneClient -> OutboundQueue -> send loop -> socket -> host
//! host -> socket -> receive loop -> DataRefStore -> NotificationRegistry -> listeners
//! ```
//!
//! The host pushes updates for subscribed datarefs continuously, so getters
//! such as [`ExtPlaneClient::get_value`] read from the local store and never
//! wait on the network.

pub mod builder;
pub mod client;
pub mod codec;
pub mod io;
pub mod net;
pub mod queue;
pub mod registry;
pub mod store;

pub use builder::ExtPlaneBuilder;
pub use client::{ClientOptions, ConnectionStatus, ExtPlaneClient};
pub use codec::{Command, CommandFamily, DEFAULT_PORT, InboundMessage, RuntimeSetting};
pub use registry::{DataRefListener, ListenerId};
pub use store::DataRefStore;
