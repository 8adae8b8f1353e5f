//! # extplane -- Async client for the ExtPlane flight simulator plugin
//!
//! `extplane` talks to the [ExtPlane] plugin running inside X-Plane (or a
//! compatible simulator) over its line-oriented TCP protocol. It is meant
//! for cockpit hardware bridges, instrument panels and telemetry loggers
//! that need a steady stream of simulator variables ("datarefs") and a way
//! to poke values and commands back in.
//!
//! [ExtPlane]: https://github.com/vranki/ExtPlane
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! extplane = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ```no_run
//! use extplane::{DataRef, ExtPlaneClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ExtPlaneClient::new("127.0.0.1", extplane::DEFAULT_PORT);
//!     client.start().await?;
//!
//!     client.subscribe("sim/flightmodel/position/elevation", Some(1.0))?;
//!     client.register("sim/flightmodel/position/elevation", |dr: &DataRef| {
//!         println!("elevation: {:?} m", dr.parse_first::<f64>());
//!     });
//!
//!     tokio::time::sleep(Duration::from_secs(10)).await;
//!     client.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                   | Purpose                                         |
//! |-------------------------|-------------------------------------------------|
//! | `extplane-core`         | Types ([`DataRef`], [`DataType`]), events, errors |
//! | `extplane-client`       | Codec, store, registry, I/O loops, facade       |
//! | `extplane-test-harness` | Mock ExtPlane host for tests                    |
//! | **`extplane`**          | This facade crate -- re-exports everything      |
//!
//! ## Values
//!
//! The host reports every value as text together with its type. The client
//! keeps the text as-is ([`DataRef::values`]) and leaves interpretation to
//! the caller, typically through [`DataRef::parse_first`]. Array datarefs
//! carry one component per element; `data` datarefs carry the base64 text
//! the host sent.
//!
//! ## Lifecycle
//!
//! [`ExtPlaneClient::start`] opens the socket and spawns a send loop and a
//! receive loop. There is no automatic reconnection: watch
//! [`ExtPlaneClient::subscribe_events`] or [`ExtPlaneClient::status`], then
//! call [`ExtPlaneClient::stop`] and [`ExtPlaneClient::start`] again. The
//! store, listeners and any commands queued in the meantime carry over.

pub use extplane_core::error::{Error, Result};
pub use extplane_core::events::ConnectionEvent;
pub use extplane_core::types::{DataRef, DataType, LoopState, ParseDataTypeError};

pub use extplane_client::{
    ClientOptions, Command, CommandFamily, ConnectionStatus, DEFAULT_PORT, DataRefListener,
    DataRefStore, ExtPlaneBuilder, ExtPlaneClient, InboundMessage, ListenerId, RuntimeSetting,
};

/// Lower-level building blocks: codec, loops, queue and store.
pub mod client {
    pub use extplane_client::*;
}
