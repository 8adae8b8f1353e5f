//! Connection lifecycle events.
//!
//! Events are emitted by the client through a `tokio::sync::broadcast`
//! channel when a loop starts or stops. Applications that need to notice a
//! mid-session failure subscribe to these instead of polling
//! `ExtPlaneClient::status()`.

/// An event emitted by the client when the connection lifecycle changes.
///
/// Delivered on a best-effort basis through a bounded broadcast channel;
/// a receiver that falls behind sees `RecvError::Lagged`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The socket is open and the loops are being started.
    Connected {
        /// `host:port` of the ExtPlane host.
        addr: String,
    },

    /// The host greeted the client with its protocol version (`EXTPLANE 1`).
    Greeting {
        /// Protocol version announced by the host.
        version: u32,
    },

    /// The send loop terminated.
    SendLoopStopped {
        /// Why the loop stopped; `None` for a requested stop.
        error: Option<String>,
    },

    /// The receive loop terminated.
    ReceiveLoopStopped {
        /// Why the loop stopped; `None` for a requested stop.
        error: Option<String>,
    },

    /// `stop()` completed and the socket is closed.
    Disconnected,
}
