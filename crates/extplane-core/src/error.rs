//! Error types for the ExtPlane client.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Connection-establishment, transport,
//! protocol and caller-input errors are all captured here.

/// The error type for all ExtPlane client operations.
///
/// Only [`Error::Connection`], [`Error::AlreadyStarted`],
/// [`Error::InvalidParameter`] and [`Error::QueueClosed`] are ever returned
/// to callers. Failures inside the send and receive loops are logged and
/// terminate the affected loop instead of propagating.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The host could not be reached when starting the connection
    /// (DNS failure, refused connection, connect timeout).
    #[error("connection error: {0}")]
    Connection(String),

    /// A read or write on an established connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound line could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A registered listener panicked while being notified.
    #[error("listener error: {0}")]
    Listener(String),

    /// A data reference name, command name or value cannot be put on the wire.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// `start()` was called on a client whose loops are already running.
    #[error("already started")]
    AlreadyStarted,

    /// The outbound queue has been closed and can no longer accept commands.
    #[error("outbound queue closed")]
    QueueClosed,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
