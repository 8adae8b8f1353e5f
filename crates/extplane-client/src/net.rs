//! TCP connection helpers.
//!
//! Opening the session socket and the lightweight reachability probe both
//! live here so that connect-time error mapping is done in one place.

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;

use extplane_core::{Error, Result};

/// Default connection timeout.
///
/// Long enough for a simulator on another machine on the LAN, short enough
/// that an application does not hang at startup when the sim is not running.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a TCP connection to `addr` (`host:port`).
///
/// Every failure (resolution, refusal, timeout) maps to
/// [`Error::Connection`].
pub async fn connect(addr: &str, timeout: Duration, nodelay: bool) -> Result<TcpStream> {
    tracing::debug!(
        addr = %addr,
        timeout_ms = timeout.as_millis(),
        "Connecting to ExtPlane host"
    );

    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            tracing::error!(addr = %addr, "TCP connection timed out");
            Error::Connection(format!("timed out connecting to {addr}"))
        })?
        .map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "TCP connection failed");
            map_connect_error(e, addr)
        })?;

    if nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(
                addr = %addr,
                error = %e,
                "Failed to set TCP_NODELAY (continuing anyway)"
            );
        }
    }

    tracing::info!(addr = %addr, "TCP connection established");
    Ok(stream)
}

/// Check whether something accepts TCP connections at `addr`.
///
/// Opens and immediately closes a throwaway connection. Any error or a
/// timeout yields `false`; a zero timeout returns `false` without trying.
pub async fn probe(addr: &str, timeout: Duration) -> bool {
    if timeout.is_zero() {
        return false;
    }
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            tracing::trace!(addr = %addr, "Probe connected");
            true
        }
        Ok(Err(e)) => {
            tracing::trace!(addr = %addr, error = %e, "Probe failed");
            false
        }
        Err(_) => {
            tracing::trace!(addr = %addr, timeout_ms = timeout.as_millis(), "Probe timed out");
            false
        }
    }
}

/// Map a connection-time I/O error to [`Error::Connection`] with a
/// readable reason.
fn map_connect_error(e: io::Error, addr: &str) -> Error {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => Error::Connection(format!("connection refused: {addr}")),
        _ => Error::Connection(format!("{addr}: {e}")),
    }
}

/// Map a data-path I/O error to [`Error::Transport`].
pub(crate) fn map_io_error(e: &io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::ConnectionAborted => Error::Transport(format!("connection lost: {e}")),
        _ => Error::Transport(e.to_string()),
    }
}
