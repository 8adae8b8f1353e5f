//! Mock ExtPlane host for client-level testing.
//!
//! [`MockExtPlaneServer`] listens on a random localhost port, greets every
//! client the way the ExtPlane plugin does, records each line the client
//! sends and lets the test push arbitrary lines back. Connections are served
//! one at a time; when a client goes away the server accepts the next one,
//! so reconnect scenarios can be tested against the same instance.
//!
//! # Example
//!
//! ```
//! use extplane_test_harness::MockExtPlaneServer;
//! use std::time::Duration;
//!
//! # async fn example() -> extplane_core::Result<()> {
//! let server = MockExtPlaneServer::start().await?;
//!
//! // ... connect a client to server.host():server.port() ...
//!
//! server.push_line("uf sim/flightmodel/position/indicated_airspeed 120.5");
//! let sent = server.next_line(Duration::from_secs(1)).await;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use extplane_core::error::{Error, Result};

/// Greeting the real plugin sends on connect.
pub const DEFAULT_GREETING: &str = "EXTPLANE 1";

/// Instructions from the test to the connection currently being served.
#[derive(Debug)]
enum Control {
    Send(String),
    Close,
}

/// A scripted ExtPlane host on `127.0.0.1`.
pub struct MockExtPlaneServer {
    addr: SocketAddr,
    control_tx: mpsc::UnboundedSender<Control>,
    received: Mutex<mpsc::UnboundedReceiver<String>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockExtPlaneServer {
    /// Start a server that greets clients with `EXTPLANE 1`.
    pub async fn start() -> Result<Self> {
        Self::start_with_greeting(Some(DEFAULT_GREETING)).await
    }

    /// Start a server with a custom greeting, or none at all.
    pub async fn start_with_greeting(greeting: Option<&str>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock ExtPlane server: {}", e)))?;
        let addr = listener.local_addr().map_err(Error::Io)?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));

        let task = tokio::spawn(accept_loop(
            listener,
            greeting.map(str::to_string),
            control_rx,
            received_tx,
            Arc::clone(&connections),
        ));

        tracing::debug!(addr = %addr, "Mock ExtPlane server listening");
        Ok(Self {
            addr,
            control_tx,
            received: Mutex::new(received_rx),
            connections,
            task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Host part of [`addr`](Self::addr), for `ExtPlaneClient::new`.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send `line` (terminator added) to the current or next client.
    pub fn push_line(&self, line: &str) {
        let _ = self.control_tx.send(Control::Send(line.to_string()));
    }

    /// Close the current connection; the server then waits for a new one.
    pub fn close_connection(&self) {
        let _ = self.control_tx.send(Control::Close);
    }

    /// Next line received from any client, without its terminator.
    pub async fn next_line(&self, timeout: Duration) -> Option<String> {
        let mut received = self.received.lock().await;
        tokio::time::timeout(timeout, received.recv())
            .await
            .ok()
            .flatten()
    }

    /// Collect `count` received lines, panicking if they do not all arrive
    /// within `timeout`.
    pub async fn expect_lines(&self, count: usize, timeout: Duration) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut lines = Vec::with_capacity(count);
        let mut received = self.received.lock().await;
        while lines.len() < count {
            match tokio::time::timeout_at(deadline, received.recv()).await {
                Ok(Some(line)) => lines.push(line),
                _ => panic!(
                    "expected {} lines from client, got {}: {:?}",
                    count,
                    lines.len(),
                    lines
                ),
            }
        }
        lines
    }
}

impl Drop for MockExtPlaneServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    greeting: Option<String>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    received_tx: mpsc::UnboundedSender<String>,
    connections: Arc<AtomicUsize>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "Mock ExtPlane server accept failed");
                return;
            }
        };
        connections.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(peer = %peer, "Mock ExtPlane server accepted connection");

        if let Err(e) = serve(stream, greeting.as_deref(), &mut control_rx, &received_tx).await {
            tracing::debug!(peer = %peer, error = %e, "Mock ExtPlane connection ended with error");
        }
    }
}

/// Serve one client until it disconnects or the test closes the connection.
async fn serve(
    stream: TcpStream,
    greeting: Option<&str>,
    control_rx: &mut mpsc::UnboundedReceiver<Control>,
    received_tx: &mpsc::UnboundedSender<String>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    // `next_line` is cancel safe: a partial line survives a control message.
    let mut lines = BufReader::new(read_half).lines();

    if let Some(greeting) = greeting {
        write_half.write_all(format!("{greeting}\n").as_bytes()).await?;
        write_half.flush().await?;
    }

    loop {
        tokio::select! {
            read = lines.next_line() => {
                let Some(line) = read? else {
                    return Ok(());
                };
                let _ = received_tx.send(line);
            }
            control = control_rx.recv() => match control {
                Some(Control::Send(text)) => {
                    write_half.write_all(format!("{text}\n").as_bytes()).await?;
                    write_half.flush().await?;
                }
                Some(Control::Close) | None => {
                    write_half.shutdown().await?;
                    return Ok(());
                }
            },
        }
    }
}
