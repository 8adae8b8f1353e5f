//! ExtPlane connection facade.
//!
//! [`ExtPlaneClient`] owns the dataref store, the listener registry and the
//! outbound queue, and runs one send loop and one receive loop per session.
//! It is the only type applications need to talk to.
//!
//! Commands are queued, not sent synchronously: `subscribe`, `set_value` and
//! friends return as soon as the command is in the queue, and the queue
//! survives across sessions, so commands issued before `start()` go out as
//! soon as the connection is up. Value getters read the local store and
//! never touch the network.
//!
//! # Example
//!
//! ```no_run
//! use extplane_client::ExtPlaneClient;
//! use extplane_core::DataRef;
//!
//! # async fn example() -> extplane_core::Result<()> {
//! let client = ExtPlaneClient::new("127.0.0.1", 51000);
//! client.start().await?;
//!
//! client.subscribe("sim/cockpit2/gauges/indicators/airspeed_kts_pilot", Some(0.5))?;
//! client.register("sim/cockpit2/gauges/indicators/airspeed_kts_pilot", |dr: &DataRef| {
//!     println!("IAS {:?}", dr.parse_first::<f64>());
//! });
//!
//! client.set_value("sim/cockpit/switches/gear_handle_status", &["1"])?;
//! client.command_once("sim/lights/landing_lights_toggle")?;
//!
//! client.stop().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use extplane_core::error::{Error, Result};
use extplane_core::{ConnectionEvent, DataRef, DataType, LoopState};

use crate::builder::ExtPlaneBuilder;
use crate::codec::{self, Command, OutboundCommand, RuntimeSetting};
use crate::io::{self, HostInfo, LoopStatus, ReceiveContext};
use crate::net;
use crate::queue::OutboundQueue;
use crate::registry::{DataRefListener, ListenerId, NotificationRegistry};
use crate::store::DataRefStore;

/// Default time `stop()` waits for each loop before aborting it.
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Broadcast channel capacity for [`ConnectionEvent`] subscribers.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Options for configuring the connection.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Timeout for establishing the TCP connection in `start()`.
    pub connect_timeout: Duration,
    /// How long `stop()` waits for each loop to wind down before aborting it.
    pub stop_timeout: Duration,
    /// Disable Nagle's algorithm on the session socket.
    pub nodelay: bool,
    /// Capacity of the [`ConnectionEvent`] broadcast channel.
    pub event_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: net::DEFAULT_CONNECT_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            nodelay: true,
            event_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// State of both loops at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub send: LoopState,
    pub receive: LoopState,
}

impl ConnectionStatus {
    /// Both loops are running.
    pub fn is_running(&self) -> bool {
        self.send == LoopState::Running && self.receive == LoopState::Running
    }
}

/// One started connection: the loop tasks and the token that stops them.
struct Session {
    addr: String,
    cancel: CancellationToken,
    send_task: JoinHandle<()>,
    receive_task: JoinHandle<()>,
}

/// Client for the ExtPlane plugin of a flight simulator.
///
/// Safe to share across tasks (`Arc<ExtPlaneClient>`); every method takes
/// `&self`.
pub struct ExtPlaneClient {
    host: String,
    port: u16,
    options: ClientOptions,

    /// Latest value of every known dataref.
    store: Arc<DataRefStore>,

    /// Per-dataref listeners, notified by the receive loop.
    registry: Arc<NotificationRegistry>,

    /// Commands waiting for the send loop. Outlives sessions.
    queue: OutboundQueue,

    /// The running session, if any.
    session: Mutex<Option<Session>>,

    send_status: LoopStatus,
    receive_status: LoopStatus,

    /// Versions announced by the host on the current session.
    host_info: HostInfo,

    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl ExtPlaneClient {
    /// Create a client for `host:port` with default options.
    ///
    /// No connection is made until [`start`](Self::start).
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_options(host, port, ClientOptions::default())
    }

    /// Create a client with custom options.
    pub fn with_options(host: impl Into<String>, port: u16, options: ClientOptions) -> Self {
        let (event_tx, _) = broadcast::channel(options.event_capacity.max(1));
        ExtPlaneClient {
            host: host.into(),
            port,
            options,
            store: Arc::new(DataRefStore::new()),
            registry: Arc::new(NotificationRegistry::new()),
            queue: OutboundQueue::new(),
            session: Mutex::new(None),
            send_status: LoopStatus::new(),
            receive_status: LoopStatus::new(),
            host_info: HostInfo::new(),
            event_tx,
        }
    }

    /// Start configuring a client.
    pub fn builder() -> ExtPlaneBuilder {
        ExtPlaneBuilder::new()
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Connect to the host and start both loops.
    ///
    /// Fails with [`Error::Connection`] if the host cannot be reached (no
    /// state is kept from the failed attempt) and with
    /// [`Error::AlreadyStarted`] if a session exists. A session whose loops
    /// ended on their own still counts until [`stop`](Self::stop) is called.
    pub async fn start(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(Error::AlreadyStarted);
        }

        let addr = self.addr();
        let stream = net::connect(&addr, self.options.connect_timeout, self.options.nodelay).await?;
        let (read_half, write_half) = stream.into_split();

        // Free unless a previous session's send loop is still unwinding.
        let queue_rx = self.queue.acquire().await;

        self.host_info.reset();
        self.send_status.set(LoopState::Running);
        self.receive_status.set(LoopState::Running);

        // Before the loops start, so subscribers see it ahead of the greeting.
        let _ = self.event_tx.send(ConnectionEvent::Connected { addr: addr.clone() });

        let cancel = CancellationToken::new();

        let send_task = tokio::spawn(io::send_loop(
            write_half,
            queue_rx,
            self.send_status.clone(),
            cancel.clone(),
            self.event_tx.clone(),
        ));

        let ctx = ReceiveContext {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            host: self.host_info.clone(),
            event_tx: self.event_tx.clone(),
        };
        let receive_task = tokio::spawn(io::receive_loop(
            BufReader::new(read_half),
            ctx,
            self.receive_status.clone(),
            cancel.clone(),
        ));

        *session = Some(Session {
            addr: addr.clone(),
            cancel,
            send_task,
            receive_task,
        });

        tracing::debug!(addr = %addr, "ExtPlane client started");
        Ok(())
    }

    /// Stop both loops and close the socket.
    ///
    /// Idempotent. Waits up to the configured stop timeout for each loop,
    /// then aborts it. Commands still queued stay queued for the next
    /// session; the store and registrations are kept.
    pub async fn stop(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };

        tracing::debug!(addr = %session.addr, "Stopping ExtPlane client");
        session.cancel.cancel();
        self.send_status.begin_stop();
        self.receive_status.begin_stop();

        let timeout = self.options.stop_timeout;
        join_loop("send", session.send_task, timeout, &self.send_status).await;
        join_loop("receive", session.receive_task, timeout, &self.receive_status).await;

        let _ = self.event_tx.send(ConnectionEvent::Disconnected);
        tracing::debug!(addr = %session.addr, "ExtPlane client stopped");
    }

    /// Check whether the host accepts TCP connections, using a separate
    /// throwaway connection.
    ///
    /// Says nothing about the health of a running session. A zero timeout
    /// returns `false`.
    pub async fn is_reachable(&self, timeout: Duration) -> bool {
        net::probe(&self.addr(), timeout).await
    }

    /// State of the send and receive loops.
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            send: self.send_status.get(),
            receive: self.receive_status.get(),
        }
    }

    /// Both loops are running.
    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// Protocol version from the host's greeting on the current session.
    pub fn protocol_version(&self) -> Option<u32> {
        self.host_info.protocol_version()
    }

    /// ExtPlane plugin build, if the host announced it.
    pub fn plugin_version(&self) -> Option<u32> {
        self.host_info.plugin_version()
    }

    /// Subscribe to connection lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// `host:port` this client connects to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    // -- Datarefs -------------------------------------------------------------

    /// Ask the host to push updates for `name`.
    ///
    /// `accuracy` is the minimum change that triggers an update. The
    /// dataref is known locally (with no value) from this point on.
    pub fn subscribe(&self, name: &str, accuracy: Option<f32>) -> Result<()> {
        let command = Command::Subscribe {
            name: name.to_string(),
            accuracy,
        };
        codec::validate(&command)?;
        self.store.declare(name, accuracy);
        self.enqueue(command)
    }

    /// Stop updates for `name`. The last known value stays readable.
    pub fn unsubscribe(&self, name: &str) -> Result<()> {
        self.send(Command::unsubscribe(name))
    }

    /// Latest snapshot of `name`.
    pub fn get_dataref(&self, name: &str) -> Option<Arc<DataRef>> {
        self.store.get(name)
    }

    /// Latest value components of `name`, if an update has arrived.
    pub fn get_value(&self, name: &str) -> Option<Vec<String>> {
        self.store.get(name)?.values.clone()
    }

    /// Type of `name` as reported by the host, if known.
    pub fn get_type(&self, name: &str) -> Option<DataType> {
        self.store.get(name)?.data_type
    }

    /// Write `values` to `name` (`set <name> <v1> <v2> ...`).
    pub fn set_value<S: AsRef<str>>(&self, name: &str, values: &[S]) -> Result<()> {
        self.send(Command::set(name, values))
    }

    /// Write an array dataref (`set <name> [<v1>,<v2>,...]`).
    pub fn set_array_value<S: AsRef<str>>(&self, name: &str, values: &[S]) -> Result<()> {
        self.send(Command::set_array(name, values))
    }

    // -- Commands and settings ------------------------------------------------

    pub fn send_runtime_setting(&self, setting: RuntimeSetting) -> Result<()> {
        self.send(Command::RuntimeSetting(setting))
    }

    /// Minimum interval between two updates of the same dataref.
    pub fn set_update_interval(&self, interval: Duration) -> Result<()> {
        self.send_runtime_setting(RuntimeSetting::UpdateInterval(interval))
    }

    /// Trigger a simulator command once.
    pub fn command_once(&self, name: &str) -> Result<()> {
        self.send(Command::once(name))
    }

    /// Start holding a simulator command. Pair with [`command_end`](Self::command_end).
    pub fn command_begin(&self, name: &str) -> Result<()> {
        self.send(Command::begin(name))
    }

    pub fn command_end(&self, name: &str) -> Result<()> {
        self.send(Command::end(name))
    }

    pub fn key_press(&self, id: u32) -> Result<()> {
        self.send(Command::Key { id })
    }

    pub fn button_press(&self, id: u32) -> Result<()> {
        self.send(Command::ButtonPress { id })
    }

    pub fn button_release(&self, id: u32) -> Result<()> {
        self.send(Command::ButtonRelease { id })
    }

    /// Validate and queue any command.
    pub fn send(&self, command: Command) -> Result<()> {
        codec::validate(&command)?;
        self.enqueue(command)
    }

    fn enqueue(&self, command: Command) -> Result<()> {
        self.queue.enqueue(OutboundCommand::new(&command))
    }

    // -- Listeners ------------------------------------------------------------

    /// Call `listener` with every new snapshot of `name`.
    ///
    /// Listeners run on the receive loop and must not block.
    pub fn register<L: DataRefListener>(&self, name: &str, listener: L) -> ListenerId {
        self.registry.register(name, listener)
    }

    pub fn register_arc(&self, name: &str, listener: Arc<dyn DataRefListener>) -> ListenerId {
        self.registry.register_arc(name, listener)
    }

    /// Remove a registration. Returns `false` if it was not registered.
    pub fn unregister(&self, name: &str, id: ListenerId) -> bool {
        self.registry.unregister(name, id)
    }

    /// Direct access to the dataref store.
    pub fn store(&self) -> &Arc<DataRefStore> {
        &self.store
    }
}

impl std::fmt::Debug for ExtPlaneClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtPlaneClient")
            .field("addr", &self.addr())
            .field("status", &self.status())
            .field("datarefs", &self.store.len())
            .finish()
    }
}

impl Drop for ExtPlaneClient {
    fn drop(&mut self) {
        // Without an async context the tasks cannot be joined; cancelling
        // lets them close the socket on their own.
        if let Some(session) = self.session.get_mut().take() {
            tracing::debug!(addr = %session.addr, "ExtPlaneClient dropped while running");
            session.cancel.cancel();
        }
    }
}

/// Wait for a loop task, aborting it after `timeout`.
async fn join_loop(name: &'static str, mut task: JoinHandle<()>, timeout: Duration, status: &LoopStatus) {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(loop_name = name, error = %e, "Loop task failed");
        }
        Err(_) => {
            tracing::warn!(
                loop_name = name,
                timeout_ms = timeout.as_millis(),
                "Loop did not stop in time, aborting"
            );
            task.abort();
            let _ = task.await;
        }
    }
    status.set(LoopState::Stopped);
}
