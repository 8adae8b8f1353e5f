//! Send and receive loops.
//!
//! Each session runs two tokio tasks, one per socket half:
//!
//! - the **send loop** drains the [`OutboundQueue`](crate::queue::OutboundQueue)
//!   in FIFO order and writes one line per command;
//! - the **receive loop** reads lines, decodes them, publishes updates to
//!   the [`DataRefStore`] and then notifies the [`NotificationRegistry`].
//!
//! Both loops use `tokio::select! { biased; }` so a cancellation request
//! wins over new work. An in-flight write or listener call is never
//! interrupted; cancellation is observed at the next wait point.
//!
//! Neither loop returns errors to callers. Failures are logged, the loop's
//! [`LoopStatus`] moves to [`LoopState::Stopped`] and a
//! [`ConnectionEvent`] reports the reason.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use extplane_core::{ConnectionEvent, LoopState};

use crate::codec::{self, InboundMessage, OutboundCommand};
use crate::net::map_io_error;
use crate::queue::QueueReceiver;
use crate::registry::NotificationRegistry;
use crate::store::DataRefStore;

/// Longest inbound line accepted, newline included. Longer lines are
/// dropped up to their terminating newline.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Shared, lock-free view of one loop's [`LoopState`].
#[derive(Debug, Clone, Default)]
pub struct LoopStatus(Arc<AtomicU8>);

impl LoopStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> LoopState {
        LoopState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: LoopState) {
        self.0.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Move `Running` to `Stopping`. A loop that already stopped on its own
    /// stays `Stopped`.
    pub fn begin_stop(&self) -> bool {
        self.0
            .compare_exchange(
                LoopState::Running.as_u8(),
                LoopState::Stopping.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}

/// Versions announced by the host. Zero means "not announced yet".
#[derive(Debug, Clone, Default)]
pub struct HostInfo {
    pub(crate) protocol_version: Arc<AtomicU32>,
    pub(crate) plugin_version: Arc<AtomicU32>,
}

impl HostInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Protocol version from the `EXTPLANE <n>` greeting.
    pub fn protocol_version(&self) -> Option<u32> {
        non_zero(self.protocol_version.load(Ordering::SeqCst))
    }

    /// Plugin build from the `EXTPLANE-VERSION <n>` line.
    pub fn plugin_version(&self) -> Option<u32> {
        non_zero(self.plugin_version.load(Ordering::SeqCst))
    }

    pub(crate) fn reset(&self) {
        self.protocol_version.store(0, Ordering::SeqCst);
        self.plugin_version.store(0, Ordering::SeqCst);
    }
}

fn non_zero(v: u32) -> Option<u32> {
    (v != 0).then_some(v)
}

/// Everything the receive loop publishes into.
#[derive(Debug, Clone)]
pub struct ReceiveContext {
    pub store: Arc<DataRefStore>,
    pub registry: Arc<NotificationRegistry>,
    pub host: HostInfo,
    pub event_tx: broadcast::Sender<ConnectionEvent>,
}

// ---------------------------------------------------------------------------
// Send loop
// ---------------------------------------------------------------------------

/// Drain the outbound queue onto `writer` until cancelled or a write fails.
///
/// Holds the queue's consumer end for its whole lifetime; dropping it on
/// exit hands undelivered commands to the next session. A command whose
/// write failed is not retried.
pub async fn send_loop<W>(
    mut writer: W,
    mut queue: QueueReceiver,
    status: LoopStatus,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<ConnectionEvent>,
) where
    W: AsyncWrite + Unpin + Send,
{
    status.set(LoopState::Running);
    tracing::debug!("Send loop started");

    let error = loop {
        let command = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!("Send loop cancelled");
                break None;
            }

            next = queue.recv() => match next {
                Some(command) => command,
                None => break Some("outbound queue closed".to_string()),
            },
        };

        if let Err(e) = write_command(&mut writer, &command).await {
            let err = map_io_error(&e);
            tracing::error!(command = %command, error = %err, "Failed to send command");
            break Some(err.to_string());
        }
        tracing::trace!(command = %command, "Command sent");
    };

    if let Err(e) = writer.shutdown().await {
        tracing::debug!(error = %e, "Failed to shut down write half");
    }

    status.set(LoopState::Stopped);
    tracing::debug!(error = ?error, "Send loop stopped");
    let _ = event_tx.send(ConnectionEvent::SendLoopStopped { error });
}

async fn write_command<W>(writer: &mut W, command: &OutboundCommand) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&command.to_wire()).await?;
    writer.flush().await
}

// ---------------------------------------------------------------------------
// Receive loop
// ---------------------------------------------------------------------------

/// Read and dispatch inbound lines until cancelled, end of stream or a read
/// error.
///
/// Lines are split on `\n` with an optional `\r` stripped; invalid UTF-8 is
/// replaced rather than rejected. Lines over [`MAX_LINE_LEN`] are skipped.
pub async fn receive_loop<R>(
    mut reader: R,
    ctx: ReceiveContext,
    status: LoopStatus,
    cancel: CancellationToken,
) where
    R: AsyncBufRead + Unpin + Send,
{
    status.set(LoopState::Running);
    tracing::debug!("Receive loop started");

    let mut buf = Vec::with_capacity(256);
    let mut discarding = false;
    let error = loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_LEN as u64);
        let read = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!("Receive loop cancelled");
                break None;
            }

            read = limited.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => {
                tracing::debug!("Connection closed by host");
                break Some("connection closed by host".to_string());
            }
            Ok(n) if n == MAX_LINE_LEN && buf.last() != Some(&b'\n') => {
                if !discarding {
                    tracing::warn!(limit = MAX_LINE_LEN, "Line from host too long, discarding");
                }
                discarding = true;
            }
            Ok(_) if discarding => {
                // Tail of an oversized line.
                discarding = false;
            }
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                if line.trim().is_empty() {
                    continue;
                }
                dispatch_line(line, &ctx);
            }
            Err(e) => {
                let err = map_io_error(&e);
                tracing::error!(error = %err, "Failed to read from host");
                break Some(err.to_string());
            }
        }
    };

    status.set(LoopState::Stopped);
    tracing::debug!(error = ?error, "Receive loop stopped");
    let _ = ctx
        .event_tx
        .send(ConnectionEvent::ReceiveLoopStopped { error });
}

/// Decode one line and route it.
fn dispatch_line(line: &str, ctx: &ReceiveContext) {
    tracing::trace!(line = %line, "Line received");

    match codec::parse_line(line) {
        Ok(InboundMessage::Update(update)) => {
            let snapshot = ctx.store.apply_update(&update);
            let delivered = ctx.registry.notify(&snapshot);
            tracing::trace!(
                dataref = %snapshot.name,
                data_type = %update.data_type,
                listeners = delivered,
                "Dataref updated"
            );
        }
        Ok(InboundMessage::Greeting(version)) => {
            ctx.host.protocol_version.store(version, Ordering::SeqCst);
            tracing::info!(version, "ExtPlane host greeting received");
            let _ = ctx.event_tx.send(ConnectionEvent::Greeting { version });
        }
        Ok(InboundMessage::ServerVersion(build)) => {
            ctx.host.plugin_version.store(build, Ordering::SeqCst);
            tracing::debug!(build, "ExtPlane plugin version received");
        }
        Ok(InboundMessage::Warning(text)) => {
            tracing::warn!(message = %text, "ExtPlane host warning");
        }
        Ok(InboundMessage::Unrecognized(line)) => {
            tracing::debug!(line = %line, "Unrecognized line from host");
        }
        Err(e) => {
            tracing::debug!(error = %e, line = %line, "Failed to parse line");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Command;
    use crate::queue::OutboundQueue;
    use extplane_core::{DataRef, DataType};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, BufReader};

    const WAIT: Duration = Duration::from_secs(2);

    fn context() -> (ReceiveContext, broadcast::Receiver<ConnectionEvent>) {
        let (event_tx, event_rx) = broadcast::channel(16);
        let ctx = ReceiveContext {
            store: Arc::new(DataRefStore::new()),
            registry: Arc::new(NotificationRegistry::new()),
            host: HostInfo::new(),
            event_tx,
        };
        (ctx, event_rx)
    }

    fn failing_listener(_: &DataRef) {
        panic!("listener failure");
    }

    async fn wait_for_state(status: &LoopStatus, state: LoopState) {
        tokio::time::timeout(WAIT, async {
            while status.get() != state {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("loop did not reach expected state");
    }

    // -- Send loop ------------------------------------------------------------

    #[tokio::test]
    async fn send_loop_writes_in_fifo_order() {
        let queue = OutboundQueue::new();
        queue
            .enqueue(Command::subscribe_with_accuracy("sim/a", 0.1).into())
            .unwrap();
        queue.enqueue(Command::set("sim/b", &["1.0"]).into()).unwrap();
        queue.enqueue(Command::once("sim/c").into()).unwrap();

        let (client_end, mut host_end) = tokio::io::duplex(1024);
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let status = LoopStatus::new();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(send_loop(
            client_end,
            queue.acquire().await,
            status.clone(),
            cancel.clone(),
            event_tx,
        ));

        let expected = "sub sim/a 0.1\nset sim/b 1.0\ncmd once sim/c\n";
        let mut got = vec![0u8; expected.len()];
        tokio::time::timeout(WAIT, host_end.read_exact(&mut got))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(String::from_utf8(got).unwrap(), expected);
        assert_eq!(status.get(), LoopState::Running);

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(status.get(), LoopState::Stopped);
        assert_eq!(
            event_rx.recv().await.unwrap(),
            ConnectionEvent::SendLoopStopped { error: None }
        );
    }

    #[tokio::test]
    async fn cancelled_send_loop_releases_queue() {
        let queue = OutboundQueue::new();
        let (client_end, _host_end) = tokio::io::duplex(1024);
        let (event_tx, _) = broadcast::channel(16);
        let status = LoopStatus::new();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(send_loop(
            client_end,
            queue.acquire().await,
            status.clone(),
            cancel.clone(),
            event_tx,
        ));
        wait_for_state(&status, LoopState::Running).await;

        cancel.cancel();
        task.await.unwrap();

        // Queued after the loop ended: delivered by whoever holds the queue next.
        queue.enqueue(Command::unsubscribe("sim/a").into()).unwrap();
        let mut rx = queue.try_acquire().expect("queue should be released");
        assert_eq!(rx.recv().await.unwrap().line(), "unsub sim/a");
    }

    #[tokio::test]
    async fn send_loop_stops_on_write_failure() {
        let queue = OutboundQueue::new();
        let (client_end, host_end) = tokio::io::duplex(64);
        drop(host_end);

        let (event_tx, mut event_rx) = broadcast::channel(16);
        let status = LoopStatus::new();
        queue.enqueue(Command::subscribe("sim/a").into()).unwrap();
        queue.enqueue(Command::subscribe("sim/b").into()).unwrap();

        let task = tokio::spawn(send_loop(
            client_end,
            queue.acquire().await,
            status.clone(),
            CancellationToken::new(),
            event_tx,
        ));
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();

        assert_eq!(status.get(), LoopState::Stopped);
        match event_rx.recv().await.unwrap() {
            ConnectionEvent::SendLoopStopped { error: Some(msg) } => {
                assert!(msg.contains("transport error"), "got: {msg}");
            }
            other => panic!("expected SendLoopStopped with error, got: {other:?}"),
        }

        // The failed command is not retried; the next one is still queued.
        let mut rx = queue.try_acquire().unwrap();
        assert_eq!(rx.recv().await.unwrap().line(), "sub sim/b");
    }

    // -- Receive loop ---------------------------------------------------------

    #[tokio::test]
    async fn receive_loop_updates_store_and_notifies() {
        let (ctx, _events) = context();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        ctx.registry.register("sim/x", move |dr: &DataRef| {
            assert_eq!(dr.first_value(), Some("1.5"));
            s.fetch_add(1, Ordering::SeqCst);
        });

        let (mut host_end, client_end) = tokio::io::duplex(1024);
        let status = LoopStatus::new();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(receive_loop(
            BufReader::new(client_end),
            ctx.clone(),
            status.clone(),
            cancel.clone(),
        ));

        host_end.write_all(b"uf sim/x 1.5\r\n").await.unwrap();
        tokio::time::timeout(WAIT, async {
            while seen.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let dr = ctx.store.get("sim/x").unwrap();
        assert_eq!(dr.data_type, Some(DataType::Float));
        assert_eq!(dr.first_value(), Some("1.5"));

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(status.get(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn store_is_updated_before_listeners_run() {
        let (ctx, _events) = context();
        let consistent = Arc::new(AtomicBool::new(false));
        let store = Arc::clone(&ctx.store);
        let c = Arc::clone(&consistent);
        ctx.registry.register("sim/y", move |dr: &DataRef| {
            let stored = store.get(&dr.name).unwrap();
            c.store(stored.values == dr.values, Ordering::SeqCst);
        });

        let (mut host_end, client_end) = tokio::io::duplex(1024);
        let status = LoopStatus::new();
        let task = tokio::spawn(receive_loop(
            BufReader::new(client_end),
            ctx.clone(),
            status.clone(),
            CancellationToken::new(),
        ));

        host_end.write_all(b"uia sim/y [1,2,3]\n").await.unwrap();
        drop(host_end);
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();

        assert!(consistent.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn receive_loop_records_greeting_and_skips_garbage() {
        let (ctx, mut events) = context();
        let (mut host_end, client_end) = tokio::io::duplex(1024);
        let status = LoopStatus::new();
        let task = tokio::spawn(receive_loop(
            BufReader::new(client_end),
            ctx.clone(),
            status.clone(),
            CancellationToken::new(),
        ));

        host_end
            .write_all(
                b"EXTPLANE 1\nEXTPLANE-VERSION 1002\ngarbage line\n\n\
                  EXTPLANE-WARNING unknown dataref\nsim/z int 4\n",
            )
            .await
            .unwrap();
        drop(host_end);
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();

        assert_eq!(ctx.host.protocol_version(), Some(1));
        assert_eq!(ctx.host.plugin_version(), Some(1002));
        assert_eq!(ctx.store.get("sim/z").unwrap().parse_first::<i32>(), Some(4));
        assert_eq!(ctx.store.len(), 1);

        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Greeting { version: 1 }
        );
        match events.recv().await.unwrap() {
            ConnectionEvent::ReceiveLoopStopped { error: Some(msg) } => {
                assert!(msg.contains("closed"), "got: {msg}");
            }
            other => panic!("expected ReceiveLoopStopped, got: {other:?}"),
        }
        assert_eq!(status.get(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn panicking_listener_does_not_stop_receive_loop() {
        let (ctx, _events) = context();
        ctx.registry.register("sim/bad", failing_listener);
        let (mut host_end, client_end) = tokio::io::duplex(1024);
        let status = LoopStatus::new();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(receive_loop(
            BufReader::new(client_end),
            ctx.clone(),
            status.clone(),
            cancel.clone(),
        ));

        host_end
            .write_all(b"ui sim/bad 1\nui sim/good 2\n")
            .await
            .unwrap();
        tokio::time::timeout(WAIT, async {
            while ctx.store.get("sim/good").is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(status.get(), LoopState::Running);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_line_is_skipped() {
        let (ctx, _events) = context();
        let (mut host_end, client_end) = tokio::io::duplex(4096);
        let task = tokio::spawn(receive_loop(
            BufReader::new(client_end),
            ctx.clone(),
            LoopStatus::new(),
            CancellationToken::new(),
        ));

        let mut flood = b"uf sim/huge ".to_vec();
        flood.resize(MAX_LINE_LEN * 2 + 17, b'9');
        flood.extend_from_slice(b"\nuf sim/after 2.0\n");
        host_end.write_all(&flood).await.unwrap();
        drop(host_end);
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();

        assert!(ctx.store.get("sim/huge").is_none());
        assert_eq!(ctx.store.get("sim/after").unwrap().first_value(), Some("2.0"));
        assert_eq!(ctx.store.len(), 1);
    }

    #[test]
    fn begin_stop_only_from_running() {
        let status = LoopStatus::new();
        assert!(!status.begin_stop());
        assert_eq!(status.get(), LoopState::Idle);

        status.set(LoopState::Running);
        assert!(status.begin_stop());
        assert_eq!(status.get(), LoopState::Stopping);

        status.set(LoopState::Stopped);
        assert!(!status.begin_stop());
        assert_eq!(status.get(), LoopState::Stopped);
    }

    #[test]
    fn host_info_defaults_to_unknown() {
        let info = HostInfo::new();
        assert_eq!(info.protocol_version(), None);
        info.protocol_version.store(1, Ordering::SeqCst);
        assert_eq!(info.protocol_version(), Some(1));
        info.reset();
        assert_eq!(info.protocol_version(), None);
    }
}
