//! Outbound command queue between caller tasks and the send loop.
//!
//! Unbounded and multi-producer: `enqueue` never waits. The single consumer
//! end is held behind an async mutex; the send loop locks it for the
//! lifetime of a session, so commands queued before `start()` or between
//! sessions are delivered by the next session and nothing is lost if a send
//! loop task is aborted.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};

use extplane_core::{Error, Result};

use crate::codec::OutboundCommand;

/// Consumer end of the queue, as held by the send loop.
pub type QueueReceiver = OwnedMutexGuard<mpsc::UnboundedReceiver<OutboundCommand>>;

/// Ordered, unbounded MPSC handoff of rendered commands.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<OutboundCommand>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<OutboundCommand>>>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        OutboundQueue {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Append a command. Never blocks.
    ///
    /// Fails only if the consumer end has been dropped, which cannot happen
    /// while the queue itself is alive.
    pub fn enqueue(&self, command: OutboundCommand) -> Result<()> {
        tracing::trace!(command = %command, "Command queued");
        self.tx.send(command).map_err(|_| Error::QueueClosed)
    }

    /// Take exclusive ownership of the consumer end.
    ///
    /// Waits until a previous holder (an earlier send loop) has released it.
    pub async fn acquire(&self) -> QueueReceiver {
        Arc::clone(&self.rx).lock_owned().await
    }

    /// Take the consumer end if no send loop currently holds it.
    pub fn try_acquire(&self) -> Option<QueueReceiver> {
        Arc::clone(&self.rx).try_lock_owned().ok()
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}
