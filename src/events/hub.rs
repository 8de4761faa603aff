use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::types::TaskEvent;
use crate::error::BridgeError;

/// Configuration for the event channel
#[derive(Debug, Clone)]
pub struct EventHubConfig {
    /// Bounded queue between workers and the pump
    pub queue_capacity: usize,
    /// Per-subscriber buffer of the broadcast fan-out
    pub broadcast_capacity: usize,
}

impl Default for EventHubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            broadcast_capacity: 1000,
        }
    }
}

/// Event channel: workers push into a bounded queue, a single pump task
/// drains it and fans out to every subscribed transport.
pub struct EventHub {
    queue_tx: RwLock<Option<mpsc::Sender<TaskEvent>>>,
    broadcast_tx: broadcast::Sender<TaskEvent>,
    pump: RwLock<Option<JoinHandle<()>>>,
}

impl EventHub {
    /// Create the hub and start its pump on the current runtime
    pub fn new(config: EventHubConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (broadcast_tx, _) = broadcast::channel(config.broadcast_capacity.max(1));

        let pump = Self::start_pump(queue_rx, broadcast_tx.clone());

        Self {
            queue_tx: RwLock::new(Some(queue_tx)),
            broadcast_tx,
            pump: RwLock::new(Some(pump)),
        }
    }

    fn start_pump(
        mut queue_rx: mpsc::Receiver<TaskEvent>,
        broadcast_tx: broadcast::Sender<TaskEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = queue_rx.recv().await {
                trace!(event = event.name(), task_id = ?event.task_id(), "Broadcasting event");
                // No subscribers is fine: delivery is best-effort
                if broadcast_tx.send(event).is_err() {
                    trace!("No subscribers for event");
                }
            }
            debug!("Event queue closed, pump exiting");
        })
    }

    /// Weak handle for a Context Bridge; fails to upgrade once the hub is closed
    pub fn weak_sender(&self) -> Option<mpsc::WeakSender<TaskEvent>> {
        self.queue_tx.read().as_ref().map(|tx| tx.downgrade())
    }

    /// Push an event that does not belong to a single task
    pub async fn publish(&self, event: TaskEvent) -> Result<(), BridgeError> {
        let sender = self
            .queue_tx
            .read()
            .clone()
            .ok_or_else(|| BridgeError::ContextUnavailable("event hub closed".to_string()))?;

        sender
            .send(event)
            .await
            .map_err(|e| BridgeError::ContextUnavailable(format!("event queue closed: {}", e)))
    }

    /// Subscribe to the fan-out
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.broadcast_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcast_tx.receiver_count()
    }

    pub fn is_closed(&self) -> bool {
        self.queue_tx.read().is_none()
    }

    /// Tear down the channel; queued events are still delivered, later
    /// emissions fail with `ContextUnavailable`.
    pub fn close(&self) -> Option<JoinHandle<()>> {
        if self.queue_tx.write().take().is_some() {
            info!("Event hub closed");
        }
        self.pump.write().take()
    }
}
