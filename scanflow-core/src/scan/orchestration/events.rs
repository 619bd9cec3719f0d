use std::fmt;

use async_trait::async_trait;
use scanflow_model::ScanEvent;
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::Result;

/// Receives domain events describing scan progress, failure and completion.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: ScanEvent) -> Result<()>;
}

/// Stream trait so generic consumers can subscribe without depending on the
/// concrete bus type.
pub trait ScanEventStream {
    fn subscribe_scan(&self) -> broadcast::Receiver<ScanEvent>;
}

/// Lightweight in-process event bus that fans scan events out to every
/// subscriber. Publishing never fails when nobody is listening.
pub struct InProcScanEventBus {
    sender: broadcast::Sender<ScanEvent>,
    capacity: usize,
}

impl fmt::Debug for InProcScanEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcScanEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl InProcScanEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for InProcScanEventBus {
    async fn publish(&self, event: ScanEvent) -> Result<()> {
        trace!(
            target: "scan::events",
            event = event.event_name(),
            scan_id = %event.identity().scan_id,
            "publishing scan event"
        );
        let _ = self.sender.send(event);
        Ok(())
    }
}

impl ScanEventStream for InProcScanEventBus {
    fn subscribe_scan(&self) -> broadcast::Receiver<ScanEvent> {
        self.subscribe()
    }
}
