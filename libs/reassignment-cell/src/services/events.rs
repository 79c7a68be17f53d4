use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ReassignmentError;
use crate::models::EngineEvent;

/// Outbound boundary towards the messaging collaborator and the staff
/// surface. Implementations must not block on external I/O for long; the
/// engine publishes after its state transitions commit and treats delivery
/// failure as a reporting problem, never as a reason to roll back.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: EngineEvent) -> Result<(), ReassignmentError>;
}

/// Event sink backed by an unbounded in-process channel.
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn publish(&self, event: EngineEvent) -> Result<(), ReassignmentError> {
        self.tx
            .send(event)
            .map_err(|e| ReassignmentError::PublishError(e.to_string()))
    }
}
