use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::kernel::event::TurnEvent;
use crate::outputs::realizer::{realize_outcome, realize_progress};

/// Hands turn events to whatever presentation layer is listening.
pub trait ResultPublisher: Send + Sync {
    fn publish(&self, session_id: &str, event: &TurnEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullPublisher;

impl ResultPublisher for NullPublisher {
    fn publish(&self, _session_id: &str, _event: &TurnEvent) {}
}

/// Writes realized text to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPublisher;

impl ResultPublisher for TracingPublisher {
    fn publish(&self, session_id: &str, event: &TurnEvent) {
        match event {
            TurnEvent::Interpreted { verb, op, confidence } => {
                debug!(session_id, ?verb, ?op, confidence, "Interpreted");
            }
            TurnEvent::Preview { lines, .. } => {
                for line in lines {
                    info!(session_id, "{}", line);
                }
            }
            TurnEvent::Progress(progress) => debug!(session_id, "{}", realize_progress(progress)),
            TurnEvent::Completed(outcome) => {
                for line in realize_outcome(outcome) {
                    info!(session_id, "{}", line);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub session_id: String,
    pub event: TurnEvent,
}

/// Fan-out to any number of subscribers. Slow subscribers lag and drop
/// events; publishing never blocks.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<PublishedEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.tx.subscribe()
    }
}

impl ResultPublisher for BroadcastPublisher {
    fn publish(&self, session_id: &str, event: &TurnEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(PublishedEvent {
            session_id: session_id.to_string(),
            event: event.clone(),
        });
    }
}
