//! In-process broadcast of timeline events.
//!
//! Every event the [`TimelineEmitter`](crate::services::TimelineEmitter)
//! persists is also fanned out here, so a process can watch its own
//! pipeline without polling the store. Slow subscribers lose the oldest
//! events rather than blocking publishers.

use crate::models::PipelineEvent;
use std::sync::OnceLock;
use tokio::sync::broadcast;

/// Fan-out channel for [`PipelineEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Slots kept per subscriber before lagging ones start dropping events.
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Creates a bus buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity).0,
        }
    }

    /// Sends `event` to current subscribers and returns how many saw it.
    ///
    /// Publishing with nobody listening is not an error.
    pub fn publish(&self, event: PipelineEvent) -> usize {
        let kind = event.event_type();
        let delivered = self.tx.send(event).unwrap_or(0);
        metrics::counter!("event_bus_published_total", "event_type" => kind).increment(1);
        delivered
    }

    /// Receives every event published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Receives only the events `predicate` accepts.
    #[must_use]
    pub fn subscribe_filtered<F>(&self, predicate: F) -> FilteredReceiver<F>
    where
        F: Fn(&PipelineEvent) -> bool,
    {
        FilteredReceiver {
            rx: self.tx.subscribe(),
            predicate,
        }
    }

    /// Receives events whose type string equals `event_type`.
    #[must_use]
    pub fn subscribe_event_type(
        &self,
        event_type: &'static str,
    ) -> FilteredReceiver<impl Fn(&PipelineEvent) -> bool> {
        self.subscribe_filtered(move |event| event.event_type() == event_type)
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Subscription that skips events its predicate rejects.
pub struct FilteredReceiver<F> {
    rx: broadcast::Receiver<PipelineEvent>,
    predicate: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&PipelineEvent) -> bool,
{
    /// Waits for the next accepted event.
    ///
    /// Lag is counted and skipped over.
    ///
    /// # Errors
    ///
    /// Returns [`broadcast::error::RecvError::Closed`] once the bus is gone.
    pub async fn recv(&mut self) -> Result<PipelineEvent, broadcast::error::RecvError> {
        loop {
            match self.rx.recv().await {
                Ok(event) if (self.predicate)(&event) => return Ok(event),
                Ok(_) => {},
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "Event subscriber lagged");
                    metrics::counter!("event_bus_lagged_total").increment(missed);
                },
                Err(closed) => return Err(closed),
            }
        }
    }
}

/// Process-wide bus shared by every emitter.
#[must_use]
pub fn global_event_bus() -> &'static EventBus {
    static BUS: OnceLock<EventBus> = OnceLock::new();
    BUS.get_or_init(|| EventBus::new(EventBus::DEFAULT_CAPACITY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BasketId, DumpId, ProposalId, TimelineEventKind, WorkspaceId};

    fn event(kind: TimelineEventKind) -> PipelineEvent {
        PipelineEvent::new("test", BasketId::new("b1"), WorkspaceId::new("w1"), kind)
    }

    #[tokio::test]
    async fn test_subscribe_filtered_skips_non_matching() {
        let bus = EventBus::new(16);
        let mut filtered = bus.subscribe_event_type("proposal.approved");

        bus.publish(event(TimelineEventKind::DumpCreated {
            dump_id: DumpId::new("d1"),
        }));
        bus.publish(event(TimelineEventKind::ProposalApproved {
            proposal_id: ProposalId::new("p1"),
            ops_count: 2,
            auto: true,
        }));

        let received = filtered.recv().await.unwrap();
        assert_eq!(received.event_type(), "proposal.approved");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(event(TimelineEventKind::RelationshipsMapped { created: 1 })), 0);
        let mut receiver = bus.subscribe();
        assert_eq!(bus.publish(event(TimelineEventKind::RelationshipsMapped { created: 2 })), 1);
        let received = receiver.recv().await.unwrap();
        assert_eq!(
            received.kind,
            TimelineEventKind::RelationshipsMapped { created: 2 }
        );
    }
}
