//! Events the workflow emits after a transaction commits, and the channel
//! fan-out that delivers them.
//!
//! The engine never awaits consumers: `publish` is a non-blocking send on an
//! unbounded channel per subscriber, and a subscriber that dropped its
//! receiver is pruned on the next publish.

use chrono::Utc;
use crossbeam::channel::{Receiver, Sender, unbounded};
use parking_lot::RwLock;

use crate::types::{ApprovalTier, TimeStamp, VersionStatus};

#[derive(Debug, Clone)]
pub enum ApprovalEvent {
    VersionSubmitted {
        version_id: String,
        token_id: String,
        tier: ApprovalTier,
        at: TimeStamp<Utc>,
    },
    DecisionReached {
        version_id: String,
        outcome: VersionStatus,
        approvals: u64,
        rejections: u64,
        at: TimeStamp<Utc>,
    },
    CascadeApplied {
        root_version_id: String,
        target_version_id: String,
        new_status: VersionStatus,
        at: TimeStamp<Utc>,
    },
    VersionExpired {
        version_id: String,
        at: TimeStamp<Utc>,
    },
    VersionActivated {
        version_id: String,
        replaced: Option<String>,
        at: TimeStamp<Utc>,
    },
}

#[derive(Default)]
pub struct EventDispatcher {
    subscribers: RwLock<Vec<Sender<ApprovalEvent>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ApprovalEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.write().push(tx);
        rx
    }

    /// Fire-and-forget delivery. Dead subscribers are dropped silently.
    pub fn publish(&self, events: &[ApprovalEvent]) {
        if events.is_empty() {
            return;
        }

        let mut subs = self.subscribers.write();
        subs.retain(|tx| events.iter().all(|ev| tx.send(ev.clone()).is_ok()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_fan_out_to_every_subscriber() {
        let dispatcher = EventDispatcher::new();
        let rx_a = dispatcher.subscribe();
        let rx_b = dispatcher.subscribe();

        dispatcher.publish(&[ApprovalEvent::VersionExpired {
            version_id: "ver1x".into(),
            at: TimeStamp::new(),
        }]);

        assert!(matches!(
            rx_a.try_recv().unwrap(),
            ApprovalEvent::VersionExpired { .. }
        ));
        assert!(matches!(
            rx_b.try_recv().unwrap(),
            ApprovalEvent::VersionExpired { .. }
        ));
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let dispatcher = EventDispatcher::new();
        let rx = dispatcher.subscribe();
        drop(rx);

        dispatcher.publish(&[ApprovalEvent::VersionExpired {
            version_id: "ver1x".into(),
            at: TimeStamp::new(),
        }]);

        assert!(dispatcher.subscribers.read().is_empty());
    }
}
