use parking_lot::Mutex;
use pf_types::VersionId;
use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// Events emitted by the auto-tuner for external consumption (logging, UI,
/// alerting).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TunerEvent {
    Queued {
        task_id: TaskId,
        algorithm_key: String,
        priority: i32,
    },
    Started {
        task_id: TaskId,
        algorithm_key: String,
    },
    Progress {
        task_id: TaskId,
        progress: f64,
    },
    Completed {
        task_id: TaskId,
        algorithm_key: String,
        improvement_percentage: f64,
        best_version_id: Option<VersionId>,
    },
    Failed {
        task_id: TaskId,
        algorithm_key: String,
        error: String,
    },
    Cancelled {
        task_id: TaskId,
        algorithm_key: String,
    },
    Activated {
        algorithm_key: String,
        version_id: VersionId,
    },
    StopRequested,
}

/// Fan-out of events to every live subscriber.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<crossbeam_channel::Sender<TunerEvent>>>,
}

impl EventBus {
    pub(crate) fn subscribe(&self) -> crossbeam_channel::Receiver<TunerEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub(crate) fn emit(&self, event: TunerEvent) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        // drop subscribers whose receiver is gone
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_reach_every_subscriber() {
        let bus = EventBus::default();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.emit(TunerEvent::StopRequested);
        assert_eq!(a.try_recv().unwrap(), TunerEvent::StopRequested);
        assert_eq!(b.try_recv().unwrap(), TunerEvent::StopRequested);
    }

    #[test]
    fn closed_subscribers_are_dropped() {
        let bus = EventBus::default();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        bus.emit(TunerEvent::StopRequested);
        assert_eq!(bus.subscribers.lock().len(), 1);
        assert!(kept.try_recv().is_ok());
    }
}
