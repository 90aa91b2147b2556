use tokio::sync::broadcast;

use crate::macros::{MacroId, MacroState};

/// Notifications published by the scheduler and the engines.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroEvent {
    /// A macro moved between lifecycle states.
    StateChanged {
        id: MacroId,
        new: MacroState,
        old: MacroState,
    },
    /// A command finished. `total` is unknown for scripts.
    StepCompleted {
        id: MacroId,
        step: usize,
        total: Option<usize>,
    },
    /// A run failed; published right before its `StateChanged` to `Error`.
    Error { id: MacroId, message: String },
}

impl MacroEvent {
    pub fn id(&self) -> MacroId {
        match self {
            Self::StateChanged { id, .. } | Self::StepCompleted { id, .. } | Self::Error { id, .. } => {
                *id
            }
        }
    }
}

/// Broadcast fan-out of [`MacroEvent`]s. Slow subscribers lag rather than
/// block publishers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MacroEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: MacroEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MacroEvent> {
        self.sender.subscribe()
    }
}
