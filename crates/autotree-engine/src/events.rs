//! Expansion progress events.
//!
//! [`ExpansionEvent`]s go out over a [`tokio::sync::broadcast`] channel so
//! observers (the CLI progress log, tests) can follow a tree being built
//! without reaching into the expander.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExpansionEvent {
    TreeStarted {
        surface_goal: String,
    },
    NodeExpanded {
        node_id: String,
        level: u32,
        child_type: String,
        candidates: usize,
        attached: usize,
    },
    CandidateRejected {
        parent_id: String,
        goal: String,
        validation_score: u8,
    },
    NodeAtomic {
        node_id: String,
        goal: String,
        base_score: f64,
    },
    DepthLimitReached {
        node_id: String,
        level: u32,
    },
    TreeCompleted {
        surface_goal: String,
        node_count: usize,
        atomic_count: usize,
        duration_ms: u64,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<ExpansionEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Send to all current subscribers; dropped silently when there are none.
    pub fn emit(&self, event: ExpansionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ExpansionEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
