//! In-process notification bus (spec §4.5 supplemental): lets the websocket
//! layer (or any other observer) learn about projection changes without
//! coupling it to the event-processing task's internals.
//!
//! Grounded in the teacher's `InProcJobEventBus`
//! (`ferrex-core/src/orchestration/runtime/event_bus.rs`): a single
//! `tokio::sync::broadcast` channel, a `Debug` impl that reports subscriber
//! counts instead of deriving (receivers aren't `Debug`), and a fire-and-
//! forget `publish` that swallows the "no subscribers" error.

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// One notification the state-builder side emits as the projection changes.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionEvent {
    /// A file was added to the projection, or its virtual path/metadata
    /// changed.
    FileUpserted {
        file_id: String,
        virtual_path: String,
    },
    /// A file was removed from the projection (deleted upstream, or pruned
    /// by a refresh).
    FileRemoved {
        file_id: String,
        virtual_path: String,
    },
    /// A full refresh (spec §4.5 "Refresh") finished reconciling the
    /// projection against the store.
    RefreshCompleted {
        at: DateTime<Utc>,
        file_count: u64,
    },
}

/// A lightweight in-process fan-out of [`ProjectionEvent`]s. Lagging
/// subscribers miss events rather than stalling the publisher — this is a
/// notification channel, not a durable log; the REST query API remains the
/// source of truth for current state.
pub struct ProjectionEventBus {
    sender: broadcast::Sender<ProjectionEvent>,
    capacity: usize,
}

impl fmt::Debug for ProjectionEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl ProjectionEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Fans `event` out to current subscribers. Never fails: with no
    /// subscribers attached there is nothing useful to report, so the send
    /// error is silently discarded.
    pub fn publish(&self, event: ProjectionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProjectionEvent> {
        self.sender.subscribe()
    }
}
