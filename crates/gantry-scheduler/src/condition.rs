//! The system condition seam.

use tokio::sync::watch;

use gantry_core::SystemSnapshot;

/// Supplies system condition snapshots and change notifications.
///
/// How the snapshot is produced (OS signals, polling, test fixtures) is
/// outside the core; the scheduler only consumes it.
pub trait ConditionSource: Send + Sync {
    /// The latest snapshot.
    fn current(&self) -> SystemSnapshot;

    /// Subscribe to snapshot changes. Each change becomes a scheduler
    /// trigger.
    fn subscribe(&self) -> watch::Receiver<SystemSnapshot>;
}

/// Condition source backed by a watch channel, updated by hand.
///
/// Used by hosts with no OS integration and by tests driving constraint
/// transitions.
pub struct StaticConditionSource {
    tx: watch::Sender<SystemSnapshot>,
}

impl StaticConditionSource {
    /// Create a source reporting the given snapshot.
    pub fn new(initial: SystemSnapshot) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Source whose snapshot satisfies every constraint.
    pub fn permissive() -> Self {
        Self::new(SystemSnapshot::permissive())
    }

    /// Replace the snapshot, notifying subscribers.
    pub fn set(&self, snapshot: SystemSnapshot) {
        self.tx.send_replace(snapshot);
    }
}

impl Default for StaticConditionSource {
    fn default() -> Self {
        Self::new(SystemSnapshot::default())
    }
}

impl ConditionSource for StaticConditionSource {
    fn current(&self) -> SystemSnapshot {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<SystemSnapshot> {
        self.tx.subscribe()
    }
}
