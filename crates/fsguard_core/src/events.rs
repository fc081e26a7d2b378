//! Typed status events broadcast to subscribers.

use crate::atomic::{OperationKind, OperationStatus};
use crate::conflict::{ConflictKind, ConflictSeverity, ResolutionStrategy};
use crate::integrity::CorruptionKind;
use crate::recovery::RecoveryStrategy;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

/// A status change inside one of the components.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardEvent {
    /// An atomic operation started executing.
    OperationStarted {
        /// Operation ID.
        id: String,
        /// Operation kind.
        kind: OperationKind,
    },
    /// An atomic operation reached a terminal status.
    OperationFinished {
        /// Operation ID.
        id: String,
        /// Terminal status.
        status: OperationStatus,
    },
    /// A lock collision or scan produced a conflict.
    ConflictDetected {
        /// Conflict ID.
        id: String,
        /// Contended path.
        path: PathBuf,
        /// Conflict kind.
        kind: ConflictKind,
        /// Assessed severity.
        severity: ConflictSeverity,
    },
    /// A conflict was resolved.
    ConflictResolved {
        /// Conflict ID.
        id: String,
        /// Strategy that was applied.
        strategy: ResolutionStrategy,
    },
    /// A conflict could not be resolved automatically.
    ConflictEscalated {
        /// Conflict ID.
        id: String,
        /// Why it was escalated.
        reason: String,
    },
    /// Verification found a divergence from the integrity record.
    CorruptionDetected {
        /// Affected file.
        path: PathBuf,
        /// Kind of corruption.
        kind: CorruptionKind,
    },
    /// A recovery scan found an interrupted operation.
    InterruptedOperationFound {
        /// Interrupted operation ID.
        id: String,
    },
    /// An interrupted operation was recovered.
    OperationRecovered {
        /// Interrupted operation ID.
        id: String,
        /// Strategy used.
        strategy: RecoveryStrategy,
    },
    /// An interrupted operation was abandoned.
    OperationAbandoned {
        /// Interrupted operation ID.
        id: String,
    },
}

/// Fan-out of [`GuardEvent`]s over mpsc channels.
///
/// Every live subscriber receives every event; delivery order across
/// subscribers is unspecified. Subscribers whose receiver was dropped are
/// pruned on the next publish.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<GuardEvent>>>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber.
    pub fn subscribe(&self) -> Receiver<GuardEvent> {
        let (tx, rx) = channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    /// Delivers an event to all live subscribers.
    pub fn publish(&self, event: GuardEvent) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Number of live subscribers (as of the last publish).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}
