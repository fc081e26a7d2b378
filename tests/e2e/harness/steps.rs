use std::time::Duration;

use super::assertions::Assertion;

/// One step of a batch, with workspace-relative paths
#[derive(Debug, Clone)]
pub enum BatchAction {
    Write { path: String, content: Vec<u8> },
    Copy { from: String, to: String },
    Move { from: String, to: String },
    Delete { path: String },
    Mkdir { path: String },
}

/// All possible actions in a test scenario
#[derive(Debug)]
pub enum ScenarioStep {
    // Guarded operations
    AtomicWrite {
        path: String,
        content: Vec<u8>,
        backup: bool,
    },
    AtomicMove {
        from: String,
        to: String,
    },
    Batch {
        actions: Vec<BatchAction>,
    },

    // Unguarded changes (another program touching the tree)
    ExternalWrite {
        path: String,
        content: Vec<u8>,
    },
    ExternalDelete {
        path: String,
    },

    // Integrity
    Record {
        path: String,
    },
    ScanIntegrity,

    // Recovery
    RecoverAll,

    // Time control
    Wait {
        duration: Duration,
    },

    // Failure simulation
    Crash,
    InterruptedCopy {
        from: String,
        to: String,
        copied: usize,
    },
    InterruptedWrite {
        path: String,
        content: Vec<u8>,
        staged: usize,
    },
    Restart,

    // Assertions (can be interspersed)
    Assert {
        assertion: Assertion,
    },
}
