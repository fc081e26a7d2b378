use super::assertions::Assertion;
use super::runner::ScenarioRunner;
use super::steps::{BatchAction, ScenarioStep};
use fsguard_core::{Config, CorruptionKind, InterruptedStatus, RecoveryStrategy};
use std::collections::HashMap;
use std::time::Duration;

/// Fluent DSL for building test scenarios
pub struct Scenario {
    name: String,
    initial_files: HashMap<String, Vec<u8>>,
    config: Config,
    steps: Vec<ScenarioStep>,
}

impl Scenario {
    /// Create a new scenario with the given name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            initial_files: HashMap::new(),
            config: Config::default(),
            steps: Vec::new(),
        }
    }

    // ===== Initial setup =====

    /// Add a single file to initial workspace
    pub fn with_file(mut self, path: &str, content: &[u8]) -> Self {
        self.initial_files.insert(path.to_string(), content.to_vec());
        self
    }

    /// Adjust the configuration the guard is initialized with
    pub fn with_config(mut self, adjust: impl FnOnce(&mut Config)) -> Self {
        adjust(&mut self.config);
        self
    }

    // ===== Guarded operations =====

    /// Atomically replace a file
    pub fn atomic_write(mut self, path: &str, content: &[u8]) -> Self {
        self.steps.push(ScenarioStep::AtomicWrite {
            path: path.to_string(),
            content: content.to_vec(),
            backup: false,
        });
        self
    }

    /// Atomically replace a file, backing up the old content first
    pub fn atomic_write_with_backup(mut self, path: &str, content: &[u8]) -> Self {
        self.steps.push(ScenarioStep::AtomicWrite {
            path: path.to_string(),
            content: content.to_vec(),
            backup: true,
        });
        self
    }

    /// Atomically move a file
    pub fn atomic_move(mut self, from: &str, to: &str) -> Self {
        self.steps.push(ScenarioStep::AtomicMove {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    /// Run several steps as one operation
    pub fn batch(mut self, actions: Vec<BatchAction>) -> Self {
        self.steps.push(ScenarioStep::Batch { actions });
        self
    }

    // ===== Unguarded changes =====

    /// Another program overwrites a file
    pub fn external_write(mut self, path: &str, content: &[u8]) -> Self {
        self.steps.push(ScenarioStep::ExternalWrite {
            path: path.to_string(),
            content: content.to_vec(),
        });
        self
    }

    /// Another program deletes a file
    pub fn external_delete(mut self, path: &str) -> Self {
        self.steps.push(ScenarioStep::ExternalDelete {
            path: path.to_string(),
        });
        self
    }

    // ===== Integrity =====

    /// Record a file's checksum
    pub fn record(mut self, path: &str) -> Self {
        self.steps.push(ScenarioStep::Record {
            path: path.to_string(),
        });
        self
    }

    /// Record every file in the workspace
    pub fn scan_integrity(mut self) -> Self {
        self.steps.push(ScenarioStep::ScanIntegrity);
        self
    }

    // ===== Recovery =====

    /// Apply every confident recovery plan
    pub fn recover_all(mut self) -> Self {
        self.steps.push(ScenarioStep::RecoverAll);
        self
    }

    // ===== Time control =====

    /// Advance time by duration
    pub fn wait(mut self, duration: Duration) -> Self {
        self.steps.push(ScenarioStep::Wait { duration });
        self
    }

    /// Advance time by hours
    pub fn wait_hours(self, hours: u64) -> Self {
        self.wait(Duration::from_secs(hours * 3600))
    }

    /// Advance time by days
    pub fn wait_days(self, days: u64) -> Self {
        self.wait(Duration::from_secs(days * 86400))
    }

    // ===== Failure simulation =====

    /// The guarded process dies, leaving its LOCK behind
    pub fn crash(mut self) -> Self {
        self.steps.push(ScenarioStep::Crash);
        self
    }

    /// Leave behind a copy that died after `copied` bytes
    pub fn interrupted_copy(mut self, from: &str, to: &str, copied: usize) -> Self {
        self.steps.push(ScenarioStep::InterruptedCopy {
            from: from.to_string(),
            to: to.to_string(),
            copied,
        });
        self
    }

    /// Leave behind a write that died after staging `staged` bytes
    pub fn interrupted_write(mut self, path: &str, content: &[u8], staged: usize) -> Self {
        self.steps.push(ScenarioStep::InterruptedWrite {
            path: path.to_string(),
            content: content.to_vec(),
            staged,
        });
        self
    }

    /// Reopen the guard after a crash
    pub fn restart(mut self) -> Self {
        self.steps.push(ScenarioStep::Restart);
        self
    }

    // ===== Assertions =====

    /// Add a custom assertion
    pub fn assert(mut self, assertion: Assertion) -> Self {
        self.steps.push(ScenarioStep::Assert { assertion });
        self
    }

    /// Assert a file's exact content
    pub fn assert_file(self, path: &str, content: &[u8]) -> Self {
        self.assert(Assertion::FileContent {
            path: path.to_string(),
            content: content.to_vec(),
        })
    }

    /// Assert a file does not exist
    pub fn assert_missing(self, path: &str) -> Self {
        self.assert(Assertion::FileMissing {
            path: path.to_string(),
        })
    }

    /// Assert no staging files remain
    pub fn assert_no_partials(self) -> Self {
        self.assert(Assertion::NoPartialFiles)
    }

    /// Assert the last guarded operation succeeded
    pub fn assert_succeeded(self) -> Self {
        self.assert(Assertion::LastOperationSucceeded)
    }

    /// Assert the last guarded operation failed
    pub fn assert_failed(self) -> Self {
        self.assert(Assertion::LastOperationFailed)
    }

    /// Assert a divergence of `kind` on `path`
    pub fn assert_corruption(self, path: &str, kind: CorruptionKind) -> Self {
        self.assert(Assertion::Corruption {
            path: path.to_string(),
            kind,
        })
    }

    /// Assert the number of interrupted operations known
    pub fn assert_interrupted(self, count: usize) -> Self {
        self.assert(Assertion::InterruptedCount(count))
    }

    /// Assert the plan for the interrupted operation on `target`
    pub fn assert_plan(self, target: &str, strategy: RecoveryStrategy, status: InterruptedStatus) -> Self {
        self.assert(Assertion::PlannedStrategy {
            target: target.to_string(),
            strategy,
            status,
        })
    }

    // ===== Execution =====

    /// Execute the scenario
    pub fn run(self) -> ScenarioResult {
        let mut runner = match ScenarioRunner::new(self.initial_files, self.config) {
            Ok(r) => r,
            Err(e) => {
                return ScenarioResult {
                    name: self.name,
                    success: false,
                    steps_executed: 0,
                    failure_step: Some(0),
                    error: Some(format!("Failed to create runner: {}", e)),
                }
            }
        };

        match runner.execute(&self.steps) {
            Ok(()) => ScenarioResult {
                name: self.name,
                success: true,
                steps_executed: self.steps.len(),
                failure_step: None,
                error: None,
            },
            Err(e) => {
                let failure_step = runner.current_step();
                ScenarioResult {
                    name: self.name,
                    success: false,
                    steps_executed: failure_step,
                    failure_step: Some(failure_step),
                    error: Some(format!("{:?}", e)),
                }
            }
        }
    }
}

/// Result of running a scenario
#[derive(Debug)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub steps_executed: usize,
    pub failure_step: Option<usize>,
    pub error: Option<String>,
}

impl ScenarioResult {
    /// Unwrap the result, panicking if it failed
    pub fn unwrap(self) {
        if !self.success {
            panic!(
                "Scenario '{}' failed at step {}: {}",
                self.name,
                self.failure_step.unwrap_or(0),
                self.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
    }
}
