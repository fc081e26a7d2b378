use super::assertions::Assertion;
use super::clock::MockClock;
use super::steps::{BatchAction, ScenarioStep};
use super::workspace::TestWorkspace;
use anyhow::{anyhow, Context, Result};
use fsguard_core::{
    partial_path, BatchStep, Config, Guard, LockSidecar, OperationKind, OperationOptions,
    OperationProgress, OperationResult, RecoveryResult, SidecarStore, StateLockRecord,
    LOCK_FILE,
};
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

/// PID that never belongs to a live process.
pub const DEAD_PID: u32 = u32::MAX - 1;

/// Executes scenarios against a real guard
pub struct ScenarioRunner {
    workspace: TestWorkspace,
    guard: Option<Guard>,
    clock: MockClock,
    crashed: bool,
    current_step: usize,
    last_result: Option<OperationResult>,
    recovery_results: Vec<RecoveryResult>,
}

impl ScenarioRunner {
    /// Create a new runner with initial files
    pub fn new(initial_files: HashMap<String, Vec<u8>>, config: Config) -> Result<Self> {
        let workspace = TestWorkspace::with_files(initial_files)?;
        let clock = MockClock::new();
        let guard = workspace.init_guard(config, &clock)?;

        Ok(Self {
            workspace,
            guard: Some(guard),
            clock,
            crashed: false,
            current_step: 0,
            last_result: None,
            recovery_results: Vec::new(),
        })
    }

    /// Get current step number
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Execute all steps in sequence
    pub fn execute(&mut self, steps: &[ScenarioStep]) -> Result<()> {
        for (i, step) in steps.iter().enumerate() {
            self.current_step = i;
            self.execute_step(step)
                .with_context(|| format!("Step {}: {:?}", i, step))?;
        }
        Ok(())
    }

    fn execute_step(&mut self, step: &ScenarioStep) -> Result<()> {
        match step {
            ScenarioStep::AtomicWrite {
                path,
                content,
                backup,
            } => self.handle_atomic_write(path, content, *backup),
            ScenarioStep::AtomicMove { from, to } => self.handle_atomic_move(from, to),
            ScenarioStep::Batch { actions } => self.handle_batch(actions),

            ScenarioStep::ExternalWrite { path, content } => self.workspace.write_file(path, content),
            ScenarioStep::ExternalDelete { path } => self.workspace.delete_file(path),

            ScenarioStep::Record { path } => self.handle_record(path),
            ScenarioStep::ScanIntegrity => self.handle_scan(),

            ScenarioStep::RecoverAll => self.handle_recover_all(),

            ScenarioStep::Wait { duration } => self.handle_wait(*duration),

            ScenarioStep::Crash => self.handle_crash(),
            ScenarioStep::InterruptedCopy { from, to, copied } => {
                self.handle_interrupted_copy(from, to, *copied)
            }
            ScenarioStep::InterruptedWrite {
                path,
                content,
                staged,
            } => self.handle_interrupted_write(path, content, *staged),
            ScenarioStep::Restart => self.handle_restart(),

            ScenarioStep::Assert { assertion } => self.handle_assertion(assertion),
        }
    }

    fn guard(&self) -> Result<&Guard> {
        self.guard
            .as_ref()
            .ok_or_else(|| anyhow!("Guard not available (crashed?)"))
    }

    // ===== Guarded operations =====

    fn handle_atomic_write(&mut self, path: &str, content: &[u8], backup: bool) -> Result<()> {
        let opts = if backup {
            OperationOptions::with_backup()
        } else {
            OperationOptions::default()
        };
        let result = self
            .guard()?
            .atomic()
            .atomic_write(self.workspace.abs(path), content, opts);
        self.last_result = Some(result);
        Ok(())
    }

    fn handle_atomic_move(&mut self, from: &str, to: &str) -> Result<()> {
        let result = self.guard()?.atomic().atomic_move(
            self.workspace.abs(from),
            self.workspace.abs(to),
            OperationOptions::default(),
        );
        self.last_result = Some(result);
        Ok(())
    }

    fn handle_batch(&mut self, actions: &[BatchAction]) -> Result<()> {
        let ws = &self.workspace;
        let steps: Vec<BatchStep> = actions
            .iter()
            .map(|action| match action {
                BatchAction::Write { path, content } => BatchStep::write(ws.abs(path), content.clone()),
                BatchAction::Copy { from, to } => BatchStep::copy_file(ws.abs(from), ws.abs(to)),
                BatchAction::Move { from, to } => BatchStep::move_file(ws.abs(from), ws.abs(to)),
                BatchAction::Delete { path } => BatchStep::delete(ws.abs(path)),
                BatchAction::Mkdir { path } => BatchStep::mkdir(ws.abs(path)),
            })
            .collect();
        let result = self
            .guard()?
            .atomic()
            .atomic_batch(steps, OperationOptions::default());
        self.last_result = Some(result);
        Ok(())
    }

    // ===== Integrity =====

    fn handle_record(&mut self, path: &str) -> Result<()> {
        self.guard()?
            .integrity()
            .create_integrity_record(self.workspace.abs(path), Default::default())?;
        Ok(())
    }

    fn handle_scan(&mut self) -> Result<()> {
        self.guard()?
            .integrity()
            .scan_directory(self.workspace.path(), true)?;
        Ok(())
    }

    // ===== Recovery =====

    fn handle_recover_all(&mut self) -> Result<()> {
        self.recovery_results = self.guard()?.recovery().recover_all_operations();
        Ok(())
    }

    // ===== Time control =====

    fn handle_wait(&mut self, duration: Duration) -> Result<()> {
        self.clock.advance(duration);
        Ok(())
    }

    // ===== Failure simulation =====

    fn handle_crash(&mut self) -> Result<()> {
        // Dropping releases LOCK; rewrite it as a dead holder would leave it
        self.guard = None;
        StateLockRecord {
            process_id: DEAD_PID,
            session_id: "crashed".to_string(),
            acquired_at: self.clock.now(),
        }
        .write(&self.workspace.state_dir().join(LOCK_FILE))?;
        self.crashed = true;
        Ok(())
    }

    fn sidecars(&self) -> SidecarStore {
        SidecarStore::new(self.workspace.state_dir().join("locks"))
    }

    fn handle_interrupted_copy(&mut self, from: &str, to: &str, copied: usize) -> Result<()> {
        if !self.crashed {
            return Err(anyhow!("Interrupted operations are staged while crashed"));
        }
        let source = self.workspace.abs(from);
        let target = self.workspace.abs(to);
        let data = fs::read(&source)?;
        let id = format!("crashed-copy-{}", self.current_step);
        let staging = partial_path(&target, &id);
        fs::write(&staging, &data[..copied.min(data.len())])?;

        let now = self.clock.now();
        self.sidecars().write(&LockSidecar {
            operation_id: id,
            kind: OperationKind::Copy,
            source: Some(source),
            target: Some(target),
            progress: OperationProgress::new(data.len() as u64, copied as u64),
            process_id: DEAD_PID,
            session_id: "crashed-session".to_string(),
            temp_files: vec![staging],
            created_at: now,
            updated_at: now,
        })?;
        Ok(())
    }

    fn handle_interrupted_write(&mut self, path: &str, content: &[u8], staged: usize) -> Result<()> {
        if !self.crashed {
            return Err(anyhow!("Interrupted operations are staged while crashed"));
        }
        let target = self.workspace.abs(path);
        let id = format!("crashed-write-{}", self.current_step);
        let staging = partial_path(&target, &id);
        fs::write(&staging, &content[..staged.min(content.len())])?;

        let now = self.clock.now();
        self.sidecars().write(&LockSidecar {
            operation_id: id,
            kind: OperationKind::Write,
            source: None,
            target: Some(target),
            progress: OperationProgress::new(content.len() as u64, staged as u64),
            process_id: DEAD_PID,
            session_id: "crashed-session".to_string(),
            temp_files: vec![staging],
            created_at: now,
            updated_at: now,
        })?;
        Ok(())
    }

    fn handle_restart(&mut self) -> Result<()> {
        if !self.crashed {
            return Err(anyhow!("Cannot restart - not crashed"));
        }

        let guard = self.workspace.open_guard(&self.clock)?;
        guard.initialize()?;

        self.guard = Some(guard);
        self.crashed = false;
        Ok(())
    }

    // ===== Assertions =====

    fn handle_assertion(&mut self, assertion: &Assertion) -> Result<()> {
        match assertion {
            Assertion::FileContent { path, content } => {
                let actual = self.workspace.read_file(path)?;
                if &actual != content {
                    return Err(anyhow!(
                        "File '{}' has content {:?}, expected {:?}",
                        path,
                        String::from_utf8_lossy(&actual),
                        String::from_utf8_lossy(content)
                    ));
                }
                Ok(())
            }
            Assertion::FileMissing { path } => {
                if self.workspace.file_exists(path) {
                    return Err(anyhow!("File '{}' unexpectedly exists", path));
                }
                Ok(())
            }
            Assertion::NoPartialFiles => {
                let partials = self.workspace.partial_files();
                if !partials.is_empty() {
                    return Err(anyhow!("Partial files left behind: {:?}", partials));
                }
                Ok(())
            }
            Assertion::LastOperationSucceeded => match &self.last_result {
                Some(r) if r.success => Ok(()),
                Some(r) => Err(anyhow!("Operation failed: {:?}", r.error)),
                None => Err(anyhow!("No operation has run")),
            },
            Assertion::LastOperationFailed => match &self.last_result {
                Some(r) if !r.success => Ok(()),
                Some(_) => Err(anyhow!("Operation unexpectedly succeeded")),
                None => Err(anyhow!("No operation has run")),
            },
            Assertion::IntegrityClean => {
                let report = self.guard()?.integrity().verify_all();
                if report.has_issues() {
                    return Err(anyhow!("Integrity issues: {}", report.summary()));
                }
                Ok(())
            }
            Assertion::Corruption { path, kind } => {
                let result = self.guard()?.integrity().verify_file(self.workspace.abs(path));
                if result.corruption_type != Some(*kind) {
                    return Err(anyhow!(
                        "Expected {} on '{}', got {:?}",
                        kind,
                        path,
                        result.corruption_type
                    ));
                }
                Ok(())
            }
            Assertion::RecordCount(expected) => {
                let actual = self.guard()?.integrity().records().len();
                if actual != *expected {
                    return Err(anyhow!("Expected {} record(s), found {}", expected, actual));
                }
                Ok(())
            }
            Assertion::InterruptedCount(expected) => {
                let actual = self.guard()?.recovery().list_operations().len();
                if actual != *expected {
                    return Err(anyhow!(
                        "Expected {} interrupted operation(s), found {}",
                        expected,
                        actual
                    ));
                }
                Ok(())
            }
            Assertion::PlannedStrategy {
                target,
                strategy,
                status,
            } => {
                let target = self.workspace.abs(target);
                let op = self
                    .guard()?
                    .recovery()
                    .list_operations()
                    .into_iter()
                    .find(|op| op.target.as_deref() == Some(target.as_path()))
                    .ok_or_else(|| anyhow!("No interrupted operation on {}", target.display()))?;
                let planned = op.plan.as_ref().map(|p| p.strategy);
                if planned != Some(*strategy) || op.status != *status {
                    return Err(anyhow!(
                        "Expected {} / {}, got {:?} / {}",
                        strategy,
                        status,
                        planned,
                        op.status
                    ));
                }
                Ok(())
            }
            Assertion::RecoveredCount(expected) => {
                let actual = self.recovery_results.iter().filter(|r| r.success).count();
                if actual != *expected {
                    return Err(anyhow!(
                        "Expected {} recovery success(es), got {}: {:?}",
                        expected,
                        actual,
                        self.recovery_results
                    ));
                }
                Ok(())
            }
            Assertion::Custom(check) => check(self.guard()?),
        }
    }
}
