use crate::harness::{Assertion, Scenario};
use fsguard_core::{
    GuardError, InterruptedStatus, RecoveryStrategy, StateLockRecord, LOCK_FILE, STATE_DIR,
};

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_restart_reclaims_lock_of_dead_process() {
    Scenario::new("stale_lock")
        .with_file("a.txt", b"alpha")
        .crash()
        .restart()
        .assert(Assertion::Custom(Box::new(|guard| {
            let lock = StateLockRecord::read(&guard.state_dir().join(LOCK_FILE))?
                .ok_or_else(|| anyhow::anyhow!("LOCK missing after restart"))?;
            assert_eq!(lock.process_id, std::process::id());
            assert_eq!(lock.session_id, guard.ctx().session_id());
            // A second handle in this live process is refused
            let second = fsguard_core::Guard::open(guard.root());
            assert!(matches!(second, Err(GuardError::StateLocked { .. })));
            Ok(())
        })))
        .assert_interrupted(0)
        .run()
        .unwrap();
}

#[test]
fn test_nearly_finished_copy_is_resumed() {
    let data = payload(20_000);
    Scenario::new("resume_copy")
        .with_file("big.bin", &data)
        .crash()
        .interrupted_copy("big.bin", "copy.bin", 19_000)
        .restart()
        .assert_interrupted(1)
        .assert_plan("copy.bin", RecoveryStrategy::Resume, InterruptedStatus::Recoverable)
        .recover_all()
        .assert(Assertion::RecoveredCount(1))
        .assert_file("copy.bin", &data)
        .assert_file("big.bin", &data)
        .assert_no_partials()
        .assert(Assertion::Custom(Box::new(|guard| {
            let locks = guard.state_dir().join("locks");
            assert_eq!(std::fs::read_dir(locks)?.count(), 0);
            Ok(())
        })))
        .run()
        .unwrap();
}

#[test]
fn test_barely_started_copy_waits_for_a_decision() {
    let data = payload(10_000);
    Scenario::new("restart_copy")
        .with_file("big.bin", &data)
        .crash()
        .interrupted_copy("big.bin", "copy.bin", 1_000)
        .restart()
        .assert_plan("copy.bin", RecoveryStrategy::Restart, InterruptedStatus::Unrecoverable)
        .recover_all()
        .assert(Assertion::RecoveredCount(0))
        .assert_missing("copy.bin")
        .assert(Assertion::Custom(Box::new(|guard| {
            let op = &guard.recovery().list_operations()[0];
            let result = guard
                .recovery()
                .recover_operation_with(&op.id, RecoveryStrategy::Restart);
            assert!(result.success, "{:?}", result.error);
            Ok(())
        })))
        .assert_file("copy.bin", &data)
        .assert_no_partials()
        .run()
        .unwrap();
}

#[test]
fn test_fully_staged_write_is_committed() {
    Scenario::new("staged_write")
        .with_file("settings.toml", b"level = 1")
        .crash()
        .interrupted_write("settings.toml", b"level = 2", 9)
        .restart()
        .assert_plan("settings.toml", RecoveryStrategy::Resume, InterruptedStatus::Recoverable)
        .recover_all()
        .assert(Assertion::RecoveredCount(1))
        .assert_file("settings.toml", b"level = 2")
        .assert_no_partials()
        .run()
        .unwrap();
}

#[test]
fn test_half_staged_write_is_discarded() {
    Scenario::new("half_staged_write")
        .with_file("settings.toml", b"level = 1")
        .crash()
        .interrupted_write("settings.toml", b"level = 2", 4)
        .restart()
        .assert_plan("settings.toml", RecoveryStrategy::Rollback, InterruptedStatus::Recoverable)
        .recover_all()
        .assert(Assertion::RecoveredCount(1))
        .assert_file("settings.toml", b"level = 1")
        .assert_no_partials()
        .run()
        .unwrap();
}

#[test]
fn test_old_interruption_loses_confidence() {
    Scenario::new("aged_interruption")
        .with_file("settings.toml", b"level = 1")
        .crash()
        .interrupted_write("settings.toml", b"level = 2", 4)
        .wait_hours(30)
        .restart()
        .assert_plan("settings.toml", RecoveryStrategy::Rollback, InterruptedStatus::Unrecoverable)
        .recover_all()
        .assert(Assertion::RecoveredCount(0))
        .assert(Assertion::Custom(Box::new(|guard| {
            let op = &guard.recovery().list_operations()[0];
            guard.recovery().abandon_operation(&op.id)?;
            let stats = guard.recovery().get_recovery_stats();
            assert_eq!(stats.abandoned, 1);
            Ok(())
        })))
        .assert_file("settings.toml", b"level = 1")
        .assert_no_partials()
        .run()
        .unwrap();
}

#[test]
fn test_orphaned_partial_is_found_and_removed() {
    Scenario::new("orphan_partial")
        .with_file("doc.txt", b"v1")
        .crash()
        .external_write(".doc.txt.deadbeef.partial", b"v2-incomplete")
        .restart()
        .assert_interrupted(1)
        .recover_all()
        .assert(Assertion::RecoveredCount(1))
        .assert_file("doc.txt", b"v1")
        .assert_no_partials()
        .assert(Assertion::Custom(Box::new(|guard| {
            assert!(guard.root().join(STATE_DIR).is_dir());
            Ok(())
        })))
        .run()
        .unwrap();
}
