use crate::harness::{Assertion, Scenario};
use fsguard_core::{
    ConflictKind, ConflictSeverity, ConflictStatus, GuardEvent, LockOperation, ResolutionStrategy,
};

#[test]
fn test_concurrent_writers_resolve_with_backup() {
    Scenario::new("write_write")
        .with_file("notes.txt", b"shared")
        .assert(Assertion::Custom(Box::new(|guard| {
            let path = guard.root().join("notes.txt");
            let events = guard.events().subscribe();

            assert!(guard.conflicts().acquire_file_lock(&path, LockOperation::Write, 101));
            // Latest writer wins once the old content is backed up
            assert!(guard.conflicts().acquire_file_lock(&path, LockOperation::Write, 202));

            let holders = guard.conflicts().get_lock_holders(&path);
            assert_eq!(holders.len(), 1);
            assert_eq!(holders[0].process_id, 202);
            assert!(guard.ctx().backups().latest_backup(&path)?.is_some());

            let seen: Vec<GuardEvent> = events.try_iter().collect();
            assert!(seen
                .iter()
                .any(|e| matches!(e, GuardEvent::ConflictDetected { .. })));
            assert!(seen
                .iter()
                .any(|e| matches!(e, GuardEvent::ConflictResolved { .. })));
            Ok(())
        })))
        .run()
        .unwrap();
}

#[test]
fn test_manifest_conflicts_escalate_and_resolve_manually() {
    Scenario::new("escalated")
        .with_file("Cargo.toml", b"[package]")
        .assert(Assertion::Custom(Box::new(|guard| {
            let path = guard.root().join("Cargo.toml");
            let resolver = guard.conflicts();

            assert!(resolver.acquire_file_lock(&path, LockOperation::Write, 1));
            assert!(!resolver.acquire_file_lock(&path, LockOperation::Delete, 2));

            let open = resolver.get_active_conflicts();
            assert_eq!(open.len(), 1);
            assert_eq!(open[0].kind, ConflictKind::WriteDelete);
            assert!(open[0].severity >= ConflictSeverity::High);
            assert_eq!(open[0].status, ConflictStatus::Escalated);

            let result = resolver.resolve_conflict(&open[0].id, Some(ResolutionStrategy::AbortAll));
            assert!(result.success);
            assert!(resolver.get_lock_holders(&path).is_empty());
            assert_eq!(resolver.get_conflict_stats().resolved, 1);
            Ok(())
        })))
        .run()
        .unwrap();
}

#[test]
fn test_readers_never_conflict() {
    Scenario::new("readers")
        .with_file("log.txt", b"entries")
        .assert(Assertion::Custom(Box::new(|guard| {
            let path = guard.root().join("log.txt");
            for pid in 1..=4 {
                assert!(guard.conflicts().acquire_file_lock(&path, LockOperation::Read, pid));
            }
            assert!(guard.conflicts().acquire_file_lock(&path, LockOperation::Write, 9));
            assert!(guard.conflicts().detect_conflicts(&[path]).is_empty());
            Ok(())
        })))
        .run()
        .unwrap();
}
