use crate::harness::{Assertion, Scenario};
use fsguard_core::{CorruptionKind, RegistryBackend};

#[test]
fn test_scan_then_clean_verification() {
    Scenario::new("scan_clean")
        .with_file("src/main.rs", b"fn main() {}")
        .with_file("README.md", b"# project")
        .with_file("node_modules/dep/index.js", b"module.exports = 1")
        .scan_integrity()
        // node_modules is excluded by default
        .assert(Assertion::RecordCount(2))
        .assert(Assertion::IntegrityClean)
        .run()
        .unwrap();
}

#[test]
fn test_external_changes_are_classified() {
    Scenario::new("classified_changes")
        .with_file("same_len.txt", b"aaaa")
        .with_file("grown.txt", b"short")
        .with_file("gone.txt", b"bye")
        .scan_integrity()
        .external_write("same_len.txt", b"bbbb")
        .external_write("grown.txt", b"much longer now")
        .external_delete("gone.txt")
        .assert_corruption("same_len.txt", CorruptionKind::ChecksumMismatch)
        .assert_corruption("grown.txt", CorruptionKind::SizeMismatch)
        .assert_corruption("gone.txt", CorruptionKind::MissingFile)
        .assert(Assertion::Custom(Box::new(|guard| {
            let report = guard.integrity().verify_all();
            assert_eq!(report.total_files, 3);
            assert_eq!(report.corrupted_files, 1);
            assert_eq!(report.missing_files, 1);
            assert_eq!(report.modified_files, 1);
            assert!(report.integrity_score < 1.0);
            assert!(!report.recommendations.is_empty());
            Ok(())
        })))
        .run()
        .unwrap();
}

#[test]
fn test_repair_from_backup() {
    Scenario::new("repair_from_backup")
        .with_file("data.txt", b"good data")
        .record("data.txt")
        .assert(Assertion::Custom(Box::new(|guard| {
            let path = guard.root().join("data.txt");
            guard.ctx().backups().create_backup(&path, "before edit")?;
            Ok(())
        })))
        .external_write("data.txt", b"evil data")
        .assert_corruption("data.txt", CorruptionKind::ChecksumMismatch)
        .assert(Assertion::Custom(Box::new(|guard| {
            let path = guard.root().join("data.txt");
            let backup = guard
                .ctx()
                .backups()
                .latest_backup(&path)?
                .expect("backup exists");
            assert!(guard.integrity().repair_file(&path, Some(&backup.backup)));
            Ok(())
        })))
        .assert_file("data.txt", b"good data")
        .assert(Assertion::IntegrityClean)
        .run()
        .unwrap();
}

#[test]
fn test_records_survive_restart() {
    Scenario::new("records_survive_restart")
        .with_file("a.txt", b"alpha")
        .with_file("b.txt", b"beta")
        .scan_integrity()
        .crash()
        .external_write("b.txt", b"BETA")
        .restart()
        .assert(Assertion::RecordCount(2))
        .assert_corruption("b.txt", CorruptionKind::ChecksumMismatch)
        .run()
        .unwrap();
}

#[test]
fn test_redb_registry_survives_restart() {
    Scenario::new("redb_registry")
        .with_config(|config| config.integrity.registry_backend = RegistryBackend::Redb)
        .with_file("a.txt", b"alpha")
        .scan_integrity()
        .crash()
        .restart()
        .assert(Assertion::RecordCount(1))
        .assert(Assertion::IntegrityClean)
        .assert(Assertion::Custom(Box::new(|guard| {
            let location = guard.integrity().store().location().to_path_buf();
            assert_eq!(location.extension().and_then(|e| e.to_str()), Some("redb"));
            Ok(())
        })))
        .run()
        .unwrap();
}
