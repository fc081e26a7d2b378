use crate::harness::{Assertion, BatchAction, Scenario};

#[test]
fn test_write_then_move() {
    Scenario::new("write_then_move")
        .with_file("notes.txt", b"draft")
        .atomic_write("notes.txt", b"final")
        .assert_succeeded()
        .assert_file("notes.txt", b"final")
        .atomic_move("notes.txt", "archive/notes.txt")
        .assert_succeeded()
        .assert_missing("notes.txt")
        .assert_file("archive/notes.txt", b"final")
        .assert_no_partials()
        .run()
        .unwrap();
}

#[test]
fn test_failed_batch_restores_everything() {
    Scenario::new("failed_batch")
        .with_file("config.ini", b"mode=old")
        .with_file("data.csv", b"a,b,c")
        .batch(vec![
            BatchAction::Write {
                path: "config.ini".into(),
                content: b"mode=new".to_vec(),
            },
            BatchAction::Copy {
                from: "data.csv".into(),
                to: "backup/data.csv".into(),
            },
            BatchAction::Move {
                from: "data.csv".into(),
                to: "moved.csv".into(),
            },
            BatchAction::Delete {
                path: "does-not-exist.txt".into(),
            },
        ])
        .assert_failed()
        .assert_file("config.ini", b"mode=old")
        .assert_file("data.csv", b"a,b,c")
        .assert_missing("backup/data.csv")
        .assert_missing("moved.csv")
        .assert_no_partials()
        .run()
        .unwrap();
}

#[test]
fn test_successful_batch_lands_in_history() {
    Scenario::new("batch_history")
        .with_file("src.txt", b"payload")
        .batch(vec![
            BatchAction::Mkdir {
                path: "out".into(),
            },
            BatchAction::Copy {
                from: "src.txt".into(),
                to: "out/copy.txt".into(),
            },
            BatchAction::Write {
                path: "out/manifest.txt".into(),
                content: b"copy.txt".to_vec(),
            },
        ])
        .assert_succeeded()
        .assert_file("out/copy.txt", b"payload")
        .assert_file("src.txt", b"payload")
        .assert(Assertion::Custom(Box::new(|guard| {
            let history = guard.atomic().history();
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].steps.len(), 3);
            assert!(guard.atomic().list_operations().is_empty());
            Ok(())
        })))
        .run()
        .unwrap();
}

#[test]
fn test_move_over_existing_can_be_rolled_back() {
    Scenario::new("move_rollback")
        .with_file("a.txt", b"incoming")
        .with_file("b.txt", b"existing")
        .atomic_move("a.txt", "b.txt")
        .assert_succeeded()
        .assert_file("b.txt", b"incoming")
        .assert(Assertion::Custom(Box::new(|guard| {
            let id = guard.atomic().history()[0].id.clone();
            let result = guard.atomic().rollback_operation(&id);
            assert!(result.success, "{:?}", result.error);
            Ok(())
        })))
        .assert_file("a.txt", b"incoming")
        .assert_file("b.txt", b"existing")
        .run()
        .unwrap();
}
