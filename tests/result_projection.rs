// tests/result_projection.rs

use std::error::Error;
use std::sync::{Arc, Mutex};

use testrelay::protocol::{ErrorPayload, Location, TaskResult, TaskState};
use testrelay::tree::location::{find_location, normalize_path, parse_stack};
use testrelay::tree::{NodeStatus, TreeEvent, TreeReconciler};
use testrelay_test_utils::builders::{
    error_at, failed, passed, state, RemoteFileBuilder, RemoteTaskBuilder,
};

type TestResult = Result<(), Box<dyn Error>>;

const A: &str = "/proj/src/a.test.ts";

fn collected() -> TreeReconciler {
    let mut reconciler = TreeReconciler::new("/proj");
    let file = RemoteFileBuilder::new("f1", A)
        .task(
            RemoteTaskBuilder::suite("s1", "math")
                .child(RemoteTaskBuilder::test("t1", "adds").build())
                .build(),
        )
        .build();
    reconciler.collect_file(&file);
    reconciler
}

fn status(reconciler: &TreeReconciler, task: &str) -> Result<NodeStatus, Box<dyn Error>> {
    let id = reconciler.get_by_task_id(task).ok_or("unmapped task")?;
    Ok(reconciler.tree().get(id).ok_or("missing node")?.status.clone())
}

#[test]
fn case_states_map_to_statuses() -> TestResult {
    let mut reconciler = collected();
    let case = reconciler.get_by_task_id("t1").ok_or("t1")?;

    reconciler.apply_result(case, None);
    assert_eq!(status(&reconciler, "t1")?, NodeStatus::Started);

    reconciler.apply_result(case, Some(&state(TaskState::Queued)));
    assert_eq!(status(&reconciler, "t1")?, NodeStatus::Enqueued);

    reconciler.apply_result(case, Some(&passed(12.0)));
    assert_eq!(
        status(&reconciler, "t1")?,
        NodeStatus::Passed {
            duration_ms: Some(12.0)
        }
    );

    reconciler.apply_result(case, Some(&state(TaskState::Todo)));
    assert_eq!(status(&reconciler, "t1")?, NodeStatus::Skipped);

    reconciler.apply_result(case, Some(&state(TaskState::Only)));
    assert_eq!(status(&reconciler, "t1")?, NodeStatus::Started);
    Ok(())
}

#[test]
fn failures_carry_messages_and_locations() -> TestResult {
    let mut reconciler = collected();
    let case = reconciler.get_by_task_id("t1").ok_or("t1")?;

    let mut error = error_at("expected 1 to be 2", A, 5, 3);
    error.name = Some("AssertionError".to_string());
    error.expected = Some("2".to_string());
    error.actual = Some("1".to_string());
    let result = TaskResult {
        state: TaskState::Fail,
        duration: Some(4.0),
        errors: vec![error],
    };
    reconciler.apply_result(case, Some(&result));

    match status(&reconciler, "t1")? {
        NodeStatus::Failed {
            duration_ms,
            messages,
        } => {
            assert_eq!(duration_ms, Some(4.0));
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].message, "AssertionError: expected 1 to be 2");
            assert_eq!(messages[0].expected.as_deref(), Some("2"));
            assert_eq!(messages[0].actual.as_deref(), Some("1"));
            assert_eq!(messages[0].location, Some(Location { line: 5, column: 3 }));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    Ok(())
}

#[test]
fn failure_in_another_file_has_no_location() -> TestResult {
    let mut reconciler = collected();
    let case = reconciler.get_by_task_id("t1").ok_or("t1")?;
    let result = TaskResult {
        state: TaskState::Fail,
        duration: None,
        errors: vec![error_at("boom", "/proj/src/helper.ts", 9, 1)],
    };
    reconciler.apply_result(case, Some(&result));

    let NodeStatus::Failed { messages, .. } = status(&reconciler, "t1")? else {
        return Err("not failed".into());
    };
    assert_eq!(messages[0].location, None);
    Ok(())
}

#[test]
fn unchanged_result_publishes_nothing() -> TestResult {
    let mut reconciler = collected();
    let case = reconciler.get_by_task_id("t1").ok_or("t1")?;

    let applied = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&applied);
    reconciler.tree().subscribe(move |event| {
        if matches!(event, TreeEvent::ResultApplied { .. }) {
            *counter.lock().unwrap() += 1;
        }
    });

    assert!(reconciler.apply_result(case, Some(&passed(1.0))));
    assert!(!reconciler.apply_result(case, Some(&passed(1.0))));
    assert_eq!(*applied.lock().unwrap(), 1);
    Ok(())
}

#[test]
fn suites_and_files_only_track_error_annotations() -> TestResult {
    let mut reconciler = collected();
    let suite = reconciler.get_by_task_id("s1").ok_or("s1")?;
    let file = reconciler.get_by_task_id("f1").ok_or("f1")?;

    assert!(reconciler.apply_result(suite, Some(&failed("beforeAll hook failed"))));
    let node = reconciler.tree().get(suite).ok_or("suite")?;
    assert_eq!(node.error.as_deref(), Some("beforeAll hook failed"));
    assert_eq!(node.status, NodeStatus::Idle);

    // A failing state without errors leaves the annotation alone.
    assert!(!reconciler.apply_result(suite, Some(&state(TaskState::Fail))));
    assert!(reconciler.apply_result(suite, Some(&passed(3.0))));
    assert_eq!(reconciler.tree().get(suite).ok_or("suite")?.error, None);

    let two = TaskResult {
        state: TaskState::Fail,
        duration: None,
        errors: vec![
            ErrorPayload {
                message: "cannot import".to_string(),
                name: Some("SyntaxError".to_string()),
                ..ErrorPayload::default()
            },
            ErrorPayload {
                message: "second".to_string(),
                ..ErrorPayload::default()
            },
        ],
    };
    reconciler.apply_result(file, Some(&two));
    assert_eq!(
        reconciler.tree().get(file).ok_or("file")?.error.as_deref(),
        Some("SyntaxError: cannot import\nsecond")
    );
    Ok(())
}

#[test]
fn folders_are_never_touched() -> TestResult {
    let mut reconciler = collected();
    let src = reconciler.tree().find_by_labels(&["src"]).ok_or("src")?;
    assert!(!reconciler.apply_result(src, Some(&failed("nope"))));
    assert_eq!(reconciler.tree().get(src).ok_or("src")?.error, None);
    Ok(())
}

#[test]
fn textual_stacks_are_parsed() {
    let stack = "AssertionError: nope\n    at Object.<anonymous> (/proj/src/a.test.ts:7:9)\n    at /proj/node_modules/runner.js:1:2\n    garbage";
    let frames = parse_stack(stack);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].method, "Object.<anonymous>");
    assert_eq!(frames[0].file, A);
    assert_eq!((frames[0].line, frames[0].column), (7, 9));
    assert_eq!(frames[1].method, "");

    let error = ErrorPayload {
        message: "nope".to_string(),
        stack: Some(stack.to_string()),
        ..ErrorPayload::default()
    };
    assert_eq!(
        find_location(&error, A),
        Some(Location { line: 7, column: 9 })
    );
}

#[test]
fn paths_normalize_across_platforms() {
    assert_eq!(normalize_path("file:///C:/Proj/a.ts"), "c:/Proj/a.ts");
    assert_eq!(normalize_path("C:\\Proj\\src\\..\\a.ts"), "c:/Proj/a.ts");
    assert_eq!(normalize_path("/proj/./src//a.ts"), "/proj/src/a.ts");
    assert_eq!(normalize_path("../x/y"), "../x/y");
}
