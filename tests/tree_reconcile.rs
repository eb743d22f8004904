// tests/tree_reconcile.rs

use std::error::Error;
use std::sync::{Arc, Mutex};

use testrelay::protocol::{RemoteFile, Specification, TaskRef};
use testrelay::tree::{DynamicRole, NodeKind, TreeEvent, TreeReconciler};
use testrelay_test_utils::builders::{RemoteFileBuilder, RemoteTaskBuilder};
use testrelay_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

const A: &str = "/proj/src/a.test.ts";
const B: &str = "/proj/src/b.test.ts";

fn math_file() -> RemoteFile {
    RemoteFileBuilder::new("f1", A)
        .task(
            RemoteTaskBuilder::suite("s1", "math")
                .child(RemoteTaskBuilder::test("t1", "adds").build())
                .child(RemoteTaskBuilder::test("t2", "subtracts").build())
                .build(),
        )
        .build()
}

#[test]
fn register_files_builds_folder_chain_relative_to_root() -> TestResult {
    init_tracing();
    let mut reconciler = TreeReconciler::new("/proj/");

    let ids = reconciler.register_files(&[
        Specification::new("", A),
        Specification::new("", B),
        Specification::new("web", "/proj/lib/c.test.ts"),
    ]);
    assert_eq!(ids.len(), 3);
    assert_eq!(reconciler.file_count(), 3);

    let tree = reconciler.tree();
    let roots: Vec<_> = tree.roots().filter_map(|id| tree.get(id)).map(|n| n.label.clone()).collect();
    assert_eq!(roots, vec!["src".to_string(), "lib".to_string()]);

    let a = tree.find_by_labels(&["src", "a.test.ts"]).ok_or("a missing")?;
    assert_eq!(a, ids[0]);
    assert_eq!(tree.get(a).ok_or("a")?.kind, NodeKind::File);
    assert_eq!(tree.get(a).ok_or("a")?.file_path.as_deref(), Some(A));

    let c = tree
        .find_by_labels(&["lib", "c.test.ts [web]"])
        .ok_or("project file missing")?;
    assert_eq!(c, ids[2]);

    // Registering again reuses the nodes.
    let again = reconciler.register_files(&[Specification::new("", A)]);
    assert_eq!(again, vec![ids[0]]);
    assert_eq!(reconciler.file_count(), 3);
    Ok(())
}

#[test]
fn collect_maps_tasks_and_inherits_file_path() -> TestResult {
    let mut reconciler = TreeReconciler::new("/proj");
    let file = math_file();
    let file_node = reconciler.collect_file(&file);

    assert_eq!(reconciler.get_by_task(TaskRef::File(&file)), Some(file_node));

    let adds = reconciler.get_by_task_id("t1").ok_or("t1 unmapped")?;
    let tree = reconciler.tree();
    let node = tree.get(adds).ok_or("adds")?;
    assert_eq!(node.label, "adds");
    assert_eq!(node.kind, NodeKind::Case);
    assert_eq!(node.file_path.as_deref(), Some(A));

    let suite = node.parent.ok_or("no parent")?;
    assert_eq!(tree.get(suite).ok_or("suite")?.kind, NodeKind::Suite);
    assert_eq!(tree.get(suite).ok_or("suite")?.parent, Some(file_node));
    assert_eq!(
        tree.find_by_labels(&["src", "a.test.ts", "math", "subtracts"]),
        reconciler.get_by_task_id("t2")
    );
    Ok(())
}

#[test]
fn recollection_keeps_nodes_and_removes_missing_tasks() -> TestResult {
    let mut reconciler = TreeReconciler::new("/proj");
    reconciler.collect_file(&math_file());
    let adds = reconciler.get_by_task_id("t1").ok_or("t1")?;
    let subtracts = reconciler.get_by_task_id("t2").ok_or("t2")?;

    let removed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&removed);
    reconciler.tree().subscribe(move |event| {
        if let TreeEvent::Removed(id) = event {
            sink.lock().unwrap().push(*id);
        }
    });

    let shrunk = RemoteFileBuilder::new("f1", A)
        .task(
            RemoteTaskBuilder::suite("s1", "math")
                .child(RemoteTaskBuilder::test("t1", "adds together").build())
                .build(),
        )
        .build();
    reconciler.collect_file(&shrunk);

    assert_eq!(reconciler.get_by_task_id("t1"), Some(adds));
    assert_eq!(reconciler.tree().get(adds).ok_or("adds")?.label, "adds together");
    assert_eq!(reconciler.get_by_task_id("t2"), None);
    assert!(!reconciler.tree().contains(subtracts));
    assert_eq!(*removed.lock().unwrap(), vec![subtracts]);
    Ok(())
}

#[test]
fn kind_change_replaces_the_node() -> TestResult {
    let mut reconciler = TreeReconciler::new("/proj");
    reconciler.collect_file(&math_file());
    let before = reconciler.get_by_task_id("t1").ok_or("t1")?;

    let changed = RemoteFileBuilder::new("f1", A)
        .task(
            RemoteTaskBuilder::suite("s1", "math")
                .child(
                    RemoteTaskBuilder::suite("t1", "adds")
                        .child(RemoteTaskBuilder::test("t3", "small numbers").build())
                        .build(),
                )
                .build(),
        )
        .build();
    reconciler.collect_file(&changed);

    let after = reconciler.get_by_task_id("t1").ok_or("t1")?;
    assert_ne!(before, after);
    assert!(!reconciler.tree().contains(before));
    assert_eq!(reconciler.tree().get(after).ok_or("after")?.kind, NodeKind::Suite);
    assert!(reconciler.get_by_task_id("t3").is_some());
    Ok(())
}

fn templated_file(instances: &[(&str, &str)]) -> RemoteFile {
    let mut suite = RemoteTaskBuilder::suite("s1", "calc")
        .child(RemoteTaskBuilder::test("tpl", "adds %i + %i").dynamic().build());
    for (id, name) in instances {
        suite = suite.child(RemoteTaskBuilder::test(id, name).each().build());
    }
    RemoteFileBuilder::new("f1", A).task(suite.build()).build()
}

#[test]
fn each_instances_attach_under_their_template() -> TestResult {
    init_tracing();
    let mut reconciler = TreeReconciler::new("/proj");
    reconciler.collect_file(&templated_file(&[]));
    let template = reconciler.get_by_task_id("tpl").ok_or("template")?;
    assert!(reconciler.tree().get(template).ok_or("tpl")?.is_template());

    reconciler.collect_file(&templated_file(&[("i1", "adds 1 + 2"), ("i2", "adds 3 + 4")]));

    let tree = reconciler.tree();
    let first = reconciler.get_by_task_id("i1").ok_or("i1")?;
    let node = tree.get(first).ok_or("first")?;
    assert_eq!(node.parent, Some(template));
    assert_eq!(node.dynamic, DynamicRole::Instance { template });
    assert_eq!(tree.children(Some(template)).len(), 2);
    Ok(())
}

#[test]
fn templates_survive_when_not_reported_and_stale_instances_go() -> TestResult {
    let mut reconciler = TreeReconciler::new("/proj");
    reconciler.collect_file(&templated_file(&[]));
    let template = reconciler.get_by_task_id("tpl").ok_or("template")?;
    reconciler.collect_file(&templated_file(&[("i1", "adds 1 + 2"), ("i2", "adds 3 + 4")]));
    let stale = reconciler.get_by_task_id("i1").ok_or("i1")?;

    // Only one row this time, and the template itself is not reported.
    let runtime_only = RemoteFileBuilder::new("f1", A)
        .task(
            RemoteTaskBuilder::suite("s1", "calc")
                .child(RemoteTaskBuilder::test("i2", "adds 3 + 4").each().build())
                .build(),
        )
        .build();
    reconciler.collect_file(&runtime_only);

    assert!(reconciler.tree().contains(template));
    assert!(!reconciler.tree().contains(stale));
    let kept = reconciler.get_by_task_id("i2").ok_or("i2")?;
    assert_eq!(reconciler.tree().get(kept).ok_or("kept")?.parent, Some(template));
    assert_eq!(reconciler.get_by_task_id("tpl"), Some(template));
    Ok(())
}

#[test]
fn each_task_without_matching_template_is_placed_by_id() -> TestResult {
    let mut reconciler = TreeReconciler::new("/proj");
    let file = RemoteFileBuilder::new("f1", A)
        .task(RemoteTaskBuilder::test("i1", "plain row 1").each().build())
        .build();
    let file_node = reconciler.collect_file(&file);

    let row = reconciler.get_by_task_id("i1").ok_or("i1")?;
    let node = reconciler.tree().get(row).ok_or("row")?;
    assert_eq!(node.parent, Some(file_node));
    assert_eq!(node.dynamic, DynamicRole::None);
    Ok(())
}

#[test]
fn suite_template_instances_carry_their_own_children() -> TestResult {
    let mut reconciler = TreeReconciler::new("/proj");
    let declared = RemoteFileBuilder::new("f1", A)
        .task(
            RemoteTaskBuilder::suite("tpl", "parser %s")
                .dynamic()
                .child(RemoteTaskBuilder::test("w", "works").build())
                .build(),
        )
        .build();
    reconciler.collect_file(&declared);
    let template = reconciler.get_by_task_id("tpl").ok_or("tpl")?;
    let static_child = reconciler.get_by_task_id("w").ok_or("w")?;

    let ran = RemoteFileBuilder::new("f1", A)
        .task(
            RemoteTaskBuilder::suite("i1", "parser json")
                .each()
                .child(RemoteTaskBuilder::test("w1", "works").build())
                .build(),
        )
        .build();
    reconciler.collect_file(&ran);

    let tree = reconciler.tree();
    let instance = reconciler.get_by_task_id("i1").ok_or("i1")?;
    assert_eq!(tree.get(instance).ok_or("instance")?.parent, Some(template));
    let inner = reconciler.get_by_task_id("w1").ok_or("w1")?;
    assert_eq!(tree.get(inner).ok_or("inner")?.parent, Some(instance));
    // The declared structure inside the template stays.
    assert!(tree.contains(static_child));
    Ok(())
}

fn parser_run(instance: &str, inner: &str) -> RemoteFile {
    RemoteFileBuilder::new("f1", A)
        .task(
            RemoteTaskBuilder::suite(instance, "parser json")
                .each()
                .child(RemoteTaskBuilder::test(inner, "works").build())
                .build(),
        )
        .build()
}

#[test]
fn recollection_drops_stale_children_of_suite_instances() -> TestResult {
    let mut reconciler = TreeReconciler::new("/proj");
    let declared = RemoteFileBuilder::new("f1", A)
        .task(
            RemoteTaskBuilder::suite("tpl", "parser %s")
                .dynamic()
                .child(RemoteTaskBuilder::test("w", "works").build())
                .build(),
        )
        .build();
    reconciler.collect_file(&declared);
    let static_child = reconciler.get_by_task_id("w").ok_or("w")?;

    reconciler.collect_file(&parser_run("i1", "w1"));
    let stale = reconciler.get_by_task_id("w1").ok_or("w1")?;

    // Same instance, but the worker handed out fresh ids for its children.
    reconciler.collect_file(&parser_run("i1", "w2"));

    let tree = reconciler.tree();
    let instance = reconciler.get_by_task_id("i1").ok_or("i1")?;
    let fresh = reconciler.get_by_task_id("w2").ok_or("w2")?;
    assert_eq!(tree.children(Some(instance)), vec![fresh]);
    assert!(!tree.contains(stale));
    assert_eq!(reconciler.get_by_task_id("w1"), None);
    assert!(tree.contains(static_child));
    assert_eq!(reconciler.get_by_task_id("w"), Some(static_child));
    Ok(())
}

#[test]
fn nested_templates_resolve_to_the_innermost_declaration() -> TestResult {
    let mut reconciler = TreeReconciler::new("/proj");
    let declared = RemoteFileBuilder::new("f1", A)
        .task(
            RemoteTaskBuilder::suite("S", "%s suite")
                .dynamic()
                .child(RemoteTaskBuilder::test("C", "%s case").dynamic().build())
                .build(),
        )
        .build();
    reconciler.collect_file(&declared);
    let suite_template = reconciler.get_by_task_id("S").ok_or("S")?;
    let case_template = reconciler.get_by_task_id("C").ok_or("C")?;

    let ran = RemoteFileBuilder::new("f1", A)
        .task(
            RemoteTaskBuilder::suite("i1", "foo suite")
                .each()
                .child(RemoteTaskBuilder::test("c1", "bar case").each().build())
                .build(),
        )
        .build();
    reconciler.collect_file(&ran);

    let tree = reconciler.tree();
    let suite = reconciler.get_by_task_id("i1").ok_or("i1")?;
    let case = reconciler.get_by_task_id("c1").ok_or("c1")?;
    let suite_node = tree.get(suite).ok_or("suite")?;
    let case_node = tree.get(case).ok_or("case")?;

    assert_eq!(suite_node.parent, Some(suite_template));
    assert_eq!(suite_node.dynamic, DynamicRole::Instance { template: suite_template });
    assert_eq!(case_node.parent, Some(suite));
    assert_eq!(case_node.dynamic, DynamicRole::Instance { template: case_template });
    assert_eq!(case_node.kind, NodeKind::Case);
    Ok(())
}

#[test]
fn remove_file_and_directory_prunes_empty_folders() -> TestResult {
    let mut reconciler = TreeReconciler::new("/proj");
    reconciler.register_files(&[Specification::new("", A), Specification::new("", B)]);
    reconciler.collect_file(&math_file());

    assert_eq!(reconciler.remove_file(A), 1);
    assert_eq!(reconciler.get_by_task_id("t1"), None);
    assert_eq!(reconciler.get_by_task_id("f1"), None);
    assert!(reconciler.tree().find_by_labels(&["src"]).is_some());

    assert_eq!(reconciler.remove_file("/proj/src/"), 1);
    assert!(reconciler.tree().find_by_labels(&["src"]).is_none());
    assert!(reconciler.tree().is_empty());
    assert_eq!(reconciler.remove_file("/proj/nothing.ts"), 0);
    Ok(())
}

#[test]
fn windows_style_paths_resolve_to_the_same_file() -> TestResult {
    let mut reconciler = TreeReconciler::new("C:\\proj");
    let ids = reconciler.register_files(&[Specification::new("", "C:\\proj\\src\\a.test.ts")]);
    assert!(reconciler
        .tree()
        .find_by_labels(&["src", "a.test.ts"])
        .is_some_and(|id| id == ids[0]));
    assert_eq!(reconciler.remove_file("c:/proj/src/a.test.ts"), 1);
    Ok(())
}
