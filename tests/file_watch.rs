// tests/file_watch.rs

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use testrelay::watch::{
    forward_changes, relative_to, spawn_watcher, FileChange, FileChangeKind, FileMatcher,
};
use testrelay::workspace::WorkspaceHandle;
use testrelay_test_utils::fake_worker::FakeWorker;
use testrelay_test_utils::{init_tracing, with_timeout};
use tokio::sync::mpsc;

type TestResult = Result<(), Box<dyn Error>>;

fn change(kind: FileChangeKind, path: &str) -> FileChange {
    FileChange {
        kind,
        path: PathBuf::from(path),
        relative: path.trim_start_matches("/proj/").to_string(),
    }
}

#[test]
fn relative_paths_use_forward_slashes() {
    let root = Path::new("/proj");
    assert_eq!(
        relative_to(root, Path::new("/proj/src/a.test.ts")).as_deref(),
        Some("src/a.test.ts")
    );
    assert_eq!(relative_to(root, Path::new("/elsewhere/a.ts")), None);
}

#[tokio::test]
async fn changes_are_forwarded_to_the_workspace() -> TestResult {
    with_timeout(async {
        init_tracing();
        let (transport, worker) = FakeWorker::connect();
        let workspace = WorkspaceHandle::spawn(transport, "/proj");

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_changes(rx, workspace.clone()));

        tx.send(change(FileChangeKind::Created, "/proj/src/new.test.ts"))?;
        tx.send(change(FileChangeKind::Changed, "/proj/src/util.ts"))?;
        tx.send(change(FileChangeKind::Removed, "/proj/src/old.test.ts"))?;

        worker.wait_for_calls("onFilesChanged", 1).await;
        assert_eq!(
            worker.calls_to("onFilesCreated"),
            vec![vec![json!(["/proj/src/new.test.ts"])]]
        );
        assert_eq!(
            worker.calls_to("onFilesChanged"),
            vec![vec![json!(["/proj/src/util.ts"])]]
        );
        Ok(())
    })
    .await
}

#[tokio::test]
async fn watcher_reports_matching_files_only() -> TestResult {
    with_timeout(async {
        init_tracing();
        let dir = TempDir::new()?;
        let matcher = FileMatcher::new(&["**/*.test.ts".to_string()], &[])?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = spawn_watcher(dir.path(), matcher, tx)?;

        std::fs::write(dir.path().join("notes.md"), "ignored")?;
        std::fs::write(dir.path().join("a.test.ts"), "it('works', () => {})")?;

        let first = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await?
            .ok_or("watcher stopped")?;
        assert_eq!(first.relative, "a.test.ts");
        Ok(())
    })
    .await
}
