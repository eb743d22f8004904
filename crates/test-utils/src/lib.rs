pub mod builders;
pub mod fake_worker;

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use testrelay::workspace::{WorkspaceEvent, WorkspaceHandle};
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Every notification a workspace published, in order.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<WorkspaceEvent>>>,
}

impl EventLog {
    pub fn attach(handle: &WorkspaceHandle) -> Self {
        let log = EventLog::default();
        let events = Arc::clone(&log.events);
        handle.subscribe(move |event| {
            events
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(event.clone());
        });
        log
    }

    pub fn snapshot(&self) -> Vec<WorkspaceEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Poll until some recorded event satisfies `pred`.
    pub async fn wait_for<F>(&self, pred: F)
    where
        F: Fn(&WorkspaceEvent) -> bool,
    {
        while !self.snapshot().iter().any(&pred) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
