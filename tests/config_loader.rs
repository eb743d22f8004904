// tests/config_loader.rs

use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tempfile::{NamedTempFile, TempDir};
use testrelay::config::validate::parse_duration;
use testrelay::config::{load_and_validate, load_from_path, ConfigFile, ConfigResolver};
use testrelay::errors::RelayError;
use testrelay::types::LaunchMode;
use testrelay::watch::FileMatcher;
use testrelay_test_utils::builders::ConfigFileBuilder;

type TestResult = Result<(), Box<dyn Error>>;

fn write_config(dir: &TempDir, contents: &str) -> Result<std::path::PathBuf, Box<dyn Error>> {
    let path = dir.path().join("Testrelay.toml");
    std::fs::write(&path, contents)?;
    Ok(path)
}

fn config_error(result: Result<ConfigFile, RelayError>) -> String {
    match result {
        Err(RelayError::ConfigError(msg)) => msg,
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn full_config_is_validated_and_cwd_resolved() -> TestResult {
    let dir = TempDir::new()?;
    let path = write_config(
        &dir,
        r#"
[worker]
command = "node"
args = ["./worker.mjs", "--silent"]
cwd = "packages/app"
config_file = "vitest.config.ts"
env = { NODE_ENV = "test" }
ast_collect = true

[supervisor]
shutdown_grace = "250ms"

[watch]
include = ["**/*.test.ts"]
exclude = ["**/node_modules/**"]
"#,
    )?;

    let cfg = load_and_validate(&path)?;
    assert_eq!(cfg.worker.command.as_deref(), Some("node"));
    assert_eq!(cfg.worker.args, vec!["./worker.mjs", "--silent"]);
    assert_eq!(cfg.worker.mode, LaunchMode::Child);
    assert_eq!(cfg.worker.cwd, dir.path().join("packages/app"));
    assert_eq!(cfg.worker.config_file.as_deref(), Some("vitest.config.ts"));
    assert_eq!(cfg.worker.env.get("NODE_ENV").map(String::as_str), Some("test"));
    assert!(cfg.worker.ast_collect);
    assert!(!cfg.worker.debug);
    assert_eq!(cfg.supervisor.shutdown_grace, Duration::from_millis(250));
    assert_eq!(cfg.worker.shell_line(), "node ./worker.mjs --silent");

    let matcher = FileMatcher::from_config(&cfg.watch)?;
    assert!(matcher.matches("src/a.test.ts"));
    assert!(!matcher.matches("node_modules/pkg/b.test.ts"));
    assert!(!matcher.matches("src/a.ts"));
    Ok(())
}

#[test]
fn defaults_apply_when_sections_are_missing() -> TestResult {
    let dir = TempDir::new()?;
    let path = write_config(&dir, "[worker]\ncommand = \"vitest-worker\"\n")?;

    let cfg = load_and_validate(&path)?;
    assert_eq!(cfg.worker.cwd, dir.path().join("."));
    assert_eq!(cfg.supervisor.shutdown_grace, Duration::from_secs(5));
    assert!(FileMatcher::from_config(&cfg.watch)?.matches("anything/at/all.rs"));
    Ok(())
}

#[test]
fn command_is_required_outside_attach_mode() -> TestResult {
    let mut file = NamedTempFile::new()?;
    write!(file, "[worker]\ncommand = \"   \"\n")?;
    let msg = config_error(load_and_validate(file.path()));
    assert!(msg.contains("command"));
    Ok(())
}

#[test]
fn attach_mode_needs_an_address_but_no_command() -> TestResult {
    let dir = TempDir::new()?;

    let missing = write_config(&dir, "[worker]\nmode = \"attach\"\n")?;
    assert!(config_error(load_and_validate(&missing)).contains("attach_address"));

    let bad = write_config(
        &dir,
        "[worker]\nmode = \"attach\"\nattach_address = \"localhost\"\n",
    )?;
    assert!(config_error(load_and_validate(&bad)).contains("attach_address"));

    let good = write_config(
        &dir,
        "[worker]\nmode = \"attach\"\nattach_address = \"127.0.0.1:9339\"\n",
    )?;
    let cfg = load_and_validate(&good)?;
    assert_eq!(cfg.worker.command, None);
    assert_eq!(cfg.worker.attach_address.map(|a| a.port()), Some(9339));
    Ok(())
}

#[test]
fn bad_values_are_rejected() -> TestResult {
    let dir = TempDir::new()?;

    let grace = write_config(
        &dir,
        "[worker]\ncommand = \"node\"\n[supervisor]\nshutdown_grace = \"5h\"\n",
    )?;
    assert!(config_error(load_and_validate(&grace)).contains("shutdown_grace"));

    let glob = write_config(&dir, "[worker]\ncommand = \"node\"\n[watch]\ninclude = [\"src/[\"]\n")?;
    assert!(config_error(load_and_validate(&glob)).contains("invalid glob"));

    let mode = write_config(&dir, "[worker]\ncommand = \"node\"\nmode = \"daemon\"\n")?;
    assert!(matches!(load_from_path(&mode), Err(RelayError::TomlError(_))));

    assert!(matches!(
        load_and_validate(dir.path().join("missing.toml")),
        Err(RelayError::IoError(_))
    ));
    Ok(())
}

#[test]
fn durations_parse_with_units() {
    assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
    assert_eq!(parse_duration(" 5s "), Ok(Duration::from_secs(5)));
    assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
    assert!(parse_duration("").is_err());
    assert!(parse_duration("10").is_err());
    assert!(parse_duration("1d").is_err());
}

#[test]
fn resolver_caches_until_invalidated() -> TestResult {
    let dir = TempDir::new()?;
    let path = write_config(&dir, "[worker]\ncommand = \"node\"\n")?;
    let resolver = ConfigResolver::new(&path);

    let first = resolver.resolve()?;
    let again = resolver.resolve()?;
    assert!(Arc::ptr_eq(&first, &again));

    std::fs::write(&path, "[worker]\ncommand = \"bun\"\n")?;
    assert_eq!(resolver.resolve()?.worker.command.as_deref(), Some("node"));

    resolver.invalidate();
    assert_eq!(resolver.generation(), 1);
    assert_eq!(resolver.resolve()?.worker.command.as_deref(), Some("bun"));
    Ok(())
}

#[test]
fn builder_produces_valid_configs() {
    let cfg = ConfigFileBuilder::new("node")
        .arg("worker.mjs")
        .env("CI", "1")
        .shutdown_grace("1s")
        .watch_exclude("**/dist/**")
        .build();
    assert_eq!(cfg.worker.args, vec!["worker.mjs"]);
    assert_eq!(cfg.supervisor.shutdown_grace, Duration::from_secs(1));
    assert_eq!(cfg.watch.exclude, vec!["**/dist/**"]);
}

#[test]
fn launch_modes_parse_case_insensitively() {
    assert_eq!("Terminal".parse::<LaunchMode>(), Ok(LaunchMode::Terminal));
    assert_eq!(" attach ".parse::<LaunchMode>(), Ok(LaunchMode::Attach));
    assert_eq!(LaunchMode::default(), LaunchMode::Child);
    assert!("daemon".parse::<LaunchMode>().is_err());
}
