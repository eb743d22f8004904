// src/config/validate.rs

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use globset::Glob;

use crate::config::model::{
    ConfigFile, RawConfigFile, SupervisorConfig, WatchSection, WorkerConfig,
};
use crate::errors::{RelayError, Result};
use crate::types::LaunchMode;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::RelayError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let worker = validate_worker(&raw)?;
        let supervisor = validate_supervisor(&raw)?;
        validate_watch(&raw.watch)?;
        Ok(ConfigFile::new_unchecked(worker, supervisor, raw.watch))
    }
}

fn validate_worker(cfg: &RawConfigFile) -> Result<WorkerConfig> {
    let worker = &cfg.worker;

    let command = worker
        .command
        .as_ref()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    if command.is_none() && worker.mode != LaunchMode::Attach {
        return Err(RelayError::ConfigError(format!(
            "[worker].command is required in {:?} mode",
            worker.mode
        )));
    }

    let attach_address = match (&worker.attach_address, worker.mode) {
        (Some(addr), _) => Some(parse_address(addr)?),
        (None, LaunchMode::Attach) => {
            return Err(RelayError::ConfigError(
                "[worker].attach_address is required in attach mode".to_string(),
            ));
        }
        (None, _) => None,
    };

    Ok(WorkerConfig {
        command,
        args: worker.args.clone(),
        mode: worker.mode,
        cwd: PathBuf::from(worker.cwd.as_deref().unwrap_or(".")),
        config_file: worker.config_file.clone(),
        workspace_file: worker.workspace_file.clone(),
        arguments: worker.arguments.clone(),
        env: worker.env.clone(),
        debug: worker.debug,
        ast_collect: worker.ast_collect,
        attach_address,
    })
}

fn validate_supervisor(cfg: &RawConfigFile) -> Result<SupervisorConfig> {
    let grace = parse_duration(&cfg.supervisor.shutdown_grace).map_err(|e| {
        RelayError::ConfigError(format!("[supervisor].shutdown_grace: {e}"))
    })?;
    Ok(SupervisorConfig {
        shutdown_grace: grace,
    })
}

fn validate_watch(watch: &WatchSection) -> Result<()> {
    for pattern in watch.include.iter().chain(watch.exclude.iter()) {
        Glob::new(pattern).map_err(|e| {
            RelayError::ConfigError(format!("[watch] invalid glob '{pattern}': {e}"))
        })?;
    }
    Ok(())
}

fn parse_address(addr: &str) -> Result<SocketAddr> {
    addr.trim().parse().map_err(|e| {
        RelayError::ConfigError(format!("[worker].attach_address '{addr}': {e}"))
    })
}

/// Parse durations like `"5s"`, `"250ms"`, `"2m"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s or m",
            unit
        )),
    }
}
