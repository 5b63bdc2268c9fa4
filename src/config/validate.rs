// src/config/validate.rs

use globset::Glob;

use crate::config::model::{ConfigFile, RawConfigFile, TaskEntry, TaskOptions};
use crate::errors::{Result, WatchpipeError};
use crate::types::parse_duration;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::WatchpipeError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

/// Re-run validation on an already constructed config (e.g. after tests
/// mutate one by hand).
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    let raw = RawConfigFile {
        watcher: cfg.watcher.clone(),
        worker_pool: cfg.worker_pool.clone(),
        tasks: cfg.tasks.clone(),
    };
    validate_raw_config(&raw)
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_watcher(cfg)?;
    validate_worker_pool(cfg)?;
    validate_entries(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.tasks.is_empty() {
        return Err(WatchpipeError::ConfigError(
            "config must contain at least one [[tasks]] entry".to_string(),
        ));
    }
    Ok(())
}

fn validate_watcher(cfg: &RawConfigFile) -> Result<()> {
    validate_globs("[watcher].include", cfg.watcher.include.as_deref())?;
    validate_globs("[watcher].exclude", cfg.watcher.exclude.as_deref())?;
    validate_duration(
        "[watcher].on_change_timeout",
        cfg.watcher.on_change_timeout.as_deref(),
    )
}

fn validate_worker_pool(cfg: &RawConfigFile) -> Result<()> {
    if cfg.worker_pool.pool_size == 0 {
        return Err(WatchpipeError::ConfigError(
            "[worker_pool].pool_size must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_entries(cfg: &RawConfigFile) -> Result<()> {
    for entry in cfg.tasks.iter() {
        match entry {
            TaskEntry::Task(task) => validate_task(task)?,
            TaskEntry::Group(group) => {
                if group.tasks.is_empty() {
                    return Err(WatchpipeError::ConfigError(format!(
                        "group '{}' must contain at least one task",
                        entry.name()
                    )));
                }
                for task in group.tasks.iter() {
                    validate_task(task)?;
                }
            }
        }
    }
    Ok(())
}

fn validate_task(task: &TaskOptions) -> Result<()> {
    if task.module.trim().is_empty() {
        return Err(WatchpipeError::ConfigError(format!(
            "task '{}' has an empty `module`",
            task.display_name()
        )));
    }

    let name = task.display_name();
    validate_globs(&format!("task '{name}' include"), task.include.as_deref())?;
    validate_globs(&format!("task '{name}' exclude"), task.exclude.as_deref())?;
    validate_duration(
        &format!("task '{name}' stop_timeout"),
        task.stop_timeout.as_deref(),
    )?;
    validate_duration(
        &format!("task '{name}' exit_timeout"),
        task.exit_timeout.as_deref(),
    )
}

fn validate_globs(what: &str, patterns: Option<&[String]>) -> Result<()> {
    for pat in patterns.unwrap_or_default() {
        if let Err(e) = Glob::new(pat) {
            return Err(WatchpipeError::ConfigError(format!(
                "{what}: invalid glob pattern '{pat}': {e}"
            )));
        }
    }
    Ok(())
}

fn validate_duration(what: &str, raw: Option<&str>) -> Result<()> {
    if let Some(s) = raw {
        parse_duration(s).map_err(|e| WatchpipeError::ConfigError(format!("{what}: {e}")))?;
    }
    Ok(())
}
