// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod pipeline;
pub mod types;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{ConfigFile, TaskEntry, TaskOptions};
use crate::engine::{Orchestrator, RuntimeEvent, RuntimeOptions};
use crate::exec::loader::ModuleRegistry;
use crate::exec::pool::WorkerPool;
use crate::pipeline::{BuildContext, Scheduler};
use crate::watch::watcher::{ChangeSource, WatchOptions};
use crate::watch::{SnapshotSource, spawn_watcher};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - worker pool, task loader and scheduler
/// - the change source (file watcher, or a one-off scan with `--once`)
/// - the orchestrator runtime
/// - Ctrl-C handling
///
/// Returns the result of the last pipeline run, if one finished.
pub async fn run(args: CliArgs) -> Result<Option<bool>> {
    run_with_registry(args, ModuleRegistry::with_builtins()).await
}

/// [`run`] with a caller-supplied module registry, for embedding watchpipe
/// with extra in-process task modules.
pub async fn run_with_registry(args: CliArgs, registry: ModuleRegistry) -> Result<Option<bool>> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(None);
    }

    let pool_size = args.pool_size.unwrap_or(cfg.worker_pool.pool_size);
    if pool_size == 0 {
        bail!("--pool-size must be >= 1");
    }

    let root_dir = config_root_dir(&config_path);
    info!(root = %root_dir.display(), pool_size, "starting watchpipe");

    let pool = WorkerPool::new(pool_size)?;
    let scheduler = {
        let ctx = BuildContext {
            loader: &registry,
            pool: &pool,
            root: &root_dir,
        };
        Arc::new(Scheduler::from_config(&cfg, &ctx)?)
    };

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let watch_options = WatchOptions::from_config(&root_dir, &cfg.watcher)?;
    let source: Arc<dyn ChangeSource> = if args.once {
        // No watching in --once mode: one scan, one run.
        let snapshot = SnapshotSource::scan(&root_dir, &watch_options.filter)?;
        rt_tx.send(RuntimeEvent::ChangesDetected).await?;
        Arc::new(snapshot)
    } else {
        Arc::new(spawn_watcher(watch_options, rt_tx.clone())?)
    };

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Ctrl-C received; shutting down");
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let options = RuntimeOptions {
        exit_when_idle: args.once,
    };
    let orchestrator = Orchestrator::spawn(scheduler, source, Some(pool), options, rt_tx, rt_rx);
    Ok(orchestrator.wait().await?)
}

/// Figure out a sensible project root for watching.
///
/// - If the config path has a non-empty parent (e.g. "configs/Watchpipe.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Watchpipe.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Simple dry-run output: print the watcher settings and the pipeline.
fn print_dry_run(cfg: &ConfigFile) {
    println!("watchpipe dry-run");
    if let Some(include) = &cfg.watcher.include {
        println!("  watcher.include = {include:?}");
    }
    if let Some(exclude) = &cfg.watcher.exclude {
        println!("  watcher.exclude = {exclude:?}");
    }
    println!(
        "  watcher.on_change_timeout = {:?}",
        cfg.watcher.effective_on_change_timeout()
    );
    println!("  worker_pool.pool_size = {}", cfg.worker_pool.pool_size);
    println!();

    println!("pipeline ({} entries):", cfg.tasks.len());
    for entry in cfg.tasks.iter() {
        match entry {
            TaskEntry::Task(task) => print_task(task, "  "),
            TaskEntry::Group(group) => {
                let mode = if group.parallel { "parallel" } else { "sequential" };
                println!("  - group {} ({mode})", entry.name());
                for task in group.tasks.iter() {
                    print_task(task, "      ");
                }
            }
        }
    }

    debug!("dry-run complete (no execution)");
}

fn print_task(task: &TaskOptions, indent: &str) {
    println!("{indent}- {}", task.display_name());
    println!("{indent}    module: {}", task.module);
    if task.fork {
        println!("{indent}    fork: true (persistent: {})", task.persistent);
    }
    if let Some(include) = &task.include {
        println!("{indent}    include: {include:?}");
    }
    if let Some(exclude) = &task.exclude {
        println!("{indent}    exclude: {exclude:?}");
    }
    if !task.options.is_null() {
        println!("{indent}    options: {}", task.options);
    }
}
