//! Panel maintenance command - main entry point
//!
//! Short-lived process: loads the configuration and the record store, runs
//! one command and exits. Plugin commands wait for their task to finish so
//! the command is not cut off when the process ends.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use hostpanel::cli::{Cli, Commands};
use hostpanel::config::{LogConfig, PanelConfig};
use hostpanel::{
    BackupFlow, BashExecutor, CutoffFlow, JsonFileStore, PanelState, PluginService, RecordStore,
    ShellExecutor, ShellUpdateSource, Task, TaskEngine, TaskStatus, Updater, Website,
    parse_keep_count, process_guard,
};
use hostpanel::backup::write_mysql_password;

/// Console plus daily rolling file under `log.directory`, keeping `log.days` files.
///
/// The returned guard flushes the file writer on drop and must outlive every
/// log call.
fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "hostpanel={level},panel={level}",
            level = config.level
        ))
    });
    let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match std::fs::create_dir_all(&config.directory)
        .map_err(anyhow::Error::from)
        .and_then(|()| config.file_appender())
    {
        Ok(file_appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(non_blocking),
                )
                .init();
            Some(guard)
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .init();
            warn!(
                "Log directory {:?} unavailable, logging to console only: {:#}",
                config.directory, e
            );
            None
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = PanelConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load configuration {:?}", cli.config))?;

    let _log_guard = init_logging(&config.log);
    info!("panel {} starting", env!("CARGO_PKG_VERSION"));

    // Running commands are taken down with the panel on SIGINT/SIGTERM/SIGHUP
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    let store: Arc<dyn RecordStore> = Arc::new(
        JsonFileStore::open(&config.store_path)
            .with_context(|| format!("Failed to open record store {:?}", config.store_path))?,
    );
    let shell: Arc<dyn ShellExecutor> = Arc::new(BashExecutor::new());
    let engine = Arc::new(TaskEngine::new(Arc::clone(&store), Arc::clone(&shell)));
    debug!("Record store at {:?}", config.store_path);

    run(cli.command, &config, store, shell, engine)
}

fn run(
    command: Commands,
    config: &PanelConfig,
    store: Arc<dyn RecordStore>,
    shell: Arc<dyn ShellExecutor>,
    engine: Arc<TaskEngine>,
) -> Result<()> {
    let plugins = PluginService::new(Arc::clone(&engine), &config.task_log_dir);

    match command {
        Commands::Update => {
            let source = ShellUpdateSource::new(shell, config.update.clone());
            let updater = Updater::new(engine, Arc::new(source), PanelState::new());
            let version = updater.run()?;
            println!("Panel updated to {version}");
        }
        Commands::CleanTask => {
            let changed = engine.sweep_stale()?;
            println!("Marked {changed} task(s) as failed");
        }
        Commands::Backup {
            kind,
            name,
            dir,
            save,
        } => {
            let flow = BackupFlow::new(store, shell, &config.temp_dir);
            let report = flow.run(kind, &name, &dir, parse_keep_count(&save))?;
            println!("Backup written to {}", report.artifact.display());
            for path in &report.pruned {
                println!("Removed old backup {}", path.display());
            }
        }
        Commands::Cutoff { name, save } => {
            let flow = CutoffFlow::new(store, shell, &config.site_log_dir);
            let report = flow.run(&name, parse_keep_count(&save))?;
            println!("Log archived to {}", report.archive.display());
            for path in &report.pruned {
                println!("Removed old archive {}", path.display());
            }
        }
        Commands::InstallPlugin { slug } => await_task(&engine, plugins.install(&slug)?)?,
        Commands::UninstallPlugin { slug } => await_task(&engine, plugins.uninstall(&slug)?)?,
        Commands::UpdatePlugin { slug } => await_task(&engine, plugins.update(&slug)?)?,
        Commands::WritePlugin { slug, version } => {
            let plugin = plugins.write_installed(&slug, &version)?;
            println!("Recorded {} {}", plugin.slug, plugin.version);
        }
        Commands::DeletePlugin { slug } => {
            if plugins.delete_installed(&slug)? {
                println!("Removed {slug}");
            } else {
                println!("{slug} was not installed");
            }
        }
        Commands::WriteMysqlPassword { password } => {
            write_mysql_password(store.as_ref(), &password)?;
            println!("MySQL root password saved");
        }
        Commands::WriteSite { name, path } => {
            if name.trim().is_empty() || path.as_os_str().is_empty() {
                anyhow::bail!("website name and path are required");
            }
            store.create_website(Website {
                name: name.clone(),
                path,
            })?;
            println!("Registered website {name}");
        }
        Commands::Plugins => {
            for listing in plugins.list()? {
                let installed = listing
                    .installed
                    .map(|p| p.version)
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<14} {:<16} {:<10} {}",
                    listing.descriptor.slug,
                    listing.descriptor.name,
                    installed,
                    listing.descriptor.description
                );
            }
        }
        Commands::Task { id } => {
            let task = engine
                .task(id)?
                .with_context(|| format!("Task {id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
    }

    Ok(())
}

/// Print the task handle, wait for its worker and report the outcome.
fn await_task(engine: &TaskEngine, task: Task) -> Result<()> {
    println!("Task {}: {}", task.id, task.name);
    println!("Log: {}", task.log.display());

    engine.wait_idle();

    let status = engine
        .task(task.id)?
        .map(|t| t.status)
        .with_context(|| format!("Task {} disappeared", task.id))?;
    println!("Status: {status}");
    if status == TaskStatus::Failed {
        anyhow::bail!("task {} failed, see {}", task.id, task.log.display());
    }
    Ok(())
}
