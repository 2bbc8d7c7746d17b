//! CLI subcommands: run, sync, lint, status.

use crate::config::Config;
use crate::core::discovery::SourceLayout;
use crate::core::lint;
use crate::core::scheduler::{PassOutcome, PollSettings, Scheduler};
use crate::core::store::{CatalogStore, SqliteStore};
use crate::core::types::{EntityKind, PassReport};
use crate::server;
use crate::source::git::GitSource;
use crate::source::{LocalSource, SourceRefresher};
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the health endpoint and reconcile on every poll tick
    Run,

    /// Refresh the source and run a single pass
    Sync,

    /// Check a definition tree without touching the store
    Lint {
        /// Source tree root (holds recipes/, templates/, endpoints/, apps/)
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// List persisted records per collection
    Status {
        /// Only show this kind (recipe, template, endpoint, application)
        #[arg(short, long)]
        kind: Option<String>,
    },
}

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Options {
    pub config: Config,
    /// Bypass source refresh
    pub skip_refresh: bool,
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands, options: &Options) -> Result<(), String> {
    match cmd {
        Commands::Run => cmd_run(options),
        Commands::Sync => cmd_sync(options),
        Commands::Lint { dir } => cmd_lint(&dir),
        Commands::Status { kind } => cmd_status(&options.config, kind.as_deref()),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start runtime: {}", e))
}

fn open_store(config: &Config) -> Result<Arc<SqliteStore>, String> {
    SqliteStore::open(&config.store.path, config.store.timeout())
        .map(Arc::new)
        .map_err(|e| format!("cannot open store {}: {}", config.store.path.display(), e))
}

/// Git checkout when a remote is configured, otherwise the plain directory.
pub fn source_for(config: &Config) -> Arc<dyn SourceRefresher> {
    match &config.source.git {
        Some(url) => Arc::new(GitSource::new(
            url.clone(),
            config.source.dir.clone(),
            config.source.refresh_timeout(),
        )),
        None => Arc::new(LocalSource::new(config.source.dir.clone())),
    }
}

fn poll_settings(options: &Options) -> PollSettings {
    PollSettings {
        namespace: options.config.namespace.clone(),
        interval: Duration::from_secs(options.config.poll.interval_secs),
        backoff: Duration::from_secs(options.config.poll.backoff_secs),
        skip_refresh: options.skip_refresh,
    }
}

fn cmd_run(options: &Options) -> Result<(), String> {
    let store: Arc<dyn CatalogStore> = open_store(&options.config)?;
    let scheduler = Scheduler::new(store, source_for(&options.config), poll_settings(options));
    let addr = options.config.web.addr();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = %options.config.namespace,
        source = %options.config.source.dir.display(),
        "starting catalog injector"
    );
    runtime()?.block_on(async move {
        tokio::select! {
            result = server::serve(&addr) => result,
            () = scheduler.run_forever() => Ok(()),
        }
    })
}

fn cmd_sync(options: &Options) -> Result<(), String> {
    let store: Arc<dyn CatalogStore> = open_store(&options.config)?;
    let mut scheduler = Scheduler::new(store, source_for(&options.config), poll_settings(options));

    match runtime()?.block_on(scheduler.run_once()) {
        PassOutcome::Completed(report) => {
            print_report(&report);
            Ok(())
        }
        PassOutcome::Aborted(e) => Err(format!("pass aborted: {}", e)),
        PassOutcome::Crashed(e) => Err(format!("pass crashed: {}", e)),
    }
}

fn print_report(report: &PassReport) {
    for kind in EntityKind::ORDER {
        println!("{:<12} {}", kind, report.kind(kind));
    }
}

fn cmd_lint(dir: &Path) -> Result<(), String> {
    if !dir.is_dir() {
        return Err(format!("{} is not a directory", dir.display()));
    }
    let report = lint::lint(&SourceLayout::new(dir));
    for finding in &report.findings {
        println!("{}", finding);
    }
    if report.passed() {
        println!("{} definitions ok", report.findings.len());
        Ok(())
    } else {
        Err(format!(
            "{} of {} definitions failed",
            report.failures(),
            report.findings.len()
        ))
    }
}

fn parse_kind(name: &str) -> Result<EntityKind, String> {
    EntityKind::ORDER
        .into_iter()
        .find(|k| k.to_string() == name || k.source_dir() == name)
        .ok_or_else(|| format!("unknown kind '{}'", name))
}

fn cmd_status(config: &Config, kind: Option<&str>) -> Result<(), String> {
    let kinds = match kind {
        Some(name) => vec![parse_kind(name)?],
        None => EntityKind::ORDER.to_vec(),
    };
    let store = open_store(config)?;
    let Some(namespace) = store
        .find_namespace(&config.namespace)
        .map_err(|e| e.to_string())?
    else {
        println!("Namespace: {} (no pass has run yet)", config.namespace);
        return Ok(());
    };

    println!("Namespace: {} ({})", config.namespace, namespace);
    for kind in kinds {
        let docs = store.list(kind, &namespace).map_err(|e| e.to_string())?;
        println!("{} ({}):", crate::core::store::collection(kind), docs.len());
        for doc in docs {
            let field = |name: &str| {
                doc.body
                    .get(name)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            let remote = field("remote");
            let version = field("remote_version");
            if version.is_empty() {
                println!("  {} {}", doc.id, remote);
            } else {
                println!("  {} {}/{}", doc.id, remote, version);
            }
        }
    }
    Ok(())
}
