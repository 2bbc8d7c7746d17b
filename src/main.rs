//! catalog-injector CLI: keeps a catalog store in sync with a definition tree.

use catalog_injector::cli::{self, Options};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "catalog-injector",
    version,
    about = "Validate catalog definitions and reconcile them into the catalog store"
)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true, env = "CATALOG_CONFIG")]
    config: Option<PathBuf>,

    /// Skip refreshing the source tree before a pass
    #[arg(long, global = true, env = "CATALOG_PULL_SKIP")]
    pull_skip: bool,

    /// Verbose logging
    #[arg(long, global = true, env = "CATALOG_DEBUG")]
    debug: bool,

    #[command(subcommand)]
    command: cli::Commands,
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let args = Cli::parse();
    init_tracing(args.debug);

    let result = catalog_injector::config::load(args.config.as_deref()).and_then(|config| {
        let options = Options {
            config,
            skip_refresh: args.pull_skip,
        };
        cli::dispatch(args.command, &options)
    });
    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
