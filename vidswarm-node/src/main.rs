// vidswarm tracker launcher: config, logging, then serve until Ctrl+C or SIGTERM.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vidswarm_node::config;

#[derive(Debug, Parser)]
#[command(name = "vidswarm-tracker", version, about = "vidswarm tracker server")]
struct Args {
    /// Bind host (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// Config file to load instead of the default search path.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More logging; repeat for more detail.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut cfg = match &args.config {
        Some(path) => config::load_from(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => config::load(),
    };
    if let Some(host) = args.host {
        cfg.tracker.host = host;
    }
    if let Some(port) = args.port {
        cfg.tracker.port = port;
    }

    let rt = tokio::runtime::Runtime::new().context("starting runtime")?;
    rt.block_on(vidswarm_node::serve_until_shutdown(&cfg.tracker))
        .context("tracker failed")?;
    Ok(())
}

/// `RUST_LOG` wins; otherwise `-v` picks the level.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
