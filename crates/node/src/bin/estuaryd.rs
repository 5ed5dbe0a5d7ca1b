//! Estuary full node.
//!
//! # Usage
//!
//! ```bash
//! # Start with a resources directory containing estuary.toml
//! estuaryd --resources /etc/estuary/resources
//!
//! # Raise log verbosity without touching RUST_LOG
//! estuaryd --resources ./resources --log-level debug
//! ```
//!
//! Exit codes: 0 on clean shutdown, -1 when configuration fails to load,
//! -2 when the node fails while booting or running, -3 when another
//! instance already holds the data directory.

use clap::Parser;
use std::path::PathBuf;

/// Estuary full node.
///
/// Runs the block and transaction ingest pipelines until interrupted.
#[derive(Parser, Debug)]
#[command(name = "estuaryd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory containing estuary.toml
    #[arg(short, long, default_value = "resources")]
    resources: PathBuf,

    /// Log level filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let cli = Cli::parse();
    let code = estuary_node::server::run(&cli.resources, &cli.log_level);
    std::process::exit(code);
}
