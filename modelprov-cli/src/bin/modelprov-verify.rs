//! Standalone offline verifier, shipped inside every certified bundle.
//!
//! Exit status: 0 when the bundle verifies, 2 when it does not, 1 when it
//! cannot be read at all.

#[path = "../report.rs"]
mod report;

use clap::Parser;
use modelprov_core::Verifier;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Re-verify a modelprov bundle without network access
#[derive(Parser, Debug)]
#[command(name = "modelprov-verify", version, about, long_about = None)]
struct Args {
    /// Bundle directory
    bundle: PathBuf,

    /// Look up datasets by file name under this directory
    #[arg(long)]
    dataset_root: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let mut verifier = Verifier::new();
    if let Some(root) = args.dataset_root {
        verifier = verifier.with_dataset_root(root);
    }
    let report = verifier.verify(&args.bundle)?;
    if args.json {
        println!("{}", report::to_json(&report)?);
    } else {
        print!("{}", report::render(&report));
    }
    Ok(report::exit_code(&report))
}
