//! modelprov CLI: adaptive training with certified output, ledger
//! inspection and offline bundle verification.

mod commands;
mod report;
mod scripted;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// modelprov: model DNA fingerprints and a signed write-once training ledger
#[derive(Parser, Debug)]
#[command(name = "modelprov", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (holds `.modelprov/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Extra configuration file, merged over workspace and environment config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run adaptive training and certify the result
    Train {
        /// JSON file of per-model loss curves
        #[arg(long)]
        losses: PathBuf,
        /// Base model registry directory
        #[arg(long)]
        registry: Option<PathBuf>,
        /// Dataset file (repeatable)
        #[arg(long = "dataset")]
        datasets: Vec<PathBuf>,
        /// Directory certified bundles are written to
        #[arg(long)]
        out: Option<PathBuf>,
        /// Maximum number of epochs
        #[arg(long)]
        epochs: Option<u32>,
        /// Seed for the boost/penalty factors
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Verify a certified bundle offline
    Verify {
        /// Bundle directory
        bundle: PathBuf,
        /// Look up datasets by file name under this directory
        #[arg(long)]
        dataset_root: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate an Ed25519 signing key pair (for testing only)
    Keygen {
        /// Directory the key files are written to
        #[arg(long)]
        out: PathBuf,
    },
    /// Inspect the training ledger
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },
    /// List base models found in the registry
    Discover {
        /// Base model registry directory
        #[arg(long)]
        registry: Option<PathBuf>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum LedgerAction {
    /// List ledger entries in write order
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default workspace configuration file
    Init,
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "modelprov", "modelprov")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "modelprov.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_train_with_repeated_datasets() {
        let cli = Cli::try_parse_from([
            "modelprov",
            "-vv",
            "train",
            "--losses",
            "losses.json",
            "--dataset",
            "a.jsonl",
            "--dataset",
            "b.json",
            "--epochs",
            "7",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Train {
                losses,
                datasets,
                epochs,
                seed,
                ..
            } => {
                assert_eq!(losses, PathBuf::from("losses.json"));
                assert_eq!(datasets, vec![PathBuf::from("a.jsonl"), PathBuf::from("b.json")]);
                assert_eq!(epochs, Some(7));
                assert_eq!(seed, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_verify_and_ledger() {
        let cli = Cli::try_parse_from(["modelprov", "verify", "bundles/x", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Verify { json: true, .. }));

        let cli = Cli::try_parse_from(["modelprov", "ledger", "list", "--limit", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Ledger {
                action: LedgerAction::List {
                    limit: 5,
                    offset: 0
                }
            }
        ));
    }

    #[test]
    fn test_train_requires_losses() {
        assert!(Cli::try_parse_from(["modelprov", "train"]).is_err());
    }
}
