//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::LedgerAction;
use crate::report;
use crate::scripted::ScriptedTrainer;
use anyhow::{Context, bail};
use figment::Figment;
use figment::providers::{Format, Serialized, Toml};
use modelprov_core::bundle::{VERIFIER_BINARY, VerifierSource};
use modelprov_core::config::workspace_config_path;
use modelprov_core::{PrivateKey, ProvenanceConfig, Verifier, generate_keypair};
use modelprov_train::{
    AdaptiveTrainer, FileLedger, RemoteLedger, SharedLedger, TrainerOptions, discover_base_models,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Ledger file used when neither an endpoint nor a file is configured.
const DEFAULT_LEDGER_FILE: &str = "ledger.json";
const PRIVATE_KEY_FILE: &str = "modelprov.key";
const PUBLIC_KEY_FILE: &str = "modelprov.pub";

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Train {
            losses,
            registry,
            datasets,
            out,
            epochs,
            seed,
        } => {
            let mut config = load(workspace, config_file)?;
            if let Some(registry) = registry {
                config.registry.root = Some(registry);
            }
            if !datasets.is_empty() {
                config.datasets.paths = datasets;
            }
            if let Some(out) = out {
                config.output.bundle_dir = out;
            }
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            if let Some(seed) = seed {
                config.training.seed = seed;
            }
            handle_train(config, &losses).await
        }
        Commands::Verify {
            bundle,
            dataset_root,
            json,
        } => handle_verify(&bundle, dataset_root, json),
        Commands::Keygen { out } => handle_keygen(&out),
        Commands::Ledger { action } => {
            handle_ledger(action, load(workspace, config_file)?).await
        }
        Commands::Discover { registry } => {
            let config = load(workspace, config_file)?;
            handle_discover(registry.or(config.registry.root)).await
        }
        Commands::Config { action } => handle_config(action, workspace, config_file),
    }
}

/// Layered configuration plus the optional `--config` file on top.
fn load(workspace: &Path, config_file: Option<&Path>) -> anyhow::Result<ProvenanceConfig> {
    let config = modelprov_core::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    let Some(file) = config_file else {
        return Ok(config);
    };
    if !file.is_file() {
        bail!("Configuration file not found: {}", file.display());
    }
    Figment::from(Serialized::defaults(config))
        .merge(Toml::file(file))
        .extract()
        .map_err(|e| anyhow::anyhow!("Configuration error in {}: {}", file.display(), e))
}

/// The ledger selected by configuration: remote endpoint, else a JSON file.
fn open_ledger(config: &ProvenanceConfig) -> anyhow::Result<SharedLedger> {
    if let Some(endpoint) = &config.ledger.endpoint {
        let ledger = RemoteLedger::new(
            endpoint,
            config.ledger.api_token.clone(),
            Duration::from_secs(config.ledger.timeout_secs),
        )?;
        return Ok(Arc::new(ledger));
    }
    let path = config
        .ledger
        .file
        .clone()
        .unwrap_or_else(|| config.output.bundle_dir.join(DEFAULT_LEDGER_FILE));
    Ok(Arc::new(FileLedger::open(path)?))
}

/// Copy the verifier next to the running executable into bundles when it
/// exists; otherwise bundles get a launcher script.
fn verifier_source() -> VerifierSource {
    let sibling = std::env::current_exe().ok().and_then(|exe| {
        exe.parent().map(|dir| {
            dir.join(format!("{VERIFIER_BINARY}{}", std::env::consts::EXE_SUFFIX))
        })
    });
    match sibling {
        Some(path) if path.is_file() => VerifierSource::Binary(path),
        _ => {
            debug!("No verifier binary next to the executable, bundles get a launcher");
            VerifierSource::Launcher
        }
    }
}

async fn handle_train(config: ProvenanceConfig, losses: &Path) -> anyhow::Result<ExitCode> {
    for warning in config.warnings() {
        warn!("{warning}");
    }
    config.validate()?;

    let key_path = config
        .signing
        .private_key_path
        .as_deref()
        .context("signing.private_key_path is not set")?;
    let signing_key = PrivateKey::load(key_path)?;
    let registry = config
        .registry
        .root
        .as_deref()
        .context("registry.root is not set")?;

    let trainer = Arc::new(ScriptedTrainer::from_file(losses)?);
    let ledger = open_ledger(&config)?;
    let models = discover_base_models(registry).await?;
    for model in &models {
        if !trainer.models().any(|name| name == model.name) {
            warn!(model = %model.name, "No loss curve for discovered base model");
        }
    }

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current epoch");
                cancel.cancel();
            }
        })
    };

    let options = TrainerOptions {
        model_name: config.model.name.clone(),
        version: config.model.version.clone(),
        training: config.training.clone(),
        output_dir: config.output.bundle_dir.clone(),
        verifier: verifier_source(),
    };
    let mut adaptive =
        AdaptiveTrainer::with_cancellation(trainer, ledger, signing_key, options, cancel);
    let result = adaptive.run(&models, &config.datasets.paths).await;
    interrupt.abort();
    let outcome = result?;

    println!("DNA:        {}", outcome.fingerprint);
    println!("State:      {:?} after {} epoch(s)", outcome.state, outcome.epochs_run());
    for (name, weight) in outcome.final_weights.iter() {
        println!("  {name:<24} {weight:.4}");
    }
    println!("Ledger:     {}", outcome.write.immutable_hash);
    println!("Bundle:     {}", outcome.bundle_path.display());
    Ok(ExitCode::SUCCESS)
}

fn handle_verify(
    bundle: &Path,
    dataset_root: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let mut verifier = Verifier::new();
    if let Some(root) = dataset_root {
        verifier = verifier.with_dataset_root(root);
    }
    let report = verifier.verify(bundle)?;
    if json {
        println!("{}", report::to_json(&report)?);
    } else {
        print!("{}", report::render(&report));
    }
    Ok(report::exit_code(&report))
}

fn handle_keygen(out: &Path) -> anyhow::Result<ExitCode> {
    let private_path = out.join(PRIVATE_KEY_FILE);
    let public_path = out.join(PUBLIC_KEY_FILE);
    for path in [&private_path, &public_path] {
        if path.exists() {
            bail!("Refusing to overwrite existing key file {}", path.display());
        }
    }

    let (private_key, public_key) = generate_keypair();
    private_key.save(&private_path)?;
    std::fs::write(&public_path, format!("{public_key}\n"))?;
    warn!("Generated keys are for testing; production signing keys must come from managed key material");
    info!(path = %private_path.display(), "Signing key written");

    println!("Private key: {}", private_path.display());
    println!("Public key:  {}", public_path.display());
    println!("             {public_key}");
    Ok(ExitCode::SUCCESS)
}

async fn handle_ledger(action: LedgerAction, config: ProvenanceConfig) -> anyhow::Result<ExitCode> {
    match action {
        LedgerAction::List { limit, offset } => {
            let ledger = open_ledger(&config)?;
            let entries = ledger.list(limit, offset).await?;
            if entries.is_empty() {
                println!("No ledger entries ({} backend).", ledger.backend());
                return Ok(ExitCode::SUCCESS);
            }
            for (i, entry) in entries.iter().enumerate() {
                let hash = entry
                    .immutable_hash
                    .get(..16)
                    .unwrap_or(&entry.immutable_hash);
                let signed = if entry.is_signed() { "signed" } else { "UNSIGNED" };
                println!(
                    "#{:<4} {}  {:<22} {}  {}…  {}",
                    offset + i,
                    entry.timestamp,
                    entry.event,
                    entry.dna,
                    hash,
                    signed
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn handle_discover(registry: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let Some(registry) = registry else {
        bail!("No registry given: pass --registry or set registry.root");
    };
    let models = discover_base_models(&registry).await?;
    if models.is_empty() {
        println!("No base models found in {}", registry.display());
    }
    for model in &models {
        println!(
            "{:<24} {:>8}  {}",
            model.name,
            format_parameters(model.parameters),
            model.path.display()
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn format_parameters(parameters: Option<u64>) -> String {
    match parameters {
        Some(n) if n >= 1_000_000_000 => format!("{:.1}B", n as f64 / 1e9),
        Some(n) if n >= 1_000_000 => format!("{:.0}M", n as f64 / 1e6),
        Some(n) => n.to_string(),
        None => "-".to_string(),
    }
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<ExitCode> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(ExitCode::SUCCESS);
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let toml_str = toml::to_string_pretty(&ProvenanceConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(ExitCode::SUCCESS)
        }
        ConfigAction::Show => {
            let mut config = load(workspace, config_file)?;
            if config.ledger.api_token.is_some() {
                config.ledger.api_token = Some("********".to_string());
            }
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
