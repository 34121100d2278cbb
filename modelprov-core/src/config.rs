//! Configuration for modelprov.
//!
//! Uses `figment` for layered configuration: defaults -> user config ->
//! workspace `.modelprov/config.toml` -> `MODELPROV_*` environment -> CLI
//! overrides.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::entry::TrainingConfig;
use crate::error::{ProvenanceError, Result};

const ENV_PREFIX: &str = "MODELPROV_";
const WORKSPACE_DIR: &str = ".modelprov";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvenanceConfig {
    pub registry: RegistryConfig,
    pub datasets: DatasetsConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub ledger: LedgerConfig,
    pub signing: SigningConfig,
    pub output: OutputConfig,
}

/// Where base models live, one subdirectory per model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetsConfig {
    pub paths: Vec<PathBuf>,
}

/// Name and version stamped into the fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub version: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "modelprov-model".to_string(),
            version: "1.0".to_string(),
        }
    }
}

/// Ledger backend selection. A remote `endpoint` wins over a local `file`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub endpoint: Option<String>,
    pub file: Option<PathBuf>,
    pub api_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            file: None,
            api_token: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub private_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub bundle_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            bundle_dir: PathBuf::from("bundles"),
        }
    }
}

impl ProvenanceConfig {
    /// Non-fatal oddities worth logging. Empty when nothing looks off.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.ledger.endpoint.is_some() && self.ledger.file.is_some() {
            warnings.push("both ledger.endpoint and ledger.file are set; using endpoint".into());
        }
        if self.ledger.api_token.is_some() && self.ledger.endpoint.is_none() {
            warnings.push("ledger.api_token is set but no ledger.endpoint is configured".into());
        }
        if let Some(endpoint) = &self.ledger.endpoint
            && endpoint.starts_with("http://")
            && !is_loopback(endpoint)
        {
            warnings.push(format!("ledger endpoint {endpoint} is not using TLS"));
        }
        if self.training.auto_stop_patience > self.training.epochs {
            warnings.push(format!(
                "auto_stop_patience ({}) exceeds epochs ({}); auto-stop can never fire",
                self.training.auto_stop_patience, self.training.epochs
            ));
        }
        warnings
    }

    /// Check everything a training run needs before any epoch starts.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.registry.root.is_none() {
            problems.push("registry.root is not set".to_string());
        }
        if self.datasets.paths.is_empty() {
            problems.push("datasets.paths is empty".to_string());
        }
        if self.model.name.trim().is_empty() {
            problems.push("model.name is empty".to_string());
        }
        if self.signing.private_key_path.is_none() {
            problems.push("signing.private_key_path is not set".to_string());
        }
        if self.ledger.timeout_secs == 0 {
            problems.push("ledger.timeout_secs must be positive".to_string());
        }
        if let Err(e) = self.training.validate() {
            problems.push(e.to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ProvenanceError::configuration(problems.join("; ")))
        }
    }
}

fn is_loopback(endpoint: &str) -> bool {
    let host = endpoint.trim_start_matches("http://");
    host.starts_with("localhost") || host.starts_with("127.") || host.starts_with("[::1]")
}

/// User-level config file (`~/.config/modelprov/config.toml` on Linux).
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "modelprov", "modelprov")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(WORKSPACE_DIR).join("config.toml")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides
/// 2. Environment variables (`MODELPROV_LEDGER__ENDPOINT`, ...)
/// 3. Workspace config (`.modelprov/config.toml`)
/// 4. User config
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&ProvenanceConfig>,
) -> Result<ProvenanceConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(ProvenanceConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}
