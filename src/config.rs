// ⚙️ Connector configuration
//
// Loaded once at startup from a JSON file (path in `CONNECTOR_CONFIG`),
// otherwise defaults: one local backend, the standard binding models and
// the usual tax tolerances.

use crate::entities::{Backend, BindingModel, TaxUsage};
use crate::error::{ConnectorError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIG_ENV_VAR: &str = "CONNECTOR_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxConfig {
    /// First-tier window around the requested rate
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Second-tier window, tried only when the first finds nothing
    #[serde(default = "default_fallback_tolerance")]
    pub fallback_tolerance: f64,

    #[serde(default = "default_usages")]
    pub usages: Vec<TaxUsage>,
}

fn default_tolerance() -> f64 {
    0.001
}

fn default_fallback_tolerance() -> f64 {
    0.01
}

fn default_usages() -> Vec<TaxUsage> {
    vec![TaxUsage::Sale]
}

impl Default for TaxConfig {
    fn default() -> Self {
        TaxConfig {
            tolerance: default_tolerance(),
            fallback_tolerance: default_fallback_tolerance(),
            usages: default_usages(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default)]
    pub backend: Backend,

    #[serde(default = "BindingModel::standard")]
    pub binding_models: Vec<BindingModel>,

    #[serde(default)]
    pub taxes: TaxConfig,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("connector.db")
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        ConnectorConfig {
            backend: Backend::default(),
            binding_models: BindingModel::standard(),
            taxes: TaxConfig::default(),
            database_path: default_database_path(),
        }
    }
}

impl ConnectorConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let config: ConnectorConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// Config from `CONNECTOR_CONFIG` if set, defaults otherwise. Validated.
    pub fn load() -> anyhow::Result<Self> {
        let config = match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject a config that would fail later at call time
    pub fn validate(&self) -> Result<()> {
        if self.backend.id <= 0 {
            return Err(ConnectorError::Configuration(format!(
                "backend id must be positive, got {}",
                self.backend.id
            )));
        }

        let taxes = &self.taxes;
        if !(taxes.tolerance > 0.0 && taxes.fallback_tolerance >= taxes.tolerance) {
            return Err(ConnectorError::Configuration(format!(
                "tax tolerances must satisfy 0 < tolerance <= fallback_tolerance, got {} / {}",
                taxes.tolerance, taxes.fallback_tolerance
            )));
        }

        // Every wrapping binder must be able to unwrap its model
        for model in self.binding_models.iter().filter(|m| m.wraps()) {
            model.internal_model()?;
        }

        info!(
            backend = %self.backend.name,
            models = self.binding_models.len(),
            "connector configuration validated"
        );
        Ok(())
    }

    pub fn binding_model(&self, name: &str) -> Result<&BindingModel> {
        self.binding_models
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| ConnectorError::Configuration(format!("unknown binding model {}", name)))
    }
}
