use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::ledger::LedgerSettings;
use crate::portfolio::SnapshotSettings;

/// Largest scale a `rust_decimal::Decimal` can carry.
const MAX_QUANTITY_SCALE: u32 = 28;

/// Output formatting. Purely presentational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Digits after the decimal point in minor-unit amounts (2 for cents).
    pub currency_decimals: u32,

    /// Also emit a `display` block of amounts with thousands separators.
    pub currency_grouping: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            currency_decimals: 2,
            currency_grouping: false,
        }
    }
}

/// Contents of `kuberan.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to data directory. If relative, resolved from config file location.
    /// If not specified, defaults to the config file's directory.
    pub data_dir: Option<PathBuf>,

    pub ledger: LedgerSettings,

    pub snapshots: SnapshotSettings,

    pub display: DisplayConfig,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;

        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger.quantity_scale > MAX_QUANTITY_SCALE {
            anyhow::bail!(
                "ledger.quantity_scale must be at most {MAX_QUANTITY_SCALE}, got {}",
                self.ledger.quantity_scale
            );
        }
        if self.snapshots.concurrency == 0 {
            anyhow::bail!("snapshots.concurrency must be at least 1");
        }
        if self.snapshots.deadline.is_zero() {
            anyhow::bail!("snapshots.deadline must be greater than zero");
        }
        Ok(())
    }

    /// Resolve the data directory path.
    ///
    /// If `data_dir` is set and relative, it's resolved relative to `config_dir`.
    /// If `data_dir` is not set, returns `config_dir`.
    pub fn resolve_data_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.data_dir {
            Some(data_dir) if data_dir.is_absolute() => data_dir.clone(),
            Some(data_dir) => config_dir.join(data_dir),
            None => config_dir.to_path_buf(),
        }
    }
}

/// Loaded configuration with resolved paths.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub data_dir: PathBuf,
    pub ledger: LedgerSettings,
    pub snapshots: SnapshotSettings,
    pub display: DisplayConfig,
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./kuberan.toml` if it exists in current directory
/// 2. `~/.local/share/kuberan/kuberan.toml` (XDG data directory)
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("kuberan.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("kuberan").join("kuberan.toml");
    }

    local_config
}

impl ResolvedConfig {
    fn from_config(config: Config, data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ledger: config.ledger,
            snapshots: config.snapshots,
            display: config.display,
        }
    }

    /// Load and resolve config from a file path.
    ///
    /// The data directory is resolved relative to the config file's parent directory.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;

        let config_dir = config_path
            .parent()
            .context("Config file has no parent directory")?;

        let config = Config::load(&config_path)?;
        let data_dir = config.resolve_data_dir(config_dir);
        Ok(Self::from_config(config, data_dir))
    }

    /// Load config, falling back to defaults if the file doesn't exist. The
    /// intended parent directory of the config file becomes the data directory.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            return Self::load(config_path);
        }

        let config_path = if config_path.is_relative() {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(config_path)
        } else {
            config_path.to_path_buf()
        };
        let config_dir = config_path
            .parent()
            .context("Config path has no parent directory")?;

        Ok(Self::from_config(Config::default(), config_dir.to_path_buf()))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            ledger: self.ledger,
            snapshots: self.snapshots,
        }
    }
}
