use crate::mutator::MutationMode;
use crate::oracle::{DecodeLimits, OracleStrength};
use crate::seed::SeedConstraints;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Boundary errors. Any of these stops the process before a campaign touches the
/// working directory.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Unsupported file type '{0}'. Use 'bmp' or 'png'.")]
    UnknownFormat(String),
    #[error("Unsupported mutation type '{0}'. Use 'byte' or 'bit'.")]
    UnknownMode(String),
    #[error("Unsupported oracle '{0}'. Use 'open' or 'verify'.")]
    UnknownOracle(String),
    #[error("Cannot determine the image format of {0:?}: it has no file extension")]
    MissingExtension(PathBuf),
    #[error(
        "Invalid {what} range {min}..={max}: bounds must satisfy 1 <= min <= max <= {}",
        crate::seed::MAX_SEED_DIMENSION
    )]
    InvalidRange {
        what: &'static str,
        min: u32,
        max: u32,
    },
    #[error("At least one seed file is required")]
    NoSeeds,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    #[serde(default)]
    pub mode: MutationMode,
    /// Oracle strength. When absent it follows `mode`, see
    /// [`FuzzerSettings::oracle_for`].
    #[serde(default)]
    pub oracle: Option<OracleStrength>,
    /// Fixed generator seed. A fresh seed is drawn per run when absent.
    #[serde(default)]
    pub rng_seed: Option<u64>,
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
}

pub fn default_iterations() -> u64 {
    100
}

pub fn default_working_dir() -> PathBuf {
    PathBuf::from("populations")
}

impl FuzzerSettings {
    /// The configured oracle strength, or the one [`OracleStrength::for_mode`]
    /// derives from `mode` when none is configured.
    pub fn oracle_for(&self, mode: MutationMode) -> OracleStrength {
        self.oracle.unwrap_or_else(|| OracleStrength::for_mode(mode))
    }
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            mode: MutationMode::default(),
            oracle: None,
            rng_seed: None,
            working_dir: default_working_dir(),
        }
    }
}

/// Dimension ranges for generated seeds. Missing fields fall back to the
/// per-format defaults of [`SeedConstraints::for_format`].
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SeedSettings {
    pub min_width: Option<u32>,
    pub max_width: Option<u32>,
    pub min_height: Option<u32>,
    pub max_height: Option<u32>,
}

impl SeedSettings {
    /// Overlays these settings on `defaults` and validates the result.
    pub fn apply_to(&self, defaults: SeedConstraints) -> Result<SeedConstraints, ConfigError> {
        let width = self.min_width.unwrap_or(*defaults.width.start())
            ..=self.max_width.unwrap_or(*defaults.width.end());
        let height = self.min_height.unwrap_or(*defaults.height.start())
            ..=self.max_height.unwrap_or(*defaults.height.end());
        let constraints = SeedConstraints { width, height };
        constraints.validate()?;
        Ok(constraints)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct PixdriftConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub limits: DecodeLimits,
    #[serde(default)]
    pub seeds: SeedSettings,
}

impl PixdriftConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
