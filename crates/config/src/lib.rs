//! Layered configuration for trawl.
//!
//! Values are merged, last wins, from:
//!
//! 1. built-in defaults ([`Config::default`]),
//! 2. an optional file (`.toml`, `.yaml`/`.yml` or `.json`, by extension),
//! 3. environment variables prefixed `TRAWL_`, with `__` separating nested
//!    keys (`TRAWL_BUDGET__MAX_BYTES=1048576`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{ResultExt, bail};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use trawl_process::{Budget, DEFAULT_OUTPUT_CAP, DEFAULT_POLL_INTERVAL, Supervisor};

const ENV_PREFIX: &str = "TRAWL_";
const MIB: u64 = 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding one mirror per repository identity.
    pub mirror_root: PathBuf,
    pub budget: BudgetConfig,
    pub supervisor: SupervisorConfig,
    pub tools: ToolsConfig,
    pub archive: ArchiveConfig,
    pub metadata: MetadataConfig,
}

/// Ceilings applied to every supervised retrieval command.
///
/// Negative or absent values are unlimited.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_bytes: Option<i64>,
    pub max_seconds: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub poll_interval_ms: u64,
    /// Bytes of combined output kept for diagnostics; `0` keeps everything.
    pub output_cap: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Timeout for version probes and other short auxiliary commands.
    pub probe_timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Number of leading bytes of a download hashed into its fingerprint.
    pub fingerprint_prefix: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Files at or above this size are never exposed to the generator.
    pub size_threshold: u64,
    /// Largest generated descriptor that will be read back.
    pub artifact_cap: u64,
    /// Program and arguments that derive a descriptor from source.
    pub generator: Option<Vec<String>>,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mirror_root: default_mirror_root(),
            budget: BudgetConfig::default(),
            supervisor: SupervisorConfig::default(),
            tools: ToolsConfig::default(),
            archive: ArchiveConfig::default(),
            metadata: MetadataConfig::default(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: u64::try_from(DEFAULT_POLL_INTERVAL.as_millis()).unwrap_or(1000),
            output_cap: DEFAULT_OUTPUT_CAP,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { probe_timeout_secs: 30 }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self { fingerprint_prefix: MIB }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self { size_threshold: MIB, artifact_cap: MIB, generator: None, timeout_secs: 300 }
    }
}

fn default_mirror_root() -> PathBuf {
    ProjectDirs::from("", "", "trawl")
        .map(|dirs| dirs.cache_dir().join("mirrors"))
        .unwrap_or_else(|| std::env::temp_dir().join("trawl").join("mirrors"))
}

impl Config {
    /// Build the layered figment without extracting it.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            if !file.is_file() {
                bail!(ErrorKind::NotFound(file.to_path_buf()));
            }
            let extension = file.extension().and_then(|e| e.to_str()).unwrap_or_default().to_lowercase();
            figment = match extension.as_str() {
                "toml" => figment.merge(Toml::file(file)),
                "yaml" | "yml" => figment.merge(Yaml::file(file)),
                "json" => figment.merge(Json::file(file)),
                _ => bail!(ErrorKind::UnsupportedFormat(file.display().to_string())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load and validate the configuration.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: Config = Self::figment(file)?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(mirror_root = %config.mirror_root.display(), "loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.supervisor.poll_interval_ms == 0 {
            bail!(ErrorKind::Invalid("supervisor.poll_interval_ms must be positive".to_string()));
        }
        if self.archive.fingerprint_prefix == 0 {
            bail!(ErrorKind::Invalid("archive.fingerprint_prefix must be positive".to_string()));
        }
        if let Some(generator) = &self.metadata.generator
            && generator.is_empty()
        {
            bail!(ErrorKind::Invalid("metadata.generator must name a program".to_string()));
        }
        Ok(())
    }

    /// Budget for supervised retrieval commands.
    #[must_use]
    pub fn budget(&self) -> Budget {
        Budget::from_limits(self.budget.max_bytes, self.budget.max_seconds)
    }

    #[must_use]
    pub fn supervisor(&self) -> Supervisor {
        let cap = (self.supervisor.output_cap > 0).then_some(self.supervisor.output_cap);
        Supervisor::new()
            .with_poll_interval(Duration::from_millis(self.supervisor.poll_interval_ms))
            .with_output_cap(cap)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.tools.probe_timeout_secs)
    }
}
