//! Deployment configuration for the vault, the tier table and the registry.
//!
//! Layers (highest precedence last):
//!   1) Built-in defaults
//!   2) Config file (explicit path; toml/yaml/json by extension)
//!   3) Environment variables: `LAUNCHPAD__VAULT__PERFORMANCE_FEE_BPS=150`

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use config as cfg;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    registry::RegistrySettings,
    telemetry::LoggingConfig,
    tier::{TierTable, TierWeights},
    vault::VaultSettings,
    Address, AssetId, Balance, LaunchpadError,
};

pub const ENV_PREFIX: &str = "LAUNCHPAD";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchpadConfig {
    pub vault: VaultSection,
    pub tiers: TiersSection,
    pub registry: RegistrySection,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSection {
    pub address: Address,
    pub staking_asset: AssetId,
    pub treasury: Address,
    pub performance_fee_bps: u16,
    pub call_fee_bps: u16,
    #[serde(with = "humantime_serde")]
    pub max_lock: Duration,
    pub event_capacity: usize,
}

/// Tier thresholds in staking-token base units, Basic to Divine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TiersSection {
    pub thresholds: Vec<u64>,
    /// Weights (bps of supply) for snapshots taken without explicit weights.
    /// Unset means every snapshot must pass its own.
    pub default_weights: Option<Vec<u16>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    pub address: Address,
    pub event_capacity: usize,
}

impl Default for VaultSection {
    fn default() -> Self {
        Self {
            address: Address::ZERO,
            staking_asset: AssetId(1),
            treasury: Address::ZERO,
            performance_fee_bps: 200,
            call_fee_bps: 25,
            max_lock: Duration::from_secs(365 * 86_400),
            event_capacity: 1024,
        }
    }
}

impl Default for TiersSection {
    fn default() -> Self {
        Self {
            thresholds: vec![15, 25, 35, 45, 55],
            default_weights: None,
        }
    }
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self { address: Address::ZERO, event_capacity: 1024 }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Build(#[from] cfg::ConfigError),
    #[error("path not found `{0}`")]
    PathNotFound(String),
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, e: LaunchpadError) -> Self {
        let reason = match e {
            LaunchpadError::InvalidConfig(s) => s,
            other => other.to_string(),
        };
        ConfigError::Invalid { field, reason }
    }
}

impl LaunchpadConfig {
    pub fn vault_settings(&self) -> VaultSettings {
        VaultSettings {
            address: self.vault.address,
            staking_asset: self.vault.staking_asset,
            treasury: self.vault.treasury,
            performance_fee_bps: self.vault.performance_fee_bps,
            call_fee_bps: self.vault.call_fee_bps,
            max_lock_secs: self.vault.max_lock.as_secs(),
        }
    }

    pub fn registry_settings(&self) -> Result<RegistrySettings, ConfigError> {
        Ok(RegistrySettings {
            address: self.registry.address,
            event_capacity: self.registry.event_capacity,
            default_weights: self.default_weights()?,
        })
    }

    pub fn tier_table(&self) -> Result<TierTable, ConfigError> {
        let t: [u64; 5] = five("tiers.thresholds", &self.tiers.thresholds)?;
        TierTable::new(t.map(Balance::from))
            .map_err(|e| ConfigError::invalid("tiers.thresholds", e))
    }

    pub fn default_weights(&self) -> Result<Option<TierWeights>, ConfigError> {
        let Some(raw) = &self.tiers.default_weights else {
            return Ok(None);
        };
        let w = TierWeights(five("tiers.default_weights", raw)?);
        w.validate().map_err(|e| ConfigError::invalid("tiers.default_weights", e))?;
        Ok(Some(w))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.vault_settings().validate().map_err(|e| ConfigError::invalid("vault", e))?;
        if self.vault.treasury.is_zero() {
            return Err(ConfigError::Invalid {
                field: "vault.treasury",
                reason: "must be set".into(),
            });
        }
        if self.registry.address.is_zero() {
            return Err(ConfigError::Invalid {
                field: "registry.address",
                reason: "must be set".into(),
            });
        }
        if self.registry.address == self.vault.address {
            return Err(ConfigError::Invalid {
                field: "registry.address",
                reason: "must differ from vault.address".into(),
            });
        }
        if self.vault.event_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "vault.event_capacity",
                reason: "must be > 0".into(),
            });
        }
        if self.registry.event_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "registry.event_capacity",
                reason: "must be > 0".into(),
            });
        }
        self.tier_table()?;
        self.registry_settings()?;
        Ok(())
    }
}

fn five<T: Copy>(field: &'static str, values: &[T]) -> Result<[T; 5], ConfigError> {
    values.try_into().map_err(|_| ConfigError::Invalid {
        field,
        reason: format!("expected 5 values, got {}", values.len()),
    })
}

fn builder_with_defaults() -> Result<cfg::ConfigBuilder<cfg::builder::DefaultState>, ConfigError> {
    let d = LaunchpadConfig::default();
    let ints = |v: &[u64]| v.iter().map(|x| *x as i64).collect::<Vec<i64>>();
    Ok(cfg::Config::builder()
        .set_default("vault.address", d.vault.address.to_string())?
        .set_default("vault.staking_asset", i64::from(d.vault.staking_asset.0))?
        .set_default("vault.treasury", d.vault.treasury.to_string())?
        .set_default("vault.performance_fee_bps", i64::from(d.vault.performance_fee_bps))?
        .set_default("vault.call_fee_bps", i64::from(d.vault.call_fee_bps))?
        .set_default("vault.max_lock", "365days")?
        .set_default("vault.event_capacity", d.vault.event_capacity as i64)?
        .set_default("tiers.thresholds", ints(&d.tiers.thresholds))?
        .set_default("registry.address", d.registry.address.to_string())?
        .set_default("registry.event_capacity", d.registry.event_capacity as i64)?
        .set_default("logging.json", d.logging.json)?
        .set_default("logging.with_targets_and_lines", d.logging.with_targets_and_lines)?
        .set_default("logging.with_threads", d.logging.with_threads)?
        .set_default("logging.ansi", d.logging.ansi)?)
}

fn finish(
    builder: cfg::ConfigBuilder<cfg::builder::DefaultState>,
    env_prefix: &str,
) -> Result<LaunchpadConfig, ConfigError> {
    let built = builder
        .add_source(
            cfg::Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("tiers.thresholds")
                .with_list_parse_key("tiers.default_weights")
                .try_parsing(true),
        )
        .build()?;
    let cfg: LaunchpadConfig = built.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load configuration: defaults -> file -> `LAUNCHPAD__*` environment.
pub fn load(path: Option<&Path>) -> Result<LaunchpadConfig, ConfigError> {
    let mut builder = builder_with_defaults()?;
    if let Some(p) = discover_config_file(path)? {
        builder = builder.add_source(cfg::File::from(p));
    }
    finish(builder, ENV_PREFIX)
}

/// Explicit path if given (must exist), else the first `launchpad.{toml,yaml,yml,json}`
/// in the working directory.
fn discover_config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(p) = explicit {
        if !p.exists() {
            return Err(ConfigError::PathNotFound(p.display().to_string()));
        }
        return Ok(Some(p.to_path_buf()));
    }
    Ok(["launchpad.toml", "launchpad.yaml", "launchpad.yml", "launchpad.json"]
        .into_iter()
        .map(PathBuf::from)
        .find(|c| c.exists()))
}

/// Same layering with an inline document instead of a file.
pub fn load_from_str(doc: &str, format: cfg::FileFormat) -> Result<LaunchpadConfig, ConfigError> {
    load_from_str_with_prefix(doc, format, ENV_PREFIX)
}

fn load_from_str_with_prefix(
    doc: &str,
    format: cfg::FileFormat,
    env_prefix: &str,
) -> Result<LaunchpadConfig, ConfigError> {
    let builder = builder_with_defaults()?.add_source(cfg::File::from_str(doc, format));
    finish(builder, env_prefix)
}
