//! Layered configuration for lectern.
//!
//! Values are merged in this order, later layers winning:
//! 1. compiled defaults ([`Config::default`]),
//! 2. an optional configuration file (TOML, YAML or JSON, picked by
//!    extension),
//! 3. environment variables prefixed with `LECTERN_`, nested keys separated
//!    by a double underscore (`LECTERN_READER__IDLE_TIMEOUT_SECS=60`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "LECTERN_";
const DATABASE_FILENAME: &str = "library.sqlite3";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Location of the SQLite catalog (library items and annotations).
    pub database: PathBuf,
    pub scan: ScanConfig,
    pub reader: ReaderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Number of files hashed and decoded in parallel during a scan.
    pub concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Sessions untouched for longer than this are closed.
    pub idle_timeout_secs: u64,
    /// How often the background sweep looks for idle sessions.
    pub sweep_interval_secs: u64,
    /// Upper bound on the pixel bytes held by the render cache.
    pub render_budget_bytes: usize,
    pub render_timeout_ms: u64,
    /// Applies to opening documents and building search indexes.
    pub decode_timeout_ms: u64,
    pub default_scale: f32,
    /// Search indexes kept in memory before the least recently used is dropped.
    pub max_indexes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            scan: ScanConfig::default(),
            reader: ReaderConfig::default(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 15 * 60,
            sweep_interval_secs: 30,
            render_budget_bytes: 256 * 1024 * 1024,
            render_timeout_ms: 30_000,
            decode_timeout_ms: 30_000,
            default_scale: 1.0,
            max_indexes: 32,
        }
    }
}

impl ReaderConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }
}

fn default_database_path() -> PathBuf {
    ProjectDirs::from("", "", "lectern")
        .map(|dirs| dirs.data_dir().join(DATABASE_FILENAME))
        .unwrap_or_else(|| PathBuf::from(DATABASE_FILENAME))
}

impl Config {
    /// Load defaults, then `file` (if any), then the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config = Self::from_figment(Self::figment(file)?)?;
        tracing::debug!(database = %config.database.display(), "Configuration loaded");
        Ok(config)
    }

    /// The layered figment before extraction. Exposed so callers can add
    /// their own providers on top.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = file {
            if !path.is_file() {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
            }
            let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
            figment = match extension.as_deref() {
                Some("toml") => figment.merge(Toml::file(path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate a configuration from any figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().map_err(|e| ErrorKind::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let checks: [(bool, &'static str, &'static str); 7] = [
            (self.scan.concurrency == 0, "scan.concurrency", "must be at least 1"),
            (self.reader.idle_timeout_secs == 0, "reader.idle_timeout_secs", "must be positive"),
            (self.reader.sweep_interval_secs == 0, "reader.sweep_interval_secs", "must be positive"),
            (self.reader.render_timeout_ms == 0, "reader.render_timeout_ms", "must be positive"),
            (self.reader.decode_timeout_ms == 0, "reader.decode_timeout_ms", "must be positive"),
            (
                !(self.reader.default_scale.is_finite() && self.reader.default_scale > 0.0),
                "reader.default_scale",
                "must be a positive number",
            ),
            (self.reader.max_indexes == 0, "reader.max_indexes", "must be at least 1"),
        ];
        if let Some((_, key, reason)) = checks.into_iter().find(|(failed, _, _)| *failed) {
            exn::bail!(ErrorKind::Invalid { key, reason });
        }
        Ok(())
    }
}
