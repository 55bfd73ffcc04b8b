//! Pipeline Configuration
//!
//! One JSON document (camelCase, every field optional) plus a handful of
//! `LABELFORGE_*` environment overrides.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::engines::EngineKind;
use crate::print::{PrinterProfile, MAX_PRINTER_DPI, MIN_PRINTER_DPI};
use crate::units::DEFAULT_DPI;

pub const ENV_DEFAULT_DPI: &str = "LABELFORGE_DEFAULT_DPI";
pub const ENV_MAX_BATCH_SIZE: &str = "LABELFORGE_MAX_BATCH_SIZE";
pub const ENV_MAX_CONCURRENT_GROUPS: &str = "LABELFORGE_MAX_CONCURRENT_GROUPS";
pub const ENV_SYSTEM_PROFILE: &str = "LABELFORGE_SYSTEM_PROFILE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ZplSettings {
    /// `^PR` print speed in inches per second.
    pub print_speed: u32,
}

impl Default for ZplSettings {
    fn default() -> Self {
        Self { print_speed: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TsplSettings {
    /// 0-15, higher is darker.
    pub density: u32,
    /// 1-14, lower is slower and sharper.
    pub speed: u32,
    pub gap_mm: f64,
}

impl Default for TsplSettings {
    fn default() -> Self {
        Self {
            density: 8,
            speed: 4,
            gap_mm: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BrotherMedia {
    #[default]
    Continuous,
    DieCut,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BrotherQlSettings {
    pub dpi: u32,
    pub media: BrotherMedia,
    pub cut_at_end: bool,
}

impl Default for BrotherQlSettings {
    fn default() -> Self {
        Self {
            dpi: 300,
            media: BrotherMedia::Continuous,
            cut_at_end: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PdfSettings {
    pub preview_dpi: u32,
}

impl Default for PdfSettings {
    fn default() -> Self {
        Self { preview_dpi: 150 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub default_dpi: u32,
    pub system_default_profile_id: Option<String>,
    pub default_engine: EngineKind,
    pub max_batch_size: usize,
    pub max_concurrent_groups: usize,
    pub run_preflight: bool,
    pub block_on_preflight_failure: bool,
    pub printer_profiles: Vec<PrinterProfile>,
    pub zpl: ZplSettings,
    pub tspl: TsplSettings,
    pub brother_ql: BrotherQlSettings,
    pub pdf: PdfSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_dpi: DEFAULT_DPI,
            system_default_profile_id: None,
            default_engine: EngineKind::Pdf,
            max_batch_size: 50,
            max_concurrent_groups: 4,
            run_preflight: true,
            block_on_preflight_failure: false,
            printer_profiles: vec![],
            zpl: ZplSettings::default(),
            tspl: TsplSettings::default(),
            brother_ql: BrotherQlSettings::default(),
            pdf: PdfSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&content)?;
        config.apply_env()?;
        config.validate()?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Unset keys leave values untouched.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_DEFAULT_DPI) {
            self.default_dpi = parse_env(ENV_DEFAULT_DPI, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_BATCH_SIZE) {
            self.max_batch_size = parse_env(ENV_MAX_BATCH_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_CONCURRENT_GROUPS) {
            self.max_concurrent_groups = parse_env(ENV_MAX_CONCURRENT_GROUPS, &value)?;
        }
        if let Some(value) = lookup(ENV_SYSTEM_PROFILE) {
            let value = value.trim().to_string();
            self.system_default_profile_id = (!value.is_empty()).then_some(value);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_PRINTER_DPI..=MAX_PRINTER_DPI).contains(&self.default_dpi) {
            return Err(ConfigError::Invalid(format!(
                "defaultDpi {} must be between {} and {}",
                self.default_dpi, MIN_PRINTER_DPI, MAX_PRINTER_DPI
            )));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("maxBatchSize must be at least 1".into()));
        }
        if self.max_concurrent_groups == 0 {
            return Err(ConfigError::Invalid(
                "maxConcurrentGroups must be at least 1".into(),
            ));
        }
        for printer in &self.printer_profiles {
            if !(MIN_PRINTER_DPI..=MAX_PRINTER_DPI).contains(&printer.dpi) {
                return Err(ConfigError::Invalid(format!(
                    "printer {} has DPI {} outside {}-{}",
                    printer.id, printer.dpi, MIN_PRINTER_DPI, MAX_PRINTER_DPI
                )));
            }
        }
        if self.brother_ql.dpi == 0 || self.pdf.preview_dpi == 0 {
            return Err(ConfigError::Invalid("engine DPI must be positive".into()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key,
        value: value.to_string(),
    })
}
