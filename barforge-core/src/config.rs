//! Pipeline configuration record.
//!
//! The only input the engine accepts. Loadable from TOML; labels parse
//! through `FromStr`, so an unknown timeframe, window, role or compression
//! fails at deserialization with `ConfigInvalid`.

use crate::codec::CompressionPolicy;
use crate::domain::{Role, Timeframe, WindowName};
use crate::error::{EngineError, Result};
use crate::optimize::TypeMode;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeframeMode {
    #[default]
    Single,
    Multi,
}

/// Pipeline stage, used for output subdirectories and default role sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    One,
    Two,
}

impl Stage {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Stage::One => "stage1",
            Stage::Two => "stage2",
        }
    }

    pub fn default_roles(&self) -> &'static [Role] {
        match self {
            Stage::One => &Role::STAGE1_DEFAULT,
            Stage::Two => &Role::STAGE2_DEFAULT,
        }
    }
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("output")
}

fn default_gapless() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub source_path: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_override: Option<String>,

    #[serde(default)]
    pub window_name: WindowName,

    /// Explicit bounds override the window lookback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDateTime>,

    #[serde(default)]
    pub timeframe_mode: TimeframeMode,

    #[serde(default)]
    pub timeframes: Vec<Timeframe>,

    /// Empty means the stage defaults.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub role_set: Vec<Role>,

    #[serde(default)]
    pub compression_policy: CompressionPolicy,

    #[serde(default)]
    pub type_mode: TypeMode,

    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,

    /// Chain each resampled open to the previous close.
    #[serde(default = "default_gapless")]
    pub gapless: bool,
}

impl PipelineConfig {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            asset_override: None,
            window_name: WindowName::default(),
            start: None,
            end: None,
            timeframe_mode: TimeframeMode::default(),
            timeframes: Vec::new(),
            role_set: Vec::new(),
            compression_policy: CompressionPolicy::default(),
            type_mode: TypeMode::default(),
            output_directory: default_output_directory(),
            gapless: default_gapless(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| EngineError::ConfigInvalid(e.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::ConfigInvalid(e.to_string()))
    }

    /// Check the record. `start > end` is rejected before anything touches
    /// the filesystem; the source path is checked last.
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(EngineError::ConfigInvalid(format!(
                    "start {start} is after end {end}"
                )));
            }
        }

        match self.timeframe_mode {
            TimeframeMode::Multi if self.timeframes.is_empty() => {
                return Err(EngineError::ConfigInvalid(
                    "multi timeframe mode needs at least one timeframe".into(),
                ));
            }
            TimeframeMode::Single if self.timeframes.len() > 1 => {
                return Err(EngineError::ConfigInvalid(format!(
                    "single timeframe mode takes one timeframe, got {}",
                    self.timeframes.len()
                )));
            }
            _ => {}
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.timeframes.iter().find(|tf| !seen.insert(**tf)) {
            return Err(EngineError::ConfigInvalid(format!("duplicate timeframe '{dup}'")));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.role_set.iter().find(|r| !seen.insert(**r)) {
            return Err(EngineError::ConfigInvalid(format!("duplicate role '{dup}'")));
        }

        if let Some(asset) = &self.asset_override {
            if asset.trim().is_empty() {
                return Err(EngineError::ConfigInvalid("asset override is empty".into()));
            }
        }

        if !self.source_path.is_file() {
            return Err(EngineError::ConfigInvalid(format!(
                "source file {} does not exist",
                self.source_path.display()
            )));
        }
        Ok(())
    }

    /// Asset identifier: the override, else the first underscore token of
    /// the source file stem. Underscores are replaced so stems stay parseable.
    pub fn asset(&self) -> String {
        let raw = match &self.asset_override {
            Some(asset) => asset.trim().to_string(),
            None => self
                .source_path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.split('_').next())
                .unwrap_or_default()
                .to_string(),
        };
        if raw.is_empty() {
            "unknown".to_string()
        } else {
            raw.replace('_', "-")
        }
    }

    /// Requested roles, or the stage defaults when none were given.
    pub fn roles_for(&self, stage: Stage) -> Vec<Role> {
        if self.role_set.is_empty() {
            stage.default_roles().to_vec()
        } else {
            self.role_set.clone()
        }
    }

    pub fn stage_dir(&self, stage: Stage) -> PathBuf {
        self.output_directory.join(stage.dir_name())
    }

    pub fn source_file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
