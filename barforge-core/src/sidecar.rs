//! Sidecar metadata contract (schema v1).
//!
//! One `<primary-stem>_metadata.json` per artifact family, written after all
//! data files and never overwritten.

use crate::codec::{tmp_path, Compression};
use crate::domain::{BarView, Role};
use crate::error::{EngineError, Result};
use crate::frequency::Confidence;
use crate::optimize::TypeMode;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const SIDECAR_VERSION: u32 = 1;
pub const SIDECAR_SUFFIX: &str = "_metadata.json";

/// Engine version stamped into every sidecar.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A single timeframe label for Stage-2 artifacts, or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeframeField {
    One(String),
    Many(Vec<String>),
}

impl TimeframeField {
    pub fn labels(&self) -> Vec<String> {
        match self {
            TimeframeField::One(label) => vec![label.clone()],
            TimeframeField::Many(labels) => labels.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    pub version: u32,
    pub asset: String,
    pub window: String,
    /// `null` for Stage-1 artifacts.
    #[serde(default)]
    pub timeframe: Option<TimeframeField>,
    pub created_at: DateTime<Utc>,
    pub source_file: String,
    /// `null` for empty tables.
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub rows: usize,
    pub columns: Vec<String>,
    /// Role → file name relative to the sidecar's directory.
    pub file_roles: BTreeMap<Role, String>,
    pub type_mode: TypeMode,
    pub inferred_frequency: String,
    /// Confidence of the source-frequency estimate, for every stage.
    pub frequency_confidence: Confidence,
    /// Frequency the source was inferred at, set on Stage-2 artifacts where
    /// `inferred_frequency` is the target timeframe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_frequency: Option<String>,
    #[serde(default)]
    pub notes: BTreeMap<String, Value>,
    pub engine_version: String,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub data_hash: String,
}

impl Sidecar {
    /// `<dir>/<primary-stem>_metadata.json`
    pub fn path_for(dir: &Path, primary_stem: &str) -> PathBuf {
        dir.join(format!("{primary_stem}{SIDECAR_SUFFIX}"))
    }

    /// Stem encoded in a sidecar file name, if the name is a sidecar name.
    pub fn stem_of(path: &Path) -> Option<&str> {
        path.file_name()?.to_str()?.strip_suffix(SIDECAR_SUFFIX)
    }

    /// Paths listed in `file_roles`, resolved against `dir`.
    pub fn role_paths(&self, dir: &Path) -> BTreeMap<Role, PathBuf> {
        self.file_roles
            .iter()
            .map(|(role, name)| (*role, dir.join(name)))
            .collect()
    }

    pub fn timeframe_labels(&self) -> Vec<String> {
        self.timeframe
            .as_ref()
            .map(TimeframeField::labels)
            .unwrap_or_default()
    }

    /// Write to `path` via a temp file and rename. Refuses to overwrite.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        if path.exists() {
            return Err(EngineError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("sidecar {} already exists", path.display()),
            )));
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = tmp_path(path);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            EngineError::Io(e)
        })
    }

    /// Read and parse a sidecar. A file that exists but does not parse is
    /// `CorruptSidecar`.
    pub fn read(path: &Path) -> Result<Sidecar> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::InvalidData {
                EngineError::corrupt_sidecar(path, e)
            } else {
                EngineError::Io(e)
            }
        })?;
        let sidecar: Sidecar =
            serde_json::from_str(&content).map_err(|e| EngineError::corrupt_sidecar(path, e))?;
        if sidecar.version != SIDECAR_VERSION {
            return Err(EngineError::corrupt_sidecar(
                path,
                format!("unsupported schema version {}", sidecar.version),
            ));
        }
        Ok(sidecar)
    }
}

/// blake3 hash over the table contents, for change detection.
pub fn content_hash(view: BarView<'_>) -> String {
    let mut hasher = blake3::Hasher::new();
    for ts in view.index() {
        hasher.update(&ts.and_utc().timestamp_micros().to_le_bytes());
    }
    for column in [view.open(), view.high(), view.low(), view.close()] {
        for v in column {
            hasher.update(&v.to_le_bytes());
        }
    }
    if let Some(volume) = view.volume() {
        for v in volume {
            hasher.update(&v.to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}
