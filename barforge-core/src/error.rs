//! Structured engine errors.
//!
//! Every failure the engine can classify carries one of six stable codes
//! (see [`EngineError::code`]); everything else is wrapped transparently.
//! These are designed to be displayable in both CLI and report contexts.

use chrono::NaiveDateTime;
use polars::prelude::PolarsError;
use std::fmt::Display;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load {path}: {reason}")]
    LoadFailure { path: String, reason: String },

    #[error("unsupported format: {path}")]
    FormatUnsupported { path: String },

    #[error("index not monotonic at row {row}: {current} does not follow {previous}")]
    IndexNotMonotonic {
        row: usize,
        previous: NaiveDateTime,
        current: NaiveDateTime,
    },

    #[error("cannot resample {base} bars to {target}")]
    ResampleImpossible { base: String, target: String },

    #[error("corrupt sidecar {path}: {reason}")]
    CorruptSidecar { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("invalid bar table: {0}")]
    InvalidTable(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl EngineError {
    /// Stable error code surfaced to callers and reports.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::LoadFailure { .. } => "LoadFailure",
            EngineError::FormatUnsupported { .. } => "FormatUnsupported",
            EngineError::IndexNotMonotonic { .. } => "IndexNotMonotonic",
            EngineError::ResampleImpossible { .. } => "ResampleImpossible",
            EngineError::CorruptSidecar { .. } => "CorruptSidecar",
            EngineError::ConfigInvalid(_) => "ConfigInvalid",
            EngineError::InvalidTable(_) => "InvalidTable",
            EngineError::Cancelled => "Cancelled",
            EngineError::Io(_) => "Io",
            EngineError::Polars(_) => "Polars",
            EngineError::Json(_) => "Json",
            EngineError::Csv(_) => "Csv",
        }
    }

    pub(crate) fn load(path: &Path, reason: impl Display) -> Self {
        EngineError::LoadFailure {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn corrupt_sidecar(path: &Path, reason: impl Display) -> Self {
        EngineError::CorruptSidecar {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
