//! Artifact roles and their canonical on-disk formats.

use crate::codec::FormatDescriptor;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Purpose-specific variant of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Self-describing object file consumed by the backtester.
    Vbt,
    Parquet,
    /// Keyed container with compressed blocks.
    Compressed,
    /// Keyed container with uncompressed blocks.
    Standard,
    /// Tabular text.
    Raw,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Vbt,
        Role::Parquet,
        Role::Compressed,
        Role::Standard,
        Role::Raw,
    ];

    pub const STAGE1_DEFAULT: [Role; 3] = [Role::Vbt, Role::Parquet, Role::Standard];
    pub const STAGE2_DEFAULT: [Role; 3] = [Role::Vbt, Role::Parquet, Role::Compressed];

    pub fn label(&self) -> &'static str {
        match self {
            Role::Vbt => "vbt",
            Role::Parquet => "parquet",
            Role::Compressed => "compressed",
            Role::Standard => "standard",
            Role::Raw => "raw",
        }
    }

    pub fn format(&self) -> FormatDescriptor {
        match self {
            Role::Vbt => FormatDescriptor::Object,
            Role::Parquet => FormatDescriptor::Parquet,
            Role::Compressed | Role::Standard => FormatDescriptor::Keyed,
            Role::Raw => FormatDescriptor::Csv,
        }
    }

    /// Only the compressed role applies the configured compression policy.
    pub fn honours_compression(&self) -> bool {
        matches!(self, Role::Compressed)
    }

    /// Best guess for files whose stem carries no role token.
    pub fn from_format(format: FormatDescriptor) -> Role {
        match format {
            FormatDescriptor::Object => Role::Vbt,
            FormatDescriptor::Parquet => Role::Parquet,
            FormatDescriptor::Keyed => Role::Standard,
            FormatDescriptor::Csv => Role::Raw,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Role {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Role::ALL
            .into_iter()
            .find(|r| r.label() == wanted)
            .ok_or_else(|| EngineError::ConfigInvalid(format!("unknown role '{s}'")))
    }
}
