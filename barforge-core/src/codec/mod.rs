//! Format codec: load and save bar tables in every supported family.
//!
//! Dispatch is on a `(FormatDescriptor, Compression)` pair resolved once per
//! call. Families:
//! - Object (`.pickle`): Arrow IPC file, or a plain JSON dump when the object
//!   wrapper capability is off
//! - Keyed container (`.h5`): named Arrow IPC blocks, default key `data`
//! - Columnar (`.parquet`): Snappy, 50k-row groups
//! - Tabular text (`.csv`)
//!
//! Writes are atomic: write to `<path>.tmp`, then rename into place.

mod csv;
mod frame;
mod keyed;
mod object;
mod parquet;

pub use self::csv::parse_timestamp;
pub use keyed::DEFAULT_KEY;

use crate::capabilities::Capabilities;
use crate::domain::{BarTable, BarView};
use crate::error::{EngineError, Result};
use crate::notes::Note;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// ── Descriptors ──────────────────────────────────────────────────────

/// On-disk format family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatDescriptor {
    Object,
    Keyed,
    Parquet,
    Csv,
}

impl FormatDescriptor {
    pub fn extension(&self) -> &'static str {
        match self {
            FormatDescriptor::Object => "pickle",
            FormatDescriptor::Keyed => "h5",
            FormatDescriptor::Parquet => "parquet",
            FormatDescriptor::Csv => "csv",
        }
    }

    /// Family for a file extension, case-insensitive.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pickle" | "pkl" => Some(FormatDescriptor::Object),
            "h5" | "hdf5" => Some(FormatDescriptor::Keyed),
            "parquet" => Some(FormatDescriptor::Parquet),
            "csv" => Some(FormatDescriptor::Csv),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
            .ok_or_else(|| EngineError::FormatUnsupported {
                path: path.display().to_string(),
            })
    }

    /// Whether the family stores compressed blocks.
    pub fn accepts_compression(&self) -> bool {
        matches!(self, FormatDescriptor::Object | FormatDescriptor::Keyed)
    }
}

/// Block compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Lz4,
    Blosc,
    Zstd,
}

impl Compression {
    pub fn label(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Lz4 => "lz4",
            Compression::Blosc => "blosc",
            Compression::Zstd => "zstd",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Compression {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            "blosc" => Ok(Compression::Blosc),
            "zstd" => Ok(Compression::Zstd),
            other => Err(EngineError::ConfigInvalid(format!(
                "unknown compression '{other}'"
            ))),
        }
    }
}

/// Size below which `auto` picks lz4.
pub const AUTO_LZ4_LIMIT: usize = 5 * 1024 * 1024;
/// Size above which `auto` picks zstd.
pub const AUTO_ZSTD_THRESHOLD: usize = 50 * 1024 * 1024;

/// Compression negotiation policy. Serialized as `auto` or an algorithm name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CompressionPolicy {
    #[default]
    Auto,
    Explicit(Compression),
}

impl CompressionPolicy {
    pub const NONE: CompressionPolicy = CompressionPolicy::Explicit(Compression::None);

    /// Resolve against the table's estimated in-memory size.
    pub fn resolve(&self, estimated_size: usize) -> Compression {
        match self {
            CompressionPolicy::Explicit(c) => *c,
            CompressionPolicy::Auto if estimated_size < AUTO_LZ4_LIMIT => Compression::Lz4,
            CompressionPolicy::Auto if estimated_size <= AUTO_ZSTD_THRESHOLD => Compression::Blosc,
            CompressionPolicy::Auto => Compression::Zstd,
        }
    }
}

impl FromStr for CompressionPolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(CompressionPolicy::Auto)
        } else {
            s.parse().map(CompressionPolicy::Explicit)
        }
    }
}

impl TryFrom<String> for CompressionPolicy {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<CompressionPolicy> for String {
    fn from(policy: CompressionPolicy) -> String {
        match policy {
            CompressionPolicy::Auto => "auto".to_string(),
            CompressionPolicy::Explicit(c) => c.label().to_string(),
        }
    }
}

// ── Results ──────────────────────────────────────────────────────────

/// A loaded table plus the fallbacks taken to read it.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub table: BarTable,
    pub format: FormatDescriptor,
    pub notes: Vec<Note>,
}

/// Where and how a table was actually written.
#[derive(Debug, Clone)]
pub struct Saved {
    pub path: PathBuf,
    pub format: FormatDescriptor,
    pub compression: Compression,
    pub notes: Vec<Note>,
}

/// Result of a cheap structural validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub format: FormatDescriptor,
    /// Row count when the format exposes it without a full decode.
    pub rows: Option<usize>,
    /// Keys of a keyed container.
    pub keys: Vec<String>,
}

// ── Codec ────────────────────────────────────────────────────────────

/// Format codec bound to a capability set.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    caps: Capabilities,
}

impl Codec {
    pub fn new(caps: Capabilities) -> Self {
        Self { caps }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Load a table, choosing the reader from the file extension.
    ///
    /// Within a family the next-best reader is tried before giving up with
    /// `LoadFailure`.
    pub fn load(&self, path: &Path) -> Result<Loaded> {
        let format = FormatDescriptor::from_path(path)?;
        if !path.is_file() {
            return Err(EngineError::load(path, "file not found"));
        }
        let mut notes = Vec::new();
        let table = match format {
            FormatDescriptor::Object => object::read(path),
            FormatDescriptor::Keyed => keyed::read(path, DEFAULT_KEY).map(|(table, key)| {
                if key != DEFAULT_KEY {
                    log::warn!("{}: no '{DEFAULT_KEY}' key, read '{key}'", path.display());
                    notes.push(Note::Hdf5KeyFallback { key });
                }
                table
            }),
            FormatDescriptor::Parquet => parquet::read(path),
            FormatDescriptor::Csv => csv::read(path),
        }
        .map_err(|reason| EngineError::load(path, reason))?;

        log::debug!("loaded {} rows from {}", table.len(), path.display());
        Ok(Loaded {
            table,
            format,
            notes,
        })
    }

    /// Save a table in `format`, negotiating compression with `policy`.
    ///
    /// When the resolved algorithm is unavailable the primary (object) format
    /// is written instead, next to `path` with the object extension, and a
    /// `compression_fallback` note is returned.
    pub fn save(
        &self,
        view: BarView<'_>,
        path: &Path,
        format: FormatDescriptor,
        policy: CompressionPolicy,
    ) -> Result<Saved> {
        let mut notes = Vec::new();
        let requested = if format.accepts_compression() {
            policy.resolve(view.estimated_size())
        } else {
            Compression::None
        };

        let (format, path, compression) = if self.caps.supports(requested) {
            (format, path.to_path_buf(), requested)
        } else {
            log::warn!(
                "{requested} unavailable, writing {} as {}",
                path.display(),
                FormatDescriptor::Object.extension()
            );
            notes.push(Note::CompressionFallback {
                algorithm: requested,
            });
            let fallback = path.with_extension(FormatDescriptor::Object.extension());
            (FormatDescriptor::Object, fallback, Compression::None)
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = tmp_path(&path);
        let written = match format {
            FormatDescriptor::Object => {
                if !self.caps.has_object_wrapper {
                    notes.push(Note::ObjectDumpFallback);
                }
                object::write(view, &tmp, compression, self.caps.has_object_wrapper)
            }
            FormatDescriptor::Keyed => keyed::write(view, &tmp, DEFAULT_KEY, compression),
            FormatDescriptor::Parquet => parquet::write(view, &tmp),
            FormatDescriptor::Csv => csv::write(view, &tmp),
        };
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            EngineError::Io(e)
        })?;

        log::debug!(
            "wrote {} rows to {} ({compression})",
            view.len(),
            path.display()
        );
        Ok(Saved {
            path,
            format,
            compression,
            notes,
        })
    }

    /// Save an uncompressed keyed container under an explicit key.
    pub fn save_keyed(&self, view: BarView<'_>, path: &Path, key: &str) -> Result<()> {
        let tmp = tmp_path(path);
        if let Err(e) = keyed::write(view, &tmp, key, Compression::None) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Cheap structural validation without decoding the whole table.
    pub fn probe(&self, path: &Path) -> Result<Probe> {
        let format = FormatDescriptor::from_path(path)?;
        let probe = match format {
            FormatDescriptor::Object => object::probe(path).map(|()| Probe {
                format,
                rows: None,
                keys: Vec::new(),
            }),
            FormatDescriptor::Keyed => keyed::list_keys(path).and_then(|keys| {
                if keys.is_empty() {
                    Err("container holds no keys".to_string())
                } else {
                    Ok(Probe {
                        format,
                        rows: None,
                        keys,
                    })
                }
            }),
            FormatDescriptor::Parquet => parquet::row_count(path).map(|rows| Probe {
                format,
                rows: Some(rows),
                keys: Vec::new(),
            }),
            FormatDescriptor::Csv => csv::probe(path).map(|()| Probe {
                format,
                rows: None,
                keys: Vec::new(),
            }),
        };
        probe.map_err(|reason| EngineError::load(path, reason))
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(Capabilities::default())
    }
}

/// `<path>.tmp`, keeping the original extension: `a.parquet` → `a.parquet.tmp`.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Bar;
    use chrono::NaiveDate;

    fn table(n: usize) -> BarTable {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let rows: Vec<Bar> = (0..n)
            .map(|i| {
                let close = 100.0 + i as f64 * 0.25;
                Bar {
                    timestamp: start + chrono::Duration::minutes(i as i64),
                    open: close - 0.5,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000 + i as u64,
                }
            })
            .collect();
        BarTable::from_rows(&rows)
    }

    #[test]
    fn auto_policy_thresholds() {
        let auto = CompressionPolicy::Auto;
        assert_eq!(auto.resolve(1024), Compression::Lz4);
        assert_eq!(auto.resolve(AUTO_LZ4_LIMIT), Compression::Blosc);
        assert_eq!(auto.resolve(AUTO_ZSTD_THRESHOLD), Compression::Blosc);
        assert_eq!(auto.resolve(AUTO_ZSTD_THRESHOLD + 1), Compression::Zstd);
        assert_eq!(
            CompressionPolicy::Explicit(Compression::Zstd).resolve(10),
            Compression::Zstd
        );
    }

    #[test]
    fn policy_serde_strings() {
        assert_eq!("auto".parse::<CompressionPolicy>().unwrap(), CompressionPolicy::Auto);
        assert_eq!(
            "LZ4".parse::<CompressionPolicy>().unwrap(),
            CompressionPolicy::Explicit(Compression::Lz4)
        );
        assert_eq!(String::from(CompressionPolicy::NONE), "none");
        assert!("gzip".parse::<CompressionPolicy>().is_err());
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = Codec::default().load(Path::new("bars.xlsx")).unwrap_err();
        assert_eq!(err.code(), "FormatUnsupported");
    }

    #[test]
    fn missing_file_is_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = Codec::default()
            .load(&dir.path().join("absent.parquet"))
            .unwrap_err();
        assert_eq!(err.code(), "LoadFailure");
    }

    #[test]
    fn tmp_path_appends_suffix() {
        assert_eq!(
            tmp_path(Path::new("/out/a_vbt_1.pickle")),
            PathBuf::from("/out/a_vbt_1.pickle.tmp")
        );
    }

    #[test]
    fn every_family_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Codec::default();
        let original = table(25);
        for format in [
            FormatDescriptor::Object,
            FormatDescriptor::Keyed,
            FormatDescriptor::Parquet,
            FormatDescriptor::Csv,
        ] {
            let path = dir.path().join(format!("bars.{}", format.extension()));
            let saved = codec
                .save(original.view(), &path, format, CompressionPolicy::Auto)
                .unwrap();
            assert_eq!(saved.path, path);
            assert!(!tmp_path(&path).exists());
            let loaded = codec.load(&path).unwrap();
            assert_eq!(loaded.table, original, "{format:?}");
            assert!(loaded.notes.is_empty());
            codec.probe(&path).unwrap();
        }
    }

    #[test]
    fn blosc_falls_back_to_object_format() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Codec::default();
        let path = dir.path().join("bars_compressed_1.h5");
        let saved = codec
            .save(
                table(10).view(),
                &path,
                FormatDescriptor::Keyed,
                CompressionPolicy::Explicit(Compression::Blosc),
            )
            .unwrap();
        assert_eq!(saved.format, FormatDescriptor::Object);
        assert_eq!(saved.path, dir.path().join("bars_compressed_1.pickle"));
        assert_eq!(
            saved.notes,
            vec![Note::CompressionFallback { algorithm: Compression::Blosc }]
        );
        assert!(!path.exists());
        assert_eq!(codec.load(&saved.path).unwrap().table.len(), 10);
    }

    #[test]
    fn plain_object_dump_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let caps = Capabilities {
            has_object_wrapper: false,
            ..Capabilities::default()
        };
        let codec = Codec::new(caps);
        let path = dir.path().join("bars.pickle");
        let original = table(5);
        let saved = codec
            .save(original.view(), &path, FormatDescriptor::Object, CompressionPolicy::NONE)
            .unwrap();
        assert_eq!(saved.notes, vec![Note::ObjectDumpFallback]);
        assert_eq!(codec.load(&path).unwrap().table, original);
        codec.probe(&path).unwrap();
    }

    #[test]
    fn empty_table_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Codec::default();
        let empty = BarTable::from_rows(&[]);
        for ext in ["pickle", "h5", "parquet", "csv"] {
            let path = dir.path().join(format!("empty.{ext}"));
            let format = FormatDescriptor::from_path(&path).unwrap();
            codec.save(empty.view(), &path, format, CompressionPolicy::Auto).unwrap();
            let loaded = codec.load(&path).unwrap();
            assert!(loaded.table.is_empty(), "{ext}");
        }
    }
}
