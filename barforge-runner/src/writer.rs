//! Artifact writer: one table in, one family of role files plus a sidecar out.
//!
//! Data files go first, each through the codec's temp-and-rename path. The
//! sidecar is written last; if any data file fails, or the run is cancelled
//! before the sidecar, the files already written stay on disk without one.

use crate::cancel::CancelToken;
use crate::stem::{build_stem, format_stamp, with_suffix};
use barforge_core::codec::{Codec, Compression, CompressionPolicy, FormatDescriptor};
use barforge_core::domain::{BarView, Role, Timeframe, WindowName};
use barforge_core::error::{EngineError, Result};
use barforge_core::frequency::Confidence;
use barforge_core::notes::{notes_to_map, Note};
use barforge_core::optimize::TypeMode;
use barforge_core::sidecar::{content_hash, Sidecar, TimeframeField, ENGINE_VERSION, SIDECAR_VERSION};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Clash suffixes tried before giving up.
const MAX_CLASH_SUFFIX: u32 = 1_000;

/// What a table is: `(asset, window, timeframe?)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactIdentity {
    pub asset: String,
    pub window: WindowName,
    /// `None` for Stage-1 selections.
    pub timeframe: Option<Timeframe>,
}

impl ArtifactIdentity {
    pub fn stem(&self, role: Role, stamp: &str) -> String {
        build_stem(&self.asset, self.window, self.timeframe, role, stamp)
    }
}

/// Provenance recorded in the sidecar alongside the table facts.
#[derive(Debug, Clone)]
pub struct EmitContext {
    pub source_file: String,
    pub type_mode: TypeMode,
    pub inferred_frequency: String,
    pub frequency_confidence: Confidence,
    /// Source frequency label when `inferred_frequency` names a resample target.
    pub source_frequency: Option<String>,
    /// Notes accumulated upstream of the writer.
    pub notes: Vec<Note>,
    /// Stamp instant; `None` means now.
    pub created_at: Option<DateTime<Utc>>,
}

/// Files and sidecar produced by one `emit`.
#[derive(Debug, Clone)]
pub struct Emitted {
    pub primary_stem: String,
    pub files: Vec<(Role, PathBuf)>,
    pub sidecar: PathBuf,
    /// Upstream notes plus any taken while writing.
    pub notes: Vec<Note>,
}

impl Emitted {
    /// Every created path, data files first.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .map(|(_, p)| p.clone())
            .chain(std::iter::once(self.sidecar.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactWriter {
    codec: Codec,
}

impl ArtifactWriter {
    pub fn new(codec: Codec) -> Self {
        Self { codec }
    }

    /// Write `view` under `dir` in every role of `roles`.
    ///
    /// `policy` applies to roles that store compressed blocks; every other
    /// role is written uncompressed (Parquet keeps Snappy).
    pub fn emit(
        &self,
        dir: &Path,
        view: BarView<'_>,
        identity: &ArtifactIdentity,
        roles: &[Role],
        policy: CompressionPolicy,
        context: &EmitContext,
        cancel: &CancelToken,
    ) -> Result<Emitted> {
        let Some(&primary) = roles.first() else {
            return Err(EngineError::ConfigInvalid("no roles requested".into()));
        };
        std::fs::create_dir_all(dir)?;

        let created_at = context.created_at.unwrap_or_else(Utc::now);
        let stamp = free_stamp(dir, identity, roles, &format_stamp(created_at))?;
        let primary_stem = identity.stem(primary, &stamp);

        let mut notes = context.notes.clone();
        let mut files = Vec::with_capacity(roles.len());
        let mut file_roles = BTreeMap::new();
        let mut compression = Compression::None;

        for &role in roles {
            if cancel.is_cancelled() {
                log::info!("cancelled before writing {role} for {primary_stem}");
                return Err(EngineError::Cancelled);
            }
            let format = role.format();
            let path = dir.join(format!("{}.{}", identity.stem(role, &stamp), format.extension()));
            let role_policy = if role.honours_compression() {
                policy
            } else {
                CompressionPolicy::NONE
            };
            let saved = self.codec.save(view, &path, format, role_policy)?;
            if role.honours_compression() || saved.compression != Compression::None {
                compression = saved.compression;
            }
            for note in saved.notes {
                if !notes.contains(&note) {
                    notes.push(note);
                }
            }
            let name = saved
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            file_roles.insert(role, name);
            files.push((role, saved.path));
        }

        if cancel.is_cancelled() {
            log::info!("cancelled before sidecar for {primary_stem}");
            return Err(EngineError::Cancelled);
        }

        let sidecar = Sidecar {
            version: SIDECAR_VERSION,
            asset: identity.asset.clone(),
            window: identity.window.label().to_string(),
            timeframe: identity
                .timeframe
                .map(|tf| TimeframeField::One(tf.label().to_string())),
            created_at,
            source_file: context.source_file.clone(),
            start: view.first_timestamp(),
            end: view.last_timestamp(),
            rows: view.len(),
            columns: view.column_names(),
            file_roles,
            type_mode: context.type_mode,
            inferred_frequency: context.inferred_frequency.clone(),
            frequency_confidence: context.frequency_confidence,
            source_frequency: context.source_frequency.clone(),
            notes: notes_to_map(&notes),
            engine_version: ENGINE_VERSION.to_string(),
            compression,
            data_hash: content_hash(view),
        };
        let sidecar_path = Sidecar::path_for(dir, &primary_stem);
        sidecar.write_atomic(&sidecar_path)?;

        log::info!(
            "emitted {} ({} rows, {} files)",
            primary_stem,
            view.len(),
            files.len()
        );
        Ok(Emitted {
            primary_stem,
            files,
            sidecar: sidecar_path,
            notes,
        })
    }
}

/// First stamp (bare, then `-1`, `-2`, ...) under which no target file,
/// fallback object file or sidecar already exists.
fn free_stamp(
    dir: &Path,
    identity: &ArtifactIdentity,
    roles: &[Role],
    stamp: &str,
) -> Result<String> {
    let object_ext = FormatDescriptor::Object.extension();
    for suffix in 0..=MAX_CLASH_SUFFIX {
        let candidate = with_suffix(stamp, suffix);
        let clash = roles.iter().any(|&role| {
            let stem = identity.stem(role, &candidate);
            dir.join(format!("{stem}.{}", role.format().extension())).exists()
                || dir.join(format!("{stem}.{object_ext}")).exists()
                || Sidecar::path_for(dir, &stem).exists()
        });
        if !clash {
            if suffix > 0 {
                log::debug!("stamp {stamp} taken, using {candidate}");
            }
            return Ok(candidate);
        }
    }
    Err(EngineError::Io(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free stamp for {stamp} in {}", dir.display()),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use barforge_core::domain::{Bar, BarTable};
    use chrono::{Duration, NaiveDate};

    fn table(n: usize) -> BarTable {
        let t0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let rows: Vec<Bar> = (0..n)
            .map(|i| Bar {
                timestamp: t0 + Duration::minutes(i as i64),
                open: 10.0,
                high: 11.0,
                low: 9.0,
                close: 10.5,
                volume: 7,
            })
            .collect();
        BarTable::from_rows(&rows)
    }

    fn identity() -> ArtifactIdentity {
        ArtifactIdentity {
            asset: "NQ".into(),
            window: WindowName::OneYear,
            timeframe: None,
        }
    }

    fn context() -> EmitContext {
        EmitContext {
            source_file: "NQ_1m.csv".into(),
            type_mode: TypeMode::Precision,
            inferred_frequency: "1m".into(),
            frequency_confidence: Confidence::High,
            source_frequency: None,
            notes: vec![Note::WindowClamped],
            created_at: Some(
                NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(12, 0, 0).unwrap().and_utc(),
            ),
        }
    }

    #[test]
    fn emit_writes_roles_then_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let data = table(30);
        let emitted = ArtifactWriter::default()
            .emit(
                dir.path(),
                data.view(),
                &identity(),
                &Role::STAGE1_DEFAULT,
                CompressionPolicy::Auto,
                &context(),
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(emitted.primary_stem, "NQ_1Year_vbt_20240601T120000000");
        assert_eq!(emitted.files.len(), 3);
        for path in emitted.paths() {
            assert!(path.exists(), "{}", path.display());
        }

        let sidecar = Sidecar::read(&emitted.sidecar).unwrap();
        assert_eq!(sidecar.rows, 30);
        assert_eq!(sidecar.timeframe, None);
        assert_eq!(
            sidecar.file_roles[&Role::Standard],
            "NQ_1Year_standard_20240601T120000000.h5"
        );
        assert_eq!(sidecar.notes["window_clamped"], serde_json::Value::Bool(true));
        assert_eq!(sidecar.data_hash, content_hash(data.view()));
    }

    #[test]
    fn clashing_stamp_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let data = table(5);
        let writer = ArtifactWriter::default();
        let emit = || {
            writer
                .emit(
                    dir.path(),
                    data.view(),
                    &identity(),
                    &[Role::Parquet],
                    CompressionPolicy::Auto,
                    &context(),
                    &CancelToken::new(),
                )
                .unwrap()
        };
        let first = emit();
        let second = emit();
        let third = emit();
        assert_eq!(first.primary_stem, "NQ_1Year_parquet_20240601T120000000");
        assert_eq!(second.primary_stem, "NQ_1Year_parquet_20240601T120000000-1");
        assert_eq!(third.primary_stem, "NQ_1Year_parquet_20240601T120000000-2");
    }

    #[test]
    fn cancelled_emit_leaves_no_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let data = table(5);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = ArtifactWriter::default()
            .emit(
                dir.path(),
                data.view(),
                &identity(),
                &Role::STAGE1_DEFAULT,
                CompressionPolicy::Auto,
                &context(),
                &cancel,
            )
            .unwrap_err();
        assert_eq!(err.code(), "Cancelled");
        let sidecars = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with("_metadata.json"))
            .count();
        assert_eq!(sidecars, 0);
    }

    #[test]
    fn blosc_fallback_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let data = table(5);
        let identity = ArtifactIdentity {
            timeframe: Some(Timeframe::M5),
            ..identity()
        };
        let emitted = ArtifactWriter::default()
            .emit(
                dir.path(),
                data.view(),
                &identity,
                &Role::STAGE2_DEFAULT,
                CompressionPolicy::Explicit(Compression::Blosc),
                &context(),
                &CancelToken::new(),
            )
            .unwrap();
        let sidecar = Sidecar::read(&emitted.sidecar).unwrap();
        assert_eq!(
            sidecar.file_roles[&Role::Compressed],
            "NQ_1Year_5m_compressed_20240601T120000000.pickle"
        );
        assert_eq!(sidecar.notes["compression_fallback"], "blosc->object");
        assert_eq!(sidecar.timeframe_labels(), vec!["5m".to_string()]);
    }
}
