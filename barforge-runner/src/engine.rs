//! Staged engine: Stage-1 selection, Stage-2 multi-timeframe resampling.
//!
//! The engine is synchronous. Capabilities are probed once in [`Engine::new`]
//! and every codec, writer and scanner it hands out shares them. Stage-2
//! timeframes run serially in configuration order, or on a private bounded
//! rayon pool when `parallel_timeframes` is set; each task borrows the
//! prepared table immutably and returns an owned result.

use crate::cancel::CancelToken;
use crate::inspect::{self, Inspection};
use crate::scanner::Scanner;
use crate::writer::{ArtifactIdentity, ArtifactWriter, EmitContext, Emitted};
use barforge_core::capabilities::{Capabilities, RuntimeOptions};
use barforge_core::codec::Codec;
use barforge_core::config::{PipelineConfig, Stage};
use barforge_core::domain::{BarTable, Timeframe};
use barforge_core::error::{EngineError, Result};
use barforge_core::filter::{ensure_monotonic, filter_range, resolve_selection, ResolvedWindow};
use barforge_core::frequency::{FrequencyEstimate, FrequencyInferencer};
use barforge_core::notes::Note;
use barforge_core::optimize::{optimize, TypeMode};
use barforge_core::resample::{resample, ResampleOptions};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ── Report ───────────────────────────────────────────────────────────

/// One failed unit of work. Stage-2 failures are per timeframe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageError {
    pub stage: &'static str,
    pub timeframe: Option<String>,
    pub code: &'static str,
    pub message: String,
}

impl StageError {
    fn new(stage: Stage, timeframe: Option<Timeframe>, err: &EngineError) -> Self {
        Self {
            stage: stage.dir_name(),
            timeframe: timeframe.map(|tf| tf.label().to_string()),
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Result record of a stage run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Every created data file and sidecar.
    pub paths: Vec<PathBuf>,
    /// Soft-degradation notes, deduplicated.
    pub warnings: Vec<String>,
    pub errors: Vec<StageError>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }

    fn warn(&mut self, warning: String) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    fn record(&mut self, emitted: Emitted) {
        self.paths.extend(emitted.paths());
        for note in &emitted.notes {
            self.warn(note.to_string());
        }
    }

    fn merge(&mut self, other: RunReport) {
        self.paths.extend(other.paths);
        for warning in other.warnings {
            self.warn(warning);
        }
        self.errors.extend(other.errors);
        self.cancelled |= other.cancelled;
    }
}

/// Progress event, sent after each completed unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub stage: Stage,
    pub timeframe: Option<Timeframe>,
    pub completed: usize,
    pub total: usize,
}

pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

// ── Prepared selection ───────────────────────────────────────────────

/// Source loaded, optimized, frequency-inferred and filtered to the window.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub table: BarTable,
    pub source_rows: usize,
    /// `None` when the source is empty.
    pub window: Option<ResolvedWindow>,
    pub frequency: FrequencyEstimate,
    pub type_mode: TypeMode,
    pub notes: Vec<Note>,
}

// ── Engine ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Engine {
    options: RuntimeOptions,
    codec: Codec,
    inferencer: FrequencyInferencer,
    progress: Option<ProgressCallback>,
}

impl Engine {
    pub fn new(options: RuntimeOptions) -> Self {
        let caps = Capabilities::probe(&options);
        Self {
            inferencer: FrequencyInferencer::new(options.frequency_fallback),
            codec: Codec::new(caps),
            options,
            progress: None,
        }
    }

    pub fn with_progress(mut self, callback: impl Fn(&Progress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        self.codec.capabilities()
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn scanner(&self) -> Scanner {
        Scanner::new(self.codec, &self.options)
    }

    /// Validate the configuration, load the source and select the window.
    ///
    /// Configuration errors surface before the source is opened.
    pub fn prepare(&self, config: &PipelineConfig) -> Result<Prepared> {
        config.validate()?;

        let loaded = self.codec.load(&config.source_path)?;
        let mut notes = loaded.notes;
        ensure_monotonic(loaded.table.index())?;
        let source_rows = loaded.table.len();

        let optimized = optimize(loaded.table, config.type_mode);
        notes.extend(optimized.notes);
        let frequency = self.inferencer.infer(optimized.table.index());
        notes.extend(frequency.notes.iter().cloned());

        let view = optimized.table.view();
        let (Some(first), Some(last)) = (view.first_timestamp(), view.last_timestamp()) else {
            log::warn!("{} holds no rows", config.source_path.display());
            return Ok(Prepared {
                table: optimized.table,
                source_rows,
                window: None,
                frequency,
                type_mode: optimized.mode,
                notes,
            });
        };

        let window = resolve_selection(config.window_name, config.start, config.end, first, last);
        if window.clamped {
            log::info!(
                "{} lookback starts before {first}, clamped",
                config.window_name
            );
            notes.push(Note::WindowClamped);
        }

        let selected = {
            let outcome = filter_range(view, window.start, window.end)?;
            notes.extend(outcome.notes.iter().cloned());
            if outcome.range == (0..source_rows) {
                None
            } else {
                Some(outcome.data.into_table())
            }
        };
        let table = selected.unwrap_or(optimized.table);

        log::info!(
            "selected {} of {source_rows} rows ({} .. {}), base frequency {}",
            table.len(),
            window.start,
            window.end,
            frequency.label()
        );
        Ok(Prepared {
            table,
            source_rows,
            window: Some(window),
            frequency,
            type_mode: optimized.mode,
            notes,
        })
    }

    pub fn run_stage1(&self, config: &PipelineConfig, cancel: &CancelToken) -> Result<RunReport> {
        let prepared = self.prepare(config)?;
        self.stage1(config, &prepared, cancel)
    }

    pub fn run_stage2(&self, config: &PipelineConfig, cancel: &CancelToken) -> Result<RunReport> {
        let prepared = self.prepare(config)?;
        Ok(self.stage2(config, &prepared, cancel))
    }

    /// Stage-1 to completion, then Stage-2 on the same selection.
    pub fn run(&self, config: &PipelineConfig, cancel: &CancelToken) -> Result<RunReport> {
        let prepared = self.prepare(config)?;
        let mut report = self.stage1(config, &prepared, cancel)?;
        if report.cancelled {
            return Ok(report);
        }
        report.merge(self.stage2(config, &prepared, cancel));
        Ok(report)
    }

    pub fn inspect(&self, path: &Path) -> Result<Inspection> {
        inspect::inspect(&self.codec, &self.inferencer, path)
    }

    fn stage1(
        &self,
        config: &PipelineConfig,
        prepared: &Prepared,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let mut report = RunReport::default();
        for note in &prepared.notes {
            report.warn(note.to_string());
        }
        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        let identity = ArtifactIdentity {
            asset: config.asset(),
            window: config.window_name,
            timeframe: None,
        };
        let context = self.context(config, prepared, None);
        match self.writer().emit(
            &config.stage_dir(Stage::One),
            prepared.table.view(),
            &identity,
            &config.roles_for(Stage::One),
            config.compression_policy,
            &context,
            cancel,
        ) {
            Ok(emitted) => report.record(emitted),
            Err(EngineError::Cancelled) => report.cancelled = true,
            Err(e) => return Err(e),
        }
        self.notify(Progress {
            stage: Stage::One,
            timeframe: None,
            completed: 1,
            total: 1,
        });
        Ok(report)
    }

    fn stage2(&self, config: &PipelineConfig, prepared: &Prepared, cancel: &CancelToken) -> RunReport {
        let mut report = RunReport::default();
        for note in &prepared.notes {
            report.warn(note.to_string());
        }
        if config.timeframes.is_empty() {
            log::info!("no timeframes configured, Stage-2 skipped");
            return report;
        }

        let total = config.timeframes.len();
        let completed = AtomicUsize::new(0);
        let run_one = |tf: Timeframe| -> Result<Emitted> {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let out = self.emit_timeframe(config, prepared, tf, cancel);
            self.notify(Progress {
                stage: Stage::Two,
                timeframe: Some(tf),
                completed: completed.fetch_add(1, Ordering::Relaxed) + 1,
                total,
            });
            out
        };

        let results: Vec<(Timeframe, Result<Emitted>)> = if self.options.parallel_timeframes {
            let workers = self.options.worker_count();
            match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => pool.install(|| {
                    config
                        .timeframes
                        .par_iter()
                        .map(|&tf| (tf, run_one(tf)))
                        .collect()
                }),
                Err(e) => {
                    log::warn!("worker pool unavailable ({e}), running timeframes serially");
                    config.timeframes.iter().map(|&tf| (tf, run_one(tf))).collect()
                }
            }
        } else {
            config.timeframes.iter().map(|&tf| (tf, run_one(tf))).collect()
        };

        for (tf, result) in results {
            match result {
                Ok(emitted) => report.record(emitted),
                Err(EngineError::Cancelled) => report.cancelled = true,
                Err(e) => {
                    log::error!("timeframe {tf} failed: {e}");
                    report.errors.push(StageError::new(Stage::Two, Some(tf), &e));
                }
            }
        }
        report
    }

    fn emit_timeframe(
        &self,
        config: &PipelineConfig,
        prepared: &Prepared,
        tf: Timeframe,
        cancel: &CancelToken,
    ) -> Result<Emitted> {
        let resampled = resample(
            prepared.table.view(),
            prepared.frequency.duration,
            tf,
            ResampleOptions {
                gapless: config.gapless,
            },
        )?;
        let mut context = self.context(config, prepared, Some(tf));
        context.notes.extend(resampled.notes);

        let identity = ArtifactIdentity {
            asset: config.asset(),
            window: config.window_name,
            timeframe: Some(tf),
        };
        self.writer().emit(
            &config.stage_dir(Stage::Two),
            resampled.table.view(),
            &identity,
            &config.roles_for(Stage::Two),
            config.compression_policy,
            &context,
            cancel,
        )
    }

    fn writer(&self) -> ArtifactWriter {
        ArtifactWriter::new(self.codec)
    }

    /// `target` is the resample timeframe for Stage-2, `None` for Stage-1.
    fn context(&self, config: &PipelineConfig, prepared: &Prepared, target: Option<Timeframe>) -> EmitContext {
        let source = prepared.frequency.label();
        let (inferred_frequency, source_frequency) = match target {
            Some(tf) => (tf.label().to_string(), Some(source)),
            None => (source, None),
        };
        EmitContext {
            source_file: config.source_file_name(),
            type_mode: prepared.type_mode,
            inferred_frequency,
            frequency_confidence: prepared.frequency.confidence,
            source_frequency,
            notes: prepared.notes.clone(),
            created_at: None,
        }
    }

    fn notify(&self, progress: Progress) {
        if let Some(cb) = &self.progress {
            cb(&progress);
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(RuntimeOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barforge_core::domain::Bar;
    use chrono::{Duration, NaiveDate};

    fn write_source(dir: &Path, days: i64) -> PathBuf {
        let t0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let rows: Vec<Bar> = (0..days * 24)
            .map(|h| Bar {
                timestamp: t0 + Duration::hours(h),
                open: 50.0,
                high: 51.0,
                low: 49.0,
                close: 50.0,
                volume: 3,
            })
            .collect();
        let path = dir.join("CL_hourly.parquet");
        Codec::default()
            .save(
                BarTable::from_rows(&rows).view(),
                &path,
                barforge_core::codec::FormatDescriptor::Parquet,
                barforge_core::codec::CompressionPolicy::Auto,
            )
            .unwrap();
        path
    }

    #[test]
    fn prepare_clamps_window_and_infers_frequency() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new(write_source(dir.path(), 10));
        let prepared = Engine::default().prepare(&config).unwrap();
        assert_eq!(prepared.table.len(), 240);
        assert_eq!(prepared.frequency.label(), "1h");
        assert!(prepared.notes.contains(&Note::WindowClamped));
    }

    #[test]
    fn start_after_end_fails_before_io() {
        let mut config = PipelineConfig::new("/nonexistent/source.csv");
        let t = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        config.start = Some(t + Duration::days(1));
        config.end = Some(t);
        let err = Engine::default().run_stage1(&config, &CancelToken::new()).unwrap_err();
        assert_eq!(err.code(), "ConfigInvalid");
        assert!(err.to_string().contains("after"));
    }

    #[test]
    fn impossible_timeframe_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::new(write_source(dir.path(), 10));
        config.output_directory = dir.path().join("out");
        config.timeframe_mode = barforge_core::TimeframeMode::Multi;
        config.timeframes = vec![Timeframe::M5, Timeframe::H4];

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let engine = Engine::default().with_progress(move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
        });
        let report = engine.run_stage2(&config, &CancelToken::new()).unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, "ResampleImpossible");
        assert_eq!(report.errors[0].timeframe.as_deref(), Some("5m"));
        assert_eq!(report.paths.len(), 4);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn cancelled_before_start_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::new(write_source(dir.path(), 2));
        config.output_directory = dir.path().join("out");
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = Engine::default().run(&config, &cancel).unwrap();
        assert!(report.cancelled);
        assert!(report.paths.is_empty());
        assert!(!config.stage_dir(Stage::One).exists());
    }
}
