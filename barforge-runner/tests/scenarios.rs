//! End-to-end engine scenarios.
//!
//! Each test writes a source file into a temp directory, runs a stage through
//! the engine, and checks what landed on disk through the codec and scanner.

use barforge_core::codec::{Codec, CompressionPolicy, FormatDescriptor};
use barforge_core::config::{PipelineConfig, Stage, TimeframeMode};
use barforge_core::domain::{Bar, BarTable, Role, Timeframe, WindowName, Width};
use barforge_core::frequency::Confidence;
use barforge_core::optimize::TypeMode;
use barforge_core::sidecar::Sidecar;
use barforge_core::RuntimeOptions;
use barforge_runner::{ArtifactDescriptor, CancelToken, Engine};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::path::{Path, PathBuf};

// ── Helpers ──────────────────────────────────────────────────────────

fn origin() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

/// Bars on a regular grid whose opens do not chain to the previous close.
fn make_bars(n: usize, step: Duration) -> BarTable {
    let rows: Vec<Bar> = (0..n)
        .map(|i| {
            let mid = 15_000.0 + (i as f64 * 0.05).sin() * 40.0;
            Bar {
                timestamp: origin() + step * i as i32,
                open: mid - 1.25,
                high: mid + 3.0,
                low: mid - 3.5,
                close: mid + 0.5,
                volume: 100 + (i as u64 * 7) % 53,
            }
        })
        .collect();
    BarTable::from_rows(&rows)
}

fn write_source(dir: &Path, name: &str, table: &BarTable) -> PathBuf {
    let path = dir.join(name);
    let format = FormatDescriptor::from_path(&path).unwrap();
    Codec::default()
        .save(table.view(), &path, format, CompressionPolicy::NONE)
        .unwrap();
    path
}

fn config_for(source: PathBuf, out: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::new(source);
    config.output_directory = out.to_path_buf();
    config
}

fn sidecars(paths: &[PathBuf]) -> Vec<Sidecar> {
    paths
        .iter()
        .filter(|p| Sidecar::stem_of(p).is_some())
        .map(|p| Sidecar::read(p).unwrap())
        .collect()
}

fn load_role(descriptor: &ArtifactDescriptor, role: Role) -> BarTable {
    Codec::default().load(&descriptor.roles[&role]).unwrap().table
}

// ── single-timeframe round trip ─────────────────────────

#[test]
fn single_timeframe_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let source = make_bars(10_000, Duration::minutes(1));
    assert_eq!(
        source.index()[9_999],
        NaiveDate::from_ymd_opt(2024, 1, 7).unwrap().and_hms_opt(22, 39, 0).unwrap()
    );
    let mut config = config_for(write_source(dir.path(), "NQ_1m.parquet", &source), &dir.path().join("out"));
    config.window_name = WindowName::OneWeek;
    config.timeframes = vec![Timeframe::M5];

    let engine = Engine::default();
    let report = engine.run_stage2(&config, &CancelToken::new()).unwrap();
    assert!(report.is_success(), "{report:?}");

    let scanned = engine.scanner().scan(&config.stage_dir(Stage::Two)).unwrap();
    assert_eq!(scanned.len(), 1);
    let artifact = &scanned[0];
    assert!(artifact.valid, "{:?}", artifact.problems);
    assert_eq!(artifact.timeframes, vec!["5m".to_string()]);

    let out = load_role(artifact, Role::Vbt);
    let view = out.view();
    assert_eq!(view.len(), 2_000);
    assert_eq!(view.open()[0], source.view().open()[0]);
    assert_eq!(view.close()[1_999], source.view().close()[9_999]);
    assert_eq!(view.chain_breaks(), 0);
    assert_eq!(view.ohlc_violations(), 0);
    assert_eq!(load_role(artifact, Role::Parquet), out);
    assert_eq!(load_role(artifact, Role::Compressed), out);

    let sidecar = Sidecar::read(artifact.sidecar.as_ref().unwrap()).unwrap();
    assert_eq!(sidecar.rows, 2_000);
    assert_eq!(sidecar.inferred_frequency, "5m");
    assert_eq!(sidecar.source_frequency.as_deref(), Some("1m"));
    assert_eq!(sidecar.frequency_confidence, Confidence::High);
    assert_eq!(sidecar.notes["window_clamped"], Value::Bool(true));
}

// ── keyed container fallback ────────────────────────────

#[test]
fn keyed_source_with_foreign_key() {
    let dir = tempfile::tempdir().unwrap();
    let source = make_bars(120, Duration::minutes(1));
    let path = dir.path().join("GC_legacy.h5");
    Codec::default().save_keyed(source.view(), &path, "dataset").unwrap();

    let config = config_for(path, &dir.path().join("out"));
    let report = Engine::default().run_stage1(&config, &CancelToken::new()).unwrap();
    assert!(report.is_success());
    assert!(report.warnings.contains(&"hdf5_key_fallback:dataset".to_string()));

    let written = sidecars(&report.paths);
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].notes["hdf5_key_fallback"], "dataset");
    assert_eq!(written[0].rows, 120);
    assert_eq!(written[0].timeframe, None);
}

// ── multi-timeframe fan-out ─────────────────────────────

#[test]
fn multi_timeframe_fan_out() {
    let dir = tempfile::tempdir().unwrap();
    let source = make_bars(3 * 1_440, Duration::minutes(1));
    let mut config = config_for(write_source(dir.path(), "ES_1m.parquet", &source), &dir.path().join("out"));
    config.window_name = WindowName::AllData;
    config.timeframe_mode = TimeframeMode::Multi;
    config.timeframes = vec![Timeframe::M5, Timeframe::H1, Timeframe::D1];

    let engine = Engine::default();
    let report = engine.run_stage2(&config, &CancelToken::new()).unwrap();
    assert!(report.is_success(), "{report:?}");

    let written = sidecars(&report.paths);
    assert_eq!(written.len(), 3);
    assert!(written.iter().all(|s| s.source_file == "ES_1m.parquet" && s.asset == "ES"));

    let scanned = engine.scanner().scan(&config.stage_dir(Stage::Two)).unwrap();
    assert_eq!(scanned.len(), 3);
    let by_tf = |label: &str| {
        scanned
            .iter()
            .find(|d| d.timeframes == [label.to_string()])
            .map(|d| load_role(d, Role::Parquet))
            .unwrap()
    };
    let m5 = by_tf("5m");
    let h1 = by_tf("1h");
    let d1 = by_tf("1d");
    assert_eq!(m5.len(), 864);
    assert_eq!(h1.len(), 72);
    assert_eq!(d1.len(), 3);

    let m5_volume = m5.view().volume().unwrap();
    let h1_volume = h1.view().volume().unwrap();
    for (hour, total) in h1_volume.iter().enumerate() {
        assert_eq!(m5.index()[hour * 12], h1.index()[hour]);
        let summed: u64 = m5_volume[hour * 12..(hour + 1) * 12].iter().sum();
        assert_eq!(summed, *total, "hour {hour}");
    }
    assert_eq!(d1.view().total_volume(), source.view().total_volume());
}

#[test]
fn parallel_timeframes_match_serial_order() {
    let dir = tempfile::tempdir().unwrap();
    let source = make_bars(2 * 1_440, Duration::minutes(1));
    let mut config = config_for(write_source(dir.path(), "CL_1m.parquet", &source), &dir.path().join("out"));
    config.timeframe_mode = TimeframeMode::Multi;
    config.timeframes = vec![Timeframe::M3, Timeframe::M15, Timeframe::H2, Timeframe::H8];

    let options = RuntimeOptions {
        parallel_timeframes: true,
        max_workers: Some(3),
        ..RuntimeOptions::default()
    };
    let report = Engine::new(options).run_stage2(&config, &CancelToken::new()).unwrap();
    assert!(report.is_success(), "{report:?}");
    let labels: Vec<String> = sidecars(&report.paths)
        .iter()
        .flat_map(|s| s.timeframe_labels())
        .collect();
    assert_eq!(labels, ["3m", "15m", "2h", "8h"]);
}

// ── window clamp ────────────────────────────────────────

#[test]
fn window_clamps_to_short_source() {
    let dir = tempfile::tempdir().unwrap();
    // ten months of daily bars
    let source = make_bars(300, Duration::days(1));
    let mut config = config_for(write_source(dir.path(), "ZB_daily.csv", &source), &dir.path().join("out"));
    config.window_name = WindowName::ThreeYears;

    let report = Engine::default().run_stage1(&config, &CancelToken::new()).unwrap();
    assert!(report.is_success());
    assert!(report.warnings.contains(&"window_clamped".to_string()));

    let written = sidecars(&report.paths);
    assert_eq!(written.len(), 1);
    let sidecar = &written[0];
    assert_eq!(sidecar.rows, 300);
    assert_eq!(sidecar.start, Some(origin()));
    assert_eq!(sidecar.window, "3Years");
    assert_eq!(sidecar.inferred_frequency, "1d");
    assert_eq!(sidecar.source_frequency, None);
    assert_eq!(sidecar.notes["window_clamped"], Value::Bool(true));
}

// ── cancellation ────────────────────────────────────────

#[test]
fn cancellation_after_second_timeframe() {
    let dir = tempfile::tempdir().unwrap();
    let source = make_bars(2 * 1_440, Duration::minutes(1));
    let mut config = config_for(write_source(dir.path(), "NQ_1m.parquet", &source), &dir.path().join("out"));
    config.timeframe_mode = TimeframeMode::Multi;
    config.timeframes = vec![
        Timeframe::M2,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M10,
        Timeframe::M15,
    ];

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let engine = Engine::default().with_progress(move |p| {
        if p.completed == 2 {
            trigger.cancel();
        }
    });
    let report = engine.run_stage2(&config, &cancel).unwrap();
    assert!(report.cancelled);
    assert!(report.errors.is_empty());
    assert_eq!(sidecars(&report.paths).len(), 2);

    // A family interrupted mid-write: data file present, sidecar never written.
    let stage2 = config.stage_dir(Stage::Two);
    let partial = stage2.join("NQ_1Year_5m_vbt_20240101T000000000.pickle");
    Codec::default()
        .save(source.view(), &partial, FormatDescriptor::Object, CompressionPolicy::NONE)
        .unwrap();

    let scanned = engine.scanner().scan(&stage2).unwrap();
    let valid: Vec<_> = scanned.iter().filter(|d| d.valid).collect();
    assert_eq!(valid.len(), 2);
    let mut labels: Vec<_> = valid.iter().flat_map(|d| d.timeframes.clone()).collect();
    labels.sort();
    assert_eq!(labels, ["2m", "3m"]);
    assert!(scanned.iter().any(|d| !d.valid && d.roles.values().any(|p| *p == partial)));
}

// ── Memory type mode ─────────────────────────────────────────────────

#[test]
fn memory_mode_narrows_written_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let source = make_bars(240, Duration::minutes(1));
    let mut config = config_for(write_source(dir.path(), "NQ_1m.parquet", &source), &dir.path().join("out"));
    config.type_mode = TypeMode::Memory;
    config.timeframes = vec![Timeframe::M15];

    let engine = Engine::default();
    let report = engine.run(&config, &CancelToken::new()).unwrap();
    assert!(report.is_success(), "{report:?}");
    assert!(report.warnings.iter().all(|w| !w.starts_with("type_mode_downgrade")));

    let written = sidecars(&report.paths);
    assert_eq!(written.len(), 2);
    assert!(written.iter().all(|s| s.type_mode == TypeMode::Memory));

    let stage1 = engine.scanner().scan(&config.stage_dir(Stage::One)).unwrap();
    for role in [Role::Vbt, Role::Parquet] {
        let loaded = load_role(&stage1[0], role);
        assert_eq!(loaded.widths().price, Width::Narrow, "{role:?}");
        assert_eq!(loaded.widths().volume, Width::Narrow, "{role:?}");
        assert_eq!(loaded.view().close()[7], f64::from(source.view().close()[7] as f32));
    }
}

#[test]
fn memory_mode_keeps_oversized_volume_wide() {
    let dir = tempfile::tempdir().unwrap();
    let big = u64::from(u32::MAX) + 1;
    let rows: Vec<Bar> = (0..60)
        .map(|i| Bar {
            timestamp: origin() + Duration::minutes(i),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: if i == 30 { big } else { 10 },
        })
        .collect();
    let source = BarTable::from_rows(&rows);
    let mut config = config_for(write_source(dir.path(), "VX_1m.parquet", &source), &dir.path().join("out"));
    config.type_mode = TypeMode::Memory;

    let engine = Engine::default();
    let report = engine.run_stage1(&config, &CancelToken::new()).unwrap();
    assert!(report.is_success(), "{report:?}");
    assert!(report.warnings.contains(&"type_mode_downgrade:volume".to_string()));

    let written = sidecars(&report.paths);
    assert_eq!(written[0].type_mode, TypeMode::Memory);
    assert_eq!(written[0].notes["type_mode_downgrade"], "volume");

    let scanned = engine.scanner().scan(&config.stage_dir(Stage::One)).unwrap();
    let loaded = load_role(&scanned[0], Role::Parquet);
    assert_eq!(loaded.widths().price, Width::Narrow);
    assert_eq!(loaded.widths().volume, Width::Wide);
    assert_eq!(loaded.view().volume().unwrap()[30], big);
}

// ── Boundaries and full runs ─────────────────────────────────────────

#[test]
fn empty_source_emits_empty_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("EMPTY_1m.csv");
    std::fs::write(&path, "timestamp,open,high,low,close,volume\n").unwrap();
    let config = config_for(path, &dir.path().join("out"));

    let report = Engine::default().run_stage1(&config, &CancelToken::new()).unwrap();
    assert!(report.is_success());
    let written = sidecars(&report.paths);
    assert_eq!(written[0].rows, 0);
    assert_eq!(written[0].start, None);
    assert_eq!(written[0].end, None);
    assert_eq!(written[0].frequency_confidence, Confidence::Low);
    assert_eq!(written[0].notes["frequency_low_confidence"], Value::Bool(true));
}

#[test]
fn full_run_writes_both_stages() {
    let dir = tempfile::tempdir().unwrap();
    let source = make_bars(1_440, Duration::minutes(1));
    let out = dir.path().join("out");
    let mut config = config_for(write_source(dir.path(), "NQ_1m.parquet", &source), &out);
    config.timeframes = vec![Timeframe::M30];
    config.role_set = vec![Role::Vbt, Role::Raw];

    let engine = Engine::default();
    let report = engine.run(&config, &CancelToken::new()).unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.paths.len(), 6);

    let inventory = engine.scanner().scan_output(&out).unwrap();
    assert_eq!(inventory.stage1.len(), 1);
    assert_eq!(inventory.stage2.len(), 1);
    let stage1 = &inventory.stage1[0];
    assert!(stage1.valid);
    assert_eq!(stage1.roles.keys().copied().collect::<Vec<_>>(), [Role::Vbt, Role::Raw]);
    assert_eq!(load_role(stage1, Role::Raw), source);
    assert_eq!(load_role(&inventory.stage2[0], Role::Vbt).len(), 48);

    let inspection = engine.inspect(&inventory.stage2[0].roles[&Role::Raw]).unwrap();
    assert_eq!(inspection.frequency, "30m");
    assert!(inspection.is_gapless());
}
