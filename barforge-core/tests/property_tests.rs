//! Property tests for the transform invariants.
//!
//! Uses proptest to verify:
//! 1. OHLC consistency: every resampled row keeps `low ≤ open, close ≤ high`
//! 2. Gapless chain: each resampled open equals the previous close
//! 3. Volume conservation: totals survive resampling, minus the dropped tail
//! 4. Filter range: output rows lie in the interval and none are lost

use barforge_core::domain::{Bar, BarTable, Timeframe};
use barforge_core::filter::filter_range;
use barforge_core::resample::{resample, ResampleMethod, ResampleOptions};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

fn origin() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

/// (open, close, wick up, wick down, volume)
fn arb_row() -> impl Strategy<Value = (f64, f64, f64, f64, u64)> {
    (
        10.0..500.0_f64,
        10.0..500.0_f64,
        0.0..5.0_f64,
        0.0..5.0_f64,
        0..1_000_000_u64,
    )
}

fn arb_base_minutes() -> impl Strategy<Value = i64> {
    prop_oneof![Just(1_i64), Just(2), Just(3), Just(5)]
}

/// A table on a regular grid of `step` minutes, with optional holes.
fn arb_table() -> impl Strategy<Value = (BarTable, i64)> {
    (arb_base_minutes(), prop::collection::vec((arb_row(), 1..3_i64), 0..400)).prop_map(
        |(step, rows)| {
            let mut t = origin();
            let bars: Vec<Bar> = rows
                .into_iter()
                .map(|((open, close, up, down, volume), skip)| {
                    let bar = Bar {
                        timestamp: t,
                        open,
                        high: open.max(close) + up,
                        low: open.min(close) - down,
                        close,
                        volume,
                    };
                    t += Duration::minutes(step * skip);
                    bar
                })
                .collect();
            (BarTable::from_rows(&bars), step)
        },
    )
}

fn arb_target(base: i64) -> impl Strategy<Value = Timeframe> {
    let targets: Vec<Timeframe> = Timeframe::ALL
        .into_iter()
        .filter(|tf| tf.minutes() >= base)
        .collect();
    prop::sample::select(targets)
}

fn arb_table_and_target() -> impl Strategy<Value = (BarTable, i64, Timeframe)> {
    arb_table().prop_flat_map(|(table, step)| {
        arb_target(step).prop_map(move |tf| (table.clone(), step, tf))
    })
}

// ── 1–3. Resampler ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn resampled_rows_are_consistent((table, step, tf) in arb_table_and_target()) {
        let out = resample(table.view(), Duration::minutes(step), tf, ResampleOptions::default()).unwrap();
        prop_assert_eq!(out.table.view().ohlc_violations(), 0);
    }

    #[test]
    fn resampled_rows_chain((table, step, tf) in arb_table_and_target()) {
        let out = resample(table.view(), Duration::minutes(step), tf, ResampleOptions::default()).unwrap();
        if out.method != ResampleMethod::Identity {
            prop_assert_eq!(out.table.view().chain_breaks(), 0);
        }
        if let Some(first) = out.table.row(0) {
            prop_assert_eq!(first.open, table.view().open()[0]);
        }
    }

    #[test]
    fn volume_is_conserved((table, step, tf) in arb_table_and_target()) {
        let out = resample(table.view(), Duration::minutes(step), tf, ResampleOptions::default()).unwrap();
        let covered = match out.method {
            ResampleMethod::Block { factor } => table.len() / factor * factor,
            ResampleMethod::Identity | ResampleMethod::Calendar => table.len(),
        };
        prop_assert_eq!(
            out.table.view().total_volume(),
            table.view().slice(0..covered).total_volume()
        );
    }

    #[test]
    fn non_gapless_keeps_ohlc((table, step, tf) in arb_table_and_target()) {
        let out = resample(
            table.view(),
            Duration::minutes(step),
            tf,
            ResampleOptions { gapless: false },
        )
        .unwrap();
        prop_assert_eq!(out.table.view().ohlc_violations(), 0);
    }
}

// ── 4. Filter range ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn filter_keeps_exactly_the_interval(
        (table, _) in arb_table(),
        a in 0..2_000_i64,
        len in 0..2_000_i64,
    ) {
        let t0 = origin() + Duration::minutes(a);
        let t1 = t0 + Duration::minutes(len);
        let out = filter_range(table.view(), t0, t1).unwrap();
        let view = out.data.view();
        prop_assert!(view.index().iter().all(|ts| *ts >= t0 && *ts <= t1));
        let expected = table.index().iter().filter(|ts| **ts >= t0 && **ts <= t1).count();
        prop_assert_eq!(view.len(), expected);
    }
}
