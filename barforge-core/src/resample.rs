//! OHLCV resampler.
//!
//! Factor `k = target / base`:
//! - `k == 1`: copy, method `Identity`
//! - integral `k ≥ 2`: consecutive blocks of `k` rows, trailing partial block dropped
//! - otherwise: calendar bins from the target's label rule, empty bins dropped
//!
//! Per output row: `high = max`, `low = min`, `close = last`, `volume = sum`.
//! With `gapless` on, every row after the first opens at the previous row's
//! close, and high/low widen to include that open.

use crate::domain::{BarTable, BarView, Timeframe, Width};
use crate::error::{EngineError, Result};
use crate::frequency::format_duration;
use crate::notes::Note;
use chrono::{Duration, NaiveDateTime};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResampleOptions {
    pub gapless: bool,
}

impl Default for ResampleOptions {
    fn default() -> Self {
        Self { gapless: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleMethod {
    Identity,
    Block { factor: usize },
    Calendar,
}

#[derive(Debug, Clone)]
pub struct Resampled {
    pub table: BarTable,
    pub method: ResampleMethod,
    pub notes: Vec<Note>,
}

/// Resample `view` (base frequency `base`) to `target`.
pub fn resample(
    view: BarView<'_>,
    base: Duration,
    target: Timeframe,
    options: ResampleOptions,
) -> Result<Resampled> {
    let base_ms = base.num_milliseconds();
    let target_ms = target.duration().num_milliseconds();
    if base_ms <= 0 || target_ms < base_ms {
        return Err(EngineError::ResampleImpossible {
            base: format_duration(base),
            target: target.label().to_string(),
        });
    }

    if target_ms % base_ms == 0 {
        let factor = usize::try_from(target_ms / base_ms).map_err(|_| {
            EngineError::ResampleImpossible {
                base: format_duration(base),
                target: target.label().to_string(),
            }
        })?;
        if factor == 1 {
            return Ok(Resampled {
                table: view.to_table(),
                method: ResampleMethod::Identity,
                notes: Vec::new(),
            });
        }
        let blocks = (0..view.len() / factor).map(|b| {
            let rows = b * factor..(b + 1) * factor;
            (view.index()[rows.start], rows)
        });
        let table = aggregate(view, blocks, options.gapless)?;
        log::debug!(
            "block resample {} -> {}: k={factor}, {} -> {} rows",
            format_duration(base),
            target,
            view.len(),
            table.len()
        );
        return Ok(Resampled {
            table,
            method: ResampleMethod::Block { factor },
            notes: Vec::new(),
        });
    }

    log::info!(
        "{} is not a multiple of {}, using calendar bins",
        target,
        format_duration(base)
    );
    let table = aggregate(view, calendar_bins(view, target), options.gapless)?;
    Ok(Resampled {
        table,
        method: ResampleMethod::Calendar,
        notes: vec![Note::ResampleCalendarFallback {
            timeframe: target.label().to_string(),
        }],
    })
}

/// Consecutive runs of rows sharing a calendar bin.
fn calendar_bins(
    view: BarView<'_>,
    target: Timeframe,
) -> impl Iterator<Item = (NaiveDateTime, Range<usize>)> + '_ {
    let index = view.index();
    let origin = index.first().map(|ts| ts.date()).unwrap_or_default();
    let mut start = 0;
    std::iter::from_fn(move || {
        if start >= index.len() {
            return None;
        }
        let bin = target.bin_start(index[start], origin);
        let len = index[start..]
            .iter()
            .take_while(|ts| target.bin_start(**ts, origin) == bin)
            .count();
        let rows = start..start + len;
        start += len;
        Some((bin, rows))
    })
}

fn aggregate(
    view: BarView<'_>,
    groups: impl Iterator<Item = (NaiveDateTime, Range<usize>)>,
    gapless: bool,
) -> Result<BarTable> {
    let (open, high, low, close) = (view.open(), view.high(), view.low(), view.close());
    let mut out_index = Vec::new();
    let mut out_open = Vec::new();
    let mut out_high = Vec::new();
    let mut out_low = Vec::new();
    let mut out_close = Vec::new();
    let mut out_volume = view.volume().map(|_| Vec::new());

    for (ts, rows) in groups {
        let first_open = open[rows.start];
        let o = match out_close.last() {
            Some(&prev_close) if gapless => prev_close,
            _ => first_open,
        };
        let h = high[rows.clone()].iter().copied().fold(o, f64::max);
        let l = low[rows.clone()].iter().copied().fold(o, f64::min);
        out_index.push(ts);
        out_open.push(o);
        out_high.push(h);
        out_low.push(l);
        out_close.push(close[rows.end - 1]);
        if let (Some(acc), Some(volume)) = (out_volume.as_mut(), view.volume()) {
            let sum = volume[rows]
                .iter()
                .fold(0u64, |acc, &v| acc.saturating_add(v));
            acc.push(sum);
        }
    }

    let mut widths = view.widths();
    if widths.volume == Width::Narrow {
        let overflow = out_volume
            .as_ref()
            .is_some_and(|v| v.iter().any(|&x| u32::try_from(x).is_err()));
        if overflow {
            widths.volume = Width::Wide;
        }
    }

    Ok(BarTable::new(out_index, out_open, out_high, out_low, out_close, out_volume)?
        .with_widths(widths))
}
