//! Stage-3 inspection: the facts a chart consumer needs about one artifact.

use barforge_core::codec::{Codec, FormatDescriptor};
use barforge_core::domain::BarView;
use barforge_core::error::Result;
use barforge_core::frequency::{Confidence, FrequencyInferencer};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inspection {
    pub path: PathBuf,
    pub format: FormatDescriptor,
    pub rows: usize,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub frequency: String,
    pub frequency_confidence: Confidence,
    pub min_low: Option<f64>,
    pub max_high: Option<f64>,
    pub total_volume: Option<u64>,
    /// Rows breaking `low ≤ min(open, close) ≤ max(open, close) ≤ high`.
    pub ohlc_violations: usize,
    /// Rows whose open differs from the previous close.
    pub chain_breaks: usize,
    pub notes: Vec<String>,
}

impl Inspection {
    pub fn is_gapless(&self) -> bool {
        self.chain_breaks == 0
    }
}

impl fmt::Display for Inspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({:?})", self.path.display(), self.format)?;
        writeln!(f, "  rows:        {}", self.rows)?;
        match (self.start, self.end) {
            (Some(start), Some(end)) => writeln!(f, "  range:       {start} .. {end}")?,
            _ => writeln!(f, "  range:       empty")?,
        }
        writeln!(
            f,
            "  frequency:   {} ({:?})",
            self.frequency, self.frequency_confidence
        )?;
        if let (Some(low), Some(high)) = (self.min_low, self.max_high) {
            writeln!(f, "  price:       {low} .. {high}")?;
        }
        if let Some(volume) = self.total_volume {
            writeln!(f, "  volume:      {volume}")?;
        }
        writeln!(f, "  ohlc errors: {}", self.ohlc_violations)?;
        write!(
            f,
            "  gapless:     {}",
            if self.is_gapless() { "yes".to_string() } else { format!("no ({} breaks)", self.chain_breaks) }
        )
    }
}

/// Load `path` and summarise it.
pub fn inspect(codec: &Codec, inferencer: &FrequencyInferencer, path: &Path) -> Result<Inspection> {
    let loaded = codec.load(path)?;
    let view = loaded.table.view();
    let estimate = inferencer.infer(view.index());
    let notes = loaded
        .notes
        .iter()
        .chain(estimate.notes.iter())
        .map(ToString::to_string)
        .collect();

    Ok(Inspection {
        path: path.to_path_buf(),
        format: loaded.format,
        rows: view.len(),
        start: view.first_timestamp(),
        end: view.last_timestamp(),
        frequency: estimate.label(),
        frequency_confidence: estimate.confidence,
        min_low: extreme(view, f64::min, BarView::low),
        max_high: extreme(view, f64::max, BarView::high),
        total_volume: view.total_volume(),
        ohlc_violations: view.ohlc_violations(),
        chain_breaks: view.chain_breaks(),
        notes,
    })
}

fn extreme<'a>(
    view: BarView<'a>,
    pick: fn(f64, f64) -> f64,
    column: fn(&BarView<'a>) -> &'a [f64],
) -> Option<f64> {
    column(&view)
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .reduce(pick)
}
