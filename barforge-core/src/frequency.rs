//! Base-frequency inference over a bar index.
//!
//! Three estimators run over successive index differences:
//! 1. Strict grid: every gap equal
//! 2. Median gap
//! 3. Mode gap
//!
//! The highest-priority estimate that agrees with another estimate within the
//! tolerance is accepted with high confidence. Otherwise the configured
//! fallback is returned with low confidence.

use crate::notes::Note;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Estimator {
    StrictGrid,
    Median,
    Mode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyEstimate {
    pub duration: Duration,
    pub confidence: Confidence,
    /// Estimator that produced the accepted value; `None` for the fallback.
    pub estimator: Option<Estimator>,
    pub notes: Vec<Note>,
}

impl FrequencyEstimate {
    pub fn label(&self) -> String {
        format_duration(self.duration)
    }
}

#[derive(Debug, Clone)]
pub struct FrequencyInferencer {
    fallback: Duration,
    min_rows: usize,
    tolerance: f64,
}

impl FrequencyInferencer {
    pub const DEFAULT_MIN_ROWS: usize = 10;
    pub const DEFAULT_TOLERANCE: f64 = 0.10;

    pub fn new(fallback: Duration) -> Self {
        Self {
            fallback,
            min_rows: Self::DEFAULT_MIN_ROWS,
            tolerance: Self::DEFAULT_TOLERANCE,
        }
    }

    pub fn infer(&self, index: &[NaiveDateTime]) -> FrequencyEstimate {
        if index.len() < self.min_rows {
            log::debug!("{} rows, below {} for inference", index.len(), self.min_rows);
            return self.fallback_estimate();
        }

        let gaps: Vec<i64> = index
            .windows(2)
            .map(|w| (w[1] - w[0]).num_milliseconds())
            .filter(|&g| g > 0)
            .collect();
        if gaps.is_empty() {
            return self.fallback_estimate();
        }

        let (by_grid, (by_median, by_mode)) =
            rayon::join(|| strict_grid(&gaps), || rayon::join(|| median(&gaps), || mode(&gaps)));

        let candidates = [
            (Estimator::StrictGrid, by_grid),
            (Estimator::Median, by_median),
            (Estimator::Mode, by_mode),
        ];
        for (i, (estimator, value)) in candidates.iter().enumerate() {
            let Some(value) = value else { continue };
            let agrees = candidates
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .filter_map(|(_, (_, other))| *other)
                .any(|other| self.within_tolerance(*value, other));
            if agrees {
                return FrequencyEstimate {
                    duration: Duration::milliseconds(*value),
                    confidence: Confidence::High,
                    estimator: Some(*estimator),
                    notes: Vec::new(),
                };
            }
        }

        log::warn!("frequency estimators disagree (median {by_median:?} ms, mode {by_mode:?} ms), using fallback");
        self.fallback_estimate()
    }

    fn within_tolerance(&self, a: i64, b: i64) -> bool {
        let larger = a.max(b) as f64;
        (a - b).abs() as f64 <= self.tolerance * larger
    }

    fn fallback_estimate(&self) -> FrequencyEstimate {
        FrequencyEstimate {
            duration: self.fallback,
            confidence: Confidence::Low,
            estimator: None,
            notes: vec![Note::FrequencyLowConfidence],
        }
    }
}

impl Default for FrequencyInferencer {
    fn default() -> Self {
        Self::new(Duration::minutes(1))
    }
}

fn strict_grid(gaps: &[i64]) -> Option<i64> {
    let first = *gaps.first()?;
    gaps.iter().all(|&g| g == first).then_some(first)
}

fn median(gaps: &[i64]) -> Option<i64> {
    let mut sorted = gaps.to_vec();
    sorted.sort_unstable();
    sorted.get((sorted.len() - 1) / 2).copied()
}

/// Most frequent gap; ties resolve to the smallest gap.
fn mode(gaps: &[i64]) -> Option<i64> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for &g in gaps {
        *counts.entry(g).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|(ga, ca), (gb, cb)| ca.cmp(cb).then(gb.cmp(ga)))
        .map(|(g, _)| g)
}

/// Compact label: `1m`, `5m`, `1h`, `1d`, `1w`, `90s`, `250ms`.
pub fn format_duration(d: Duration) -> String {
    const UNITS: [(i64, &str); 5] = [
        (7 * 86_400_000, "w"),
        (86_400_000, "d"),
        (3_600_000, "h"),
        (60_000, "m"),
        (1_000, "s"),
    ];
    let ms = d.num_milliseconds();
    if ms == 0 {
        return "0s".to_string();
    }
    for (unit, suffix) in UNITS {
        if ms % unit == 0 {
            return format!("{}{suffix}", ms / unit);
        }
    }
    format!("{ms}ms")
}
