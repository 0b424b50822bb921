//! Time-range filter and window resolution.

use crate::domain::{BarTable, BarView, WindowName};
use crate::error::{EngineError, Result};
use crate::notes::Note;
use chrono::NaiveDateTime;
use std::ops::Range;

/// Results shorter than this fraction of the input are compacted.
pub const COMPACTION_RATIO: f64 = 0.8;

/// Reject an index that is not strictly increasing.
pub fn ensure_monotonic(index: &[NaiveDateTime]) -> Result<()> {
    match index.windows(2).position(|w| w[1] <= w[0]) {
        None => Ok(()),
        Some(i) => Err(EngineError::IndexNotMonotonic {
            row: i + 1,
            previous: index[i],
            current: index[i + 1],
        }),
    }
}

/// Filtered rows: a borrowed view, or an owned copy when the selection is
/// small relative to its input.
#[derive(Debug, Clone)]
pub enum Filtered<'a> {
    View(BarView<'a>),
    Compacted(BarTable),
}

impl<'a> Filtered<'a> {
    pub fn view(&self) -> BarView<'_> {
        match self {
            Filtered::View(view) => *view,
            Filtered::Compacted(table) => table.view(),
        }
    }

    pub fn len(&self) -> usize {
        self.view().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_compacted(&self) -> bool {
        matches!(self, Filtered::Compacted(_))
    }

    pub fn into_table(self) -> BarTable {
        match self {
            Filtered::View(view) => view.to_table(),
            Filtered::Compacted(table) => table,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterOutcome<'a> {
    pub data: Filtered<'a>,
    /// Selected row range within the input.
    pub range: Range<usize>,
    pub notes: Vec<Note>,
}

/// Maximal contiguous run of rows with `t0 ≤ index ≤ t1`.
pub fn filter_range(
    view: BarView<'_>,
    t0: NaiveDateTime,
    t1: NaiveDateTime,
) -> Result<FilterOutcome<'_>> {
    if t0 > t1 {
        return Err(EngineError::ConfigInvalid(format!(
            "range start {t0} is after end {t1}"
        )));
    }
    let index = view.index();
    ensure_monotonic(index)?;

    let mut notes = Vec::new();
    if let Some(last) = view.last_timestamp() {
        if t0 > last {
            log::warn!("requested start {t0} is after the last row {last}");
            notes.push(Note::RangeAfterData);
        }
    }

    let start = index.partition_point(|ts| *ts < t0);
    let end = index.partition_point(|ts| *ts <= t1).max(start);
    let range = start..end;
    let selected = view.slice(range.clone());

    let data = if !view.is_empty() && (selected.len() as f64) < COMPACTION_RATIO * view.len() as f64 {
        log::debug!("compacting {} of {} rows", selected.len(), view.len());
        Filtered::Compacted(selected.to_table())
    } else {
        Filtered::View(selected)
    };

    Ok(FilterOutcome { data, range, notes })
}

/// Resolved selection interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Lookback began before the source; start moved to the first row.
    pub clamped: bool,
}

/// `t1 = last`, `t0 = max(first, t1 − lookback)`.
pub fn resolve_window(
    window: WindowName,
    first: NaiveDateTime,
    last: NaiveDateTime,
) -> ResolvedWindow {
    resolve_selection(window, None, None, first, last)
}

/// Window resolution with optional explicit bounds, which take precedence.
pub fn resolve_selection(
    window: WindowName,
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    first: NaiveDateTime,
    last: NaiveDateTime,
) -> ResolvedWindow {
    let end = end.unwrap_or(last);
    if let Some(start) = start {
        return ResolvedWindow {
            start,
            end,
            clamped: false,
        };
    }
    match window.lookback().and_then(|d| end.checked_sub_signed(d)) {
        Some(candidate) if candidate >= first => ResolvedWindow {
            start: candidate,
            end,
            clamped: false,
        },
        Some(_) => ResolvedWindow {
            start: first,
            end,
            clamped: true,
        },
        None => ResolvedWindow {
            start: first,
            end,
            clamped: false,
        },
    }
}
