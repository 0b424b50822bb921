//! Bar table: the columnar OHLCV unit every engine stage consumes.

use crate::error::{EngineError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Storage width of a column family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Width {
    /// 64-bit floats / unsigned integers.
    #[default]
    Wide,
    /// 32-bit floats / unsigned integers.
    Narrow,
}

/// Widths of the price columns (open/high/low/close) and the volume column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnWidths {
    pub price: Width,
    pub volume: Width,
}

/// A single OHLCV row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    /// `low ≤ min(open, close) ≤ max(open, close) ≤ high`. NaN fails.
    pub fn is_consistent(&self) -> bool {
        ohlc_consistent(self.open, self.high, self.low, self.close)
    }
}

pub(crate) fn ohlc_consistent(open: f64, high: f64, low: f64, close: f64) -> bool {
    low <= open.min(close) && open.max(close) <= high
}

/// Owned, columnar OHLCV table with a strictly increasing, timezone-naive index.
///
/// Monotonicity is not enforced on construction; the time-range filter
/// rejects non-monotonic input with `IndexNotMonotonic`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BarTable {
    index: Vec<NaiveDateTime>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Option<Vec<u64>>,
    #[serde(default)]
    widths: ColumnWidths,
}

impl BarTable {
    pub fn new(
        index: Vec<NaiveDateTime>,
        open: Vec<f64>,
        high: Vec<f64>,
        low: Vec<f64>,
        close: Vec<f64>,
        volume: Option<Vec<u64>>,
    ) -> Result<Self> {
        let table = Self {
            index,
            open,
            high,
            low,
            close,
            volume,
            widths: ColumnWidths::default(),
        };
        table.check_lengths()?;
        Ok(table)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table from rows; the volume column is always present.
    pub fn from_rows(rows: &[Bar]) -> Self {
        Self {
            index: rows.iter().map(|b| b.timestamp).collect(),
            open: rows.iter().map(|b| b.open).collect(),
            high: rows.iter().map(|b| b.high).collect(),
            low: rows.iter().map(|b| b.low).collect(),
            close: rows.iter().map(|b| b.close).collect(),
            volume: Some(rows.iter().map(|b| b.volume).collect()),
            widths: ColumnWidths::default(),
        }
    }

    pub(crate) fn check_lengths(&self) -> Result<()> {
        let n = self.index.len();
        let columns = [
            ("open", self.open.len()),
            ("high", self.high.len()),
            ("low", self.low.len()),
            ("close", self.close.len()),
            ("volume", self.volume.as_ref().map_or(n, Vec::len)),
        ];
        for (name, len) in columns {
            if len != n {
                return Err(EngineError::InvalidTable(format!(
                    "column '{name}' has {len} rows, index has {n}"
                )));
            }
        }
        Ok(())
    }

    pub fn with_widths(mut self, widths: ColumnWidths) -> Self {
        self.widths = widths;
        self
    }

    pub fn view(&self) -> BarView<'_> {
        BarView {
            index: &self.index,
            open: &self.open,
            high: &self.high,
            low: &self.low,
            close: &self.close,
            volume: self.volume.as_deref(),
            widths: self.widths,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn widths(&self) -> ColumnWidths {
        self.widths
    }

    pub fn row(&self, i: usize) -> Option<Bar> {
        self.view().row(i)
    }

    /// Estimated in-memory size in bytes, honouring column widths.
    pub fn estimated_size(&self) -> usize {
        self.view().estimated_size()
    }

    pub(crate) fn columns_mut(&mut self) -> ColumnsMut<'_> {
        ColumnsMut {
            open: &mut self.open,
            high: &mut self.high,
            low: &mut self.low,
            close: &mut self.close,
            widths: &mut self.widths,
            volume: self.volume.as_deref(),
        }
    }
}

/// Mutable access used by the type optimizer.
pub(crate) struct ColumnsMut<'a> {
    pub open: &'a mut Vec<f64>,
    pub high: &'a mut Vec<f64>,
    pub low: &'a mut Vec<f64>,
    pub close: &'a mut Vec<f64>,
    pub widths: &'a mut ColumnWidths,
    pub volume: Option<&'a [u64]>,
}

/// Borrowed, zero-copy view over a contiguous row range of a [`BarTable`].
#[derive(Debug, Clone, Copy)]
pub struct BarView<'a> {
    index: &'a [NaiveDateTime],
    open: &'a [f64],
    high: &'a [f64],
    low: &'a [f64],
    close: &'a [f64],
    volume: Option<&'a [u64]>,
    widths: ColumnWidths,
}

impl<'a> BarView<'a> {
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &'a [NaiveDateTime] {
        self.index
    }

    pub fn open(&self) -> &'a [f64] {
        self.open
    }

    pub fn high(&self) -> &'a [f64] {
        self.high
    }

    pub fn low(&self) -> &'a [f64] {
        self.low
    }

    pub fn close(&self) -> &'a [f64] {
        self.close
    }

    pub fn volume(&self) -> Option<&'a [u64]> {
        self.volume
    }

    pub fn widths(&self) -> ColumnWidths {
        self.widths
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.index.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.index.last().copied()
    }

    /// Sub-view over `range`. Panics if the range is out of bounds, like slice indexing.
    pub fn slice(&self, range: Range<usize>) -> BarView<'a> {
        BarView {
            index: &self.index[range.clone()],
            open: &self.open[range.clone()],
            high: &self.high[range.clone()],
            low: &self.low[range.clone()],
            close: &self.close[range.clone()],
            volume: self.volume.map(|v| &v[range]),
            widths: self.widths,
        }
    }

    pub fn row(&self, i: usize) -> Option<Bar> {
        Some(Bar {
            timestamp: *self.index.get(i)?,
            open: self.open[i],
            high: self.high[i],
            low: self.low[i],
            close: self.close[i],
            volume: self.volume.map_or(0, |v| v[i]),
        })
    }

    pub fn to_table(&self) -> BarTable {
        BarTable {
            index: self.index.to_vec(),
            open: self.open.to_vec(),
            high: self.high.to_vec(),
            low: self.low.to_vec(),
            close: self.close.to_vec(),
            volume: self.volume.map(<[u64]>::to_vec),
            widths: self.widths,
        }
    }

    /// Names of the stored columns, index first.
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = ["timestamp", "open", "high", "low", "close"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        if self.volume.is_some() {
            names.push("volume".into());
        }
        names
    }

    pub fn estimated_size(&self) -> usize {
        let price = match self.widths.price {
            Width::Wide => 8,
            Width::Narrow => 4,
        };
        let volume = match (self.volume, self.widths.volume) {
            (None, _) => 0,
            (Some(_), Width::Wide) => 8,
            (Some(_), Width::Narrow) => 4,
        };
        self.len() * (8 + 4 * price + volume)
    }

    pub fn total_volume(&self) -> Option<u64> {
        self.volume
            .map(|v| v.iter().fold(0u64, |acc, &x| acc.saturating_add(x)))
    }

    /// Number of rows violating the OHLC ordering invariant.
    pub fn ohlc_violations(&self) -> usize {
        (0..self.len())
            .filter(|&i| !ohlc_consistent(self.open[i], self.high[i], self.low[i], self.close[i]))
            .count()
    }

    /// Number of rows whose open differs from the previous row's close.
    pub fn chain_breaks(&self) -> usize {
        (1..self.len())
            .filter(|&i| self.open[i] != self.close[i - 1])
            .count()
    }
}
