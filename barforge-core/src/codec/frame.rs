//! Conversions between bar tables and polars DataFrames.

use crate::codec::csv::parse_timestamp;
use crate::domain::{BarTable, BarView, ColumnWidths, Width};
use chrono::{DateTime, NaiveDateTime, Utc};
use polars::prelude::*;

pub(crate) const INDEX_COLUMN: &str = "timestamp";

/// Accepted index column names, in lookup order.
pub(crate) const INDEX_CANDIDATES: [&str; 5] = ["timestamp", "datetime", "date", "time", "index"];

pub(crate) const PRICE_COLUMNS: [&str; 4] = ["open", "high", "low", "close"];

/// Convert a view to a DataFrame with a microsecond datetime index.
///
/// Narrow columns are written as `f32` / `u32`.
pub(crate) fn to_dataframe(view: BarView<'_>) -> PolarsResult<DataFrame> {
    let micros: Vec<i64> = view
        .index()
        .iter()
        .map(|ts| ts.and_utc().timestamp_micros())
        .collect();
    let mut columns = vec![Column::new(INDEX_COLUMN.into(), micros)
        .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?];

    let prices = [view.open(), view.high(), view.low(), view.close()];
    for (name, values) in PRICE_COLUMNS.iter().zip(prices) {
        let column = match view.widths().price {
            Width::Wide => Column::new((*name).into(), values.to_vec()),
            Width::Narrow => Column::new(
                (*name).into(),
                values.iter().map(|&v| v as f32).collect::<Vec<f32>>(),
            ),
        };
        columns.push(column);
    }

    if let Some(volume) = view.volume() {
        let narrow = match view.widths().volume {
            Width::Narrow => volume
                .iter()
                .map(|&v| u32::try_from(v))
                .collect::<Result<Vec<u32>, _>>()
                .ok(),
            Width::Wide => None,
        };
        columns.push(match narrow {
            Some(values) => Column::new("volume".into(), values),
            None => Column::new("volume".into(), volume.to_vec()),
        });
    }

    DataFrame::new(columns)
}

fn find_column<'a>(df: &'a DataFrame, name: &str) -> Option<&'a Column> {
    df.get_columns()
        .iter()
        .find(|c| c.name().as_str().eq_ignore_ascii_case(name))
}

/// Convert a DataFrame back to a bar table.
///
/// Column lookup is case-insensitive. Nulls in price columns become NaN and
/// nulls in volume become zero; a null index is an error.
pub(crate) fn from_dataframe(df: &DataFrame) -> Result<BarTable, String> {
    let index_col = INDEX_CANDIDATES
        .iter()
        .find_map(|name| find_column(df, name))
        .ok_or_else(|| format!("no index column (expected one of {INDEX_CANDIDATES:?})"))?;
    let index = read_index(index_col)?;

    let mut prices: Vec<Vec<f64>> = Vec::with_capacity(4);
    let mut all_narrow = true;
    for name in PRICE_COLUMNS {
        let column = find_column(df, name).ok_or_else(|| format!("missing column '{name}'"))?;
        all_narrow &= column.dtype() == &DataType::Float32;
        let cast = column
            .cast(&DataType::Float64)
            .map_err(|e| format!("column '{name}': {e}"))?;
        let values = cast
            .f64()
            .map_err(|e| format!("column '{name}': {e}"))?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect();
        prices.push(values);
    }

    let mut volume_width = Width::Wide;
    let volume = match find_column(df, "volume") {
        None => None,
        Some(column) => {
            if column.dtype() == &DataType::UInt32 {
                volume_width = Width::Narrow;
            }
            let cast = column
                .cast(&DataType::UInt64)
                .map_err(|e| format!("column 'volume': {e}"))?;
            let values = cast
                .u64()
                .map_err(|e| format!("column 'volume': {e}"))?
                .into_iter()
                .map(|v| v.unwrap_or(0))
                .collect();
            Some(values)
        }
    };

    let close = prices.pop().unwrap_or_default();
    let low = prices.pop().unwrap_or_default();
    let high = prices.pop().unwrap_or_default();
    let open = prices.pop().unwrap_or_default();

    let widths = ColumnWidths {
        price: if all_narrow {
            Width::Narrow
        } else {
            Width::Wide
        },
        volume: volume_width,
    };
    BarTable::new(index, open, high, low, close, volume)
        .map(|t| t.with_widths(widths))
        .map_err(|e| e.to_string())
}

fn read_index(column: &Column) -> Result<Vec<NaiveDateTime>, String> {
    let name = column.name().to_string();
    match column.dtype() {
        DataType::String => column
            .str()
            .map_err(|e| format!("index '{name}': {e}"))?
            .into_iter()
            .enumerate()
            .map(|(row, v)| {
                v.and_then(parse_timestamp)
                    .ok_or_else(|| format!("index '{name}': unparseable value at row {row}"))
            })
            .collect(),
        dtype if dtype.is_integer() => {
            // Bare integers are epoch milliseconds.
            let cast = column
                .cast(&DataType::Int64)
                .map_err(|e| format!("index '{name}': {e}"))?;
            cast.i64()
                .map_err(|e| format!("index '{name}': {e}"))?
                .into_iter()
                .enumerate()
                .map(|(row, v)| {
                    v.and_then(DateTime::<Utc>::from_timestamp_millis)
                        .map(|dt| dt.naive_utc())
                        .ok_or_else(|| format!("index '{name}': null or out of range at row {row}"))
                })
                .collect()
        }
        _ => {
            let micros = column
                .cast(&DataType::Datetime(TimeUnit::Microseconds, None))
                .and_then(|c| c.cast(&DataType::Int64))
                .map_err(|e| format!("index '{name}': {e}"))?;
            micros
                .i64()
                .map_err(|e| format!("index '{name}': {e}"))?
                .into_iter()
                .enumerate()
                .map(|(row, v)| {
                    v.and_then(DateTime::<Utc>::from_timestamp_micros)
                        .map(|dt| dt.naive_utc())
                        .ok_or_else(|| format!("index '{name}': null at row {row}"))
                })
                .collect()
        }
    }
}
