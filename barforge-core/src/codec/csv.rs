//! Tabular text family.

use super::frame::{INDEX_CANDIDATES, PRICE_COLUMNS};
use crate::domain::{BarTable, BarView};
use crate::error::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::path::Path;

const WRITE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Layouts tried in order after RFC 3339.
const LAYOUTS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a timestamp in any accepted layout: RFC 3339 (converted to UTC),
/// `YYYY-MM-DD HH:MM:SS[.f]`, `YYYY-MM-DDTHH:MM:SS[.f]`, `YYYY-MM-DD`, or
/// epoch milliseconds.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for layout in LAYOUTS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(ts);
        }
    }
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return day.and_hms_opt(0, 0, 0);
    }
    s.parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| dt.naive_utc())
}

pub(super) fn write(view: BarView<'_>, path: &Path) -> Result<()> {
    let mut writer = ::csv::Writer::from_path(path)?;
    writer.write_record(view.column_names())?;
    for i in 0..view.len() {
        let mut record = vec![
            view.index()[i].format(WRITE_FORMAT).to_string(),
            view.open()[i].to_string(),
            view.high()[i].to_string(),
            view.low()[i].to_string(),
            view.close()[i].to_string(),
        ];
        if let Some(volume) = view.volume() {
            record.push(volume[i].to_string());
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

struct Layout {
    index: usize,
    prices: [usize; 4],
    volume: Option<usize>,
}

fn layout(headers: &::csv::StringRecord) -> std::result::Result<Layout, String> {
    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    };
    let index = INDEX_CANDIDATES
        .iter()
        .find_map(|name| find(name))
        .ok_or_else(|| format!("no index column (expected one of {INDEX_CANDIDATES:?})"))?;
    let mut prices = [0usize; 4];
    for (slot, name) in prices.iter_mut().zip(PRICE_COLUMNS) {
        *slot = find(name).ok_or_else(|| format!("missing column '{name}'"))?;
    }
    Ok(Layout {
        index,
        prices,
        volume: find("volume"),
    })
}

/// Empty cells load as NaN; anything else must parse.
fn parse_price(field: &str, name: &str, row: usize) -> std::result::Result<f64, String> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(f64::NAN);
    }
    field
        .parse()
        .map_err(|_| format!("row {row}: invalid {name} '{field}'"))
}

fn parse_volume(field: &str, row: usize) -> std::result::Result<u64, String> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(0);
    }
    field
        .parse::<u64>()
        .or_else(|_| {
            field
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(|v| v.round() as u64)
                .ok_or(())
        })
        .map_err(|_| format!("row {row}: invalid volume '{field}'"))
}

pub(super) fn read(path: &Path) -> std::result::Result<BarTable, String> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(::csv::Trim::All)
        .from_path(path)
        .map_err(|e| e.to_string())?;
    let headers = reader.headers().map_err(|e| e.to_string())?.clone();
    let layout = layout(&headers)?;

    let mut index = Vec::new();
    let mut columns: [Vec<f64>; 4] = Default::default();
    let mut volume = layout.volume.map(|_| Vec::new());

    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| e.to_string())?;
        let field = |i: usize| record.get(i).unwrap_or("");
        let raw_ts = field(layout.index);
        let ts = parse_timestamp(raw_ts)
            .ok_or_else(|| format!("row {row}: unparseable timestamp '{raw_ts}'"))?;
        index.push(ts);
        for ((column, &pos), name) in columns.iter_mut().zip(&layout.prices).zip(PRICE_COLUMNS) {
            column.push(parse_price(field(pos), name, row)?);
        }
        if let (Some(values), Some(pos)) = (volume.as_mut(), layout.volume) {
            values.push(parse_volume(field(pos), row)?);
        }
    }

    let [open, high, low, close] = columns;
    BarTable::new(index, open, high, low, close, volume).map_err(|e| e.to_string())
}

/// Header row present and names an index column.
pub(super) fn probe(path: &Path) -> std::result::Result<(), String> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| e.to_string())?;
    let headers = reader.headers().map_err(|e| e.to_string())?;
    if headers.is_empty() {
        return Err("missing header row".to_string());
    }
    layout(headers).map(|_| ())
}
