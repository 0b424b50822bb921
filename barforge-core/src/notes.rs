//! Soft-degradation notes.
//!
//! A note records that the engine took a fallback path. Notes never fail an
//! operation; they travel with the result, land in the sidecar `notes` map and
//! in the run report's warnings.

use crate::codec::Compression;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Note {
    /// Keyed container had no `data` key; the first key was read instead.
    Hdf5KeyFallback { key: String },
    /// Window lookback started before the source; start clamped to the first row.
    WindowClamped,
    /// Target was not an integral multiple of the base frequency.
    ResampleCalendarFallback { timeframe: String },
    /// Requested compression unavailable; primary format written instead.
    /// The detail reads `<algorithm>->object`, e.g. `blosc->object`.
    CompressionFallback { algorithm: Compression },
    /// Memory mode requested but the column did not fit 32 bits.
    TypeModeDowngrade { column: String },
    FrequencyLowConfidence,
    /// Requested start lies after the last row.
    RangeAfterData,
    /// Object wrapper unavailable; table dumped as plain JSON.
    ObjectDumpFallback,
}

impl Note {
    pub fn key(&self) -> &'static str {
        match self {
            Note::Hdf5KeyFallback { .. } => "hdf5_key_fallback",
            Note::WindowClamped => "window_clamped",
            Note::ResampleCalendarFallback { .. } => "resample_calendar_fallback",
            Note::CompressionFallback { .. } => "compression_fallback",
            Note::TypeModeDowngrade { .. } => "type_mode_downgrade",
            Note::FrequencyLowConfidence => "frequency_low_confidence",
            Note::RangeAfterData => "range_after_data",
            Note::ObjectDumpFallback => "object_dump_fallback",
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            Note::Hdf5KeyFallback { key } => Some(key.clone()),
            Note::ResampleCalendarFallback { timeframe } => Some(timeframe.clone()),
            Note::CompressionFallback { algorithm } => Some(format!("{}->object", algorithm.label())),
            Note::TypeModeDowngrade { column } => Some(column.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail() {
            Some(detail) => write!(f, "{}:{detail}", self.key()),
            None => f.write_str(self.key()),
        }
    }
}

/// Fold notes into the sidecar `notes` object.
///
/// Flag notes map to `true`; notes with a detail map to the detail string, or
/// to an array of details when the same key repeats.
pub fn notes_to_map(notes: &[Note]) -> BTreeMap<String, Value> {
    let mut map: BTreeMap<String, Value> = BTreeMap::new();
    for note in notes {
        let key = note.key().to_string();
        let value = note.detail().map_or(Value::Bool(true), Value::String);
        match map.get_mut(&key) {
            None => {
                map.insert(key, value);
            }
            Some(existing) if *existing == value => {}
            Some(Value::Array(items)) => {
                if !items.contains(&value) {
                    items.push(value);
                }
            }
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    }
    map
}

/// Push `note` unless an equal note is already present.
pub(crate) fn push_unique(notes: &mut Vec<Note>, note: Note) {
    if !notes.contains(&note) {
        notes.push(note);
    }
}
