//! Type optimizer: optional narrowing of price and volume columns.

use crate::domain::{BarTable, Width};
use crate::error::EngineError;
use crate::notes::Note;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeMode {
    /// Keep 64-bit columns.
    #[default]
    Precision,
    /// Narrow columns to 32 bits where every value fits.
    Memory,
}

impl TypeMode {
    pub fn label(&self) -> &'static str {
        match self {
            TypeMode::Precision => "precision",
            TypeMode::Memory => "memory",
        }
    }
}

impl fmt::Display for TypeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TypeMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "precision" => Ok(TypeMode::Precision),
            "memory" => Ok(TypeMode::Memory),
            other => Err(EngineError::ConfigInvalid(format!("unknown type mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Optimized {
    pub table: BarTable,
    /// Mode actually applied: `Memory` only if at least one column narrowed.
    pub mode: TypeMode,
    pub notes: Vec<Note>,
}

fn fits_f32(v: f64) -> bool {
    v.is_finite() && v.abs() <= f64::from(f32::MAX)
}

/// Apply `mode` to `table`.
///
/// Narrowed prices are rounded through `f32` so the in-memory values equal
/// what the codec writes. Columns that do not fit stay wide and produce a
/// `type_mode_downgrade` note.
pub fn optimize(mut table: BarTable, mode: TypeMode) -> Optimized {
    if mode == TypeMode::Precision {
        return Optimized {
            table,
            mode,
            notes: Vec::new(),
        };
    }

    let mut notes = Vec::new();
    let mut narrowed = false;
    let columns = table.columns_mut();

    let prices: [(&str, &Vec<f64>); 4] = [
        ("open", &*columns.open),
        ("high", &*columns.high),
        ("low", &*columns.low),
        ("close", &*columns.close),
    ];
    let misfits: Vec<&str> = prices
        .iter()
        .filter(|(_, values)| !values.iter().all(|&v| fits_f32(v)))
        .map(|(name, _)| *name)
        .collect();

    if misfits.is_empty() {
        for column in [columns.open, columns.high, columns.low, columns.close] {
            for v in column.iter_mut() {
                *v = f64::from(*v as f32);
            }
        }
        columns.widths.price = Width::Narrow;
        narrowed = true;
    } else {
        for name in misfits {
            log::warn!("column '{name}' does not fit 32-bit float, keeping 64-bit");
            notes.push(Note::TypeModeDowngrade {
                column: name.to_string(),
            });
        }
    }

    match columns.volume {
        Some(volume) if volume.iter().any(|&v| u32::try_from(v).is_err()) => {
            log::warn!("column 'volume' does not fit 32-bit unsigned, keeping 64-bit");
            notes.push(Note::TypeModeDowngrade {
                column: "volume".to_string(),
            });
        }
        Some(_) => {
            columns.widths.volume = Width::Narrow;
            narrowed = true;
        }
        None => {}
    }

    Optimized {
        table,
        mode: if narrowed {
            TypeMode::Memory
        } else {
            TypeMode::Precision
        },
        notes,
    }
}
