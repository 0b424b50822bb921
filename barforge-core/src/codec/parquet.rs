//! Columnar family: Parquet via polars, Snappy, 50k-row groups.

use super::frame::{from_dataframe, to_dataframe};
use crate::domain::{BarTable, BarView};
use crate::error::Result;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

pub(crate) const ROW_GROUP_SIZE: usize = 50_000;

pub(super) fn write(view: BarView<'_>, path: &Path) -> Result<()> {
    let mut df = to_dataframe(view)?;
    let file = File::create(path)?;
    ParquetWriter::new(file)
        .with_compression(ParquetCompression::Snappy)
        .with_row_group_size(Some(ROW_GROUP_SIZE))
        .finish(&mut df)?;
    Ok(())
}

pub(super) fn read(path: &Path) -> std::result::Result<BarTable, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| e.to_string())?;
    from_dataframe(&df)
}

/// Row count from the footer metadata.
pub(super) fn row_count(path: &Path) -> std::result::Result<usize, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    ParquetReader::new(file)
        .num_rows()
        .map_err(|e| e.to_string())
}
