//! Object family: a self-describing single-table file.
//!
//! Written as an Arrow IPC file through polars; when the object wrapper is
//! unavailable the table is dumped as JSON instead. Readers accept both.

use super::frame::{from_dataframe, to_dataframe};
use super::Compression;
use crate::domain::{BarTable, BarView};
use crate::error::Result;
use polars::prelude::*;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::Path;

const ARROW_MAGIC: &[u8] = b"ARROW1";

pub(crate) fn ipc_compression(compression: Compression) -> Option<IpcCompression> {
    match compression {
        Compression::Lz4 => Some(IpcCompression::LZ4),
        Compression::Zstd => Some(IpcCompression::ZSTD),
        Compression::None | Compression::Blosc => None,
    }
}

pub(super) fn write(
    view: BarView<'_>,
    path: &Path,
    compression: Compression,
    arrow: bool,
) -> Result<()> {
    let file = File::create(path)?;
    if arrow {
        let mut df = to_dataframe(view)?;
        let mut writer = BufWriter::new(file);
        IpcWriter::new(&mut writer)
            .with_compression(ipc_compression(compression))
            .finish(&mut df)?;
    } else {
        serde_json::to_writer(BufWriter::new(file), &view.to_table())?;
    }
    Ok(())
}

/// Read IPC first, then the JSON dump.
pub(super) fn read(path: &Path) -> std::result::Result<BarTable, String> {
    let ipc_err = match read_ipc(path) {
        Ok(table) => return Ok(table),
        Err(e) => e,
    };
    read_json(path).map_err(|json_err| format!("not an IPC file ({ipc_err}); not a JSON dump ({json_err})"))
}

fn read_ipc(path: &Path) -> std::result::Result<BarTable, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let df = IpcReader::new(file).finish().map_err(|e| e.to_string())?;
    from_dataframe(&df)
}

fn read_json(path: &Path) -> std::result::Result<BarTable, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let table: BarTable =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| e.to_string())?;
    table.check_lengths().map_err(|e| e.to_string())?;
    Ok(table)
}

/// Magic-header check: Arrow IPC or a JSON object.
pub(super) fn probe(path: &Path) -> std::result::Result<(), String> {
    let mut head = [0u8; 6];
    let mut file = File::open(path).map_err(|e| e.to_string())?;
    let n = file.read(&mut head).map_err(|e| e.to_string())?;
    let head = &head[..n];
    if head.starts_with(ARROW_MAGIC) {
        Ok(())
    } else if head.first() == Some(&b'{') {
        Ok(())
    } else {
        Err("unrecognised object header".to_string())
    }
}
