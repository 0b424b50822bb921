//! Keyed container family (`.h5`).
//!
//! Layout, little-endian:
//!
//! ```text
//! "BFKEYED1"                 8-byte magic
//! u32                        entry count
//! per entry:
//!   u16 + utf-8 bytes        key
//!   u64 + bytes              Arrow IPC file
//! ```
//!
//! Readers look up the requested key and fall back to the first key.
//!
//! Genuine HDF5 files are recognised by their signature and rejected with a
//! message saying so; this family is not an HDF5 reader.

use super::frame::{from_dataframe, to_dataframe};
use super::object::ipc_compression;
use super::Compression;
use crate::domain::{BarTable, BarView};
use crate::error::Result;
use polars::prelude::*;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const DEFAULT_KEY: &str = "data";

const MAGIC: &[u8; 8] = b"BFKEYED1";
const HDF5_SIGNATURE: &[u8; 8] = b"\x89HDF\r\n\x1a\n";

struct Entry {
    key: String,
    offset: u64,
    len: u64,
}

/// Write a container holding a single block under `key`.
pub(super) fn write(
    view: BarView<'_>,
    path: &Path,
    key: &str,
    compression: Compression,
) -> Result<()> {
    let mut df = to_dataframe(view)?;
    let mut block = Vec::new();
    IpcWriter::new(&mut block)
        .with_compression(ipc_compression(compression))
        .finish(&mut df)?;
    write_blocks(path, &[(key, block.as_slice())])?;
    Ok(())
}

/// Write raw `(key, ipc-bytes)` entries.
pub(crate) fn write_blocks(path: &Path, blocks: &[(&str, &[u8])]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(MAGIC)?;
    let count = u32::try_from(blocks.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many keys"))?;
    out.write_all(&count.to_le_bytes())?;
    for (key, bytes) in blocks {
        let key_len = u16::try_from(key.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "key too long"))?;
        out.write_all(&key_len.to_le_bytes())?;
        out.write_all(key.as_bytes())?;
        out.write_all(&(bytes.len() as u64).to_le_bytes())?;
        out.write_all(bytes)?;
    }
    out.flush()
}

fn read_index<R: Read + Seek>(reader: &mut R) -> io::Result<Vec<Entry>> {
    let invalid = |msg: &str| io::Error::new(io::ErrorKind::InvalidData, msg.to_string());

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic == HDF5_SIGNATURE {
        return Err(invalid(
            "HDF5 file: only barforge keyed containers are readable, convert it to parquet or csv first",
        ));
    }
    if &magic != MAGIC {
        return Err(invalid("not a keyed container"));
    }
    let mut u32_buf = [0u8; 4];
    reader.read_exact(&mut u32_buf)?;
    let count = u32::from_le_bytes(u32_buf);

    let end = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(12))?;

    let mut entries = Vec::new();
    for _ in 0..count {
        let mut u16_buf = [0u8; 2];
        reader.read_exact(&mut u16_buf)?;
        let mut key = vec![0u8; usize::from(u16::from_le_bytes(u16_buf))];
        reader.read_exact(&mut key)?;
        let key = String::from_utf8(key).map_err(|_| invalid("key is not utf-8"))?;

        let mut u64_buf = [0u8; 8];
        reader.read_exact(&mut u64_buf)?;
        let len = u64::from_le_bytes(u64_buf);
        let offset = reader.stream_position()?;
        if offset.checked_add(len).map_or(true, |stop| stop > end) {
            return Err(invalid("block runs past end of file"));
        }
        reader.seek(SeekFrom::Current(len as i64))?;
        entries.push(Entry { key, offset, len });
    }
    Ok(entries)
}

pub(super) fn list_keys(path: &Path) -> std::result::Result<Vec<String>, String> {
    let mut reader = BufReader::new(File::open(path).map_err(|e| e.to_string())?);
    let entries = read_index(&mut reader).map_err(|e| e.to_string())?;
    Ok(entries.into_iter().map(|e| e.key).collect())
}

/// Read the block under `key`, or the first block if `key` is absent.
/// Returns the table and the key actually read.
pub(super) fn read(path: &Path, key: &str) -> std::result::Result<(BarTable, String), String> {
    let mut reader = BufReader::new(File::open(path).map_err(|e| e.to_string())?);
    let entries = read_index(&mut reader).map_err(|e| e.to_string())?;
    let entry = entries
        .iter()
        .find(|e| e.key == key)
        .or_else(|| entries.first())
        .ok_or_else(|| "container holds no keys".to_string())?;

    let len = usize::try_from(entry.len).map_err(|_| "block too large".to_string())?;
    let mut block = vec![0u8; len];
    reader
        .seek(SeekFrom::Start(entry.offset))
        .and_then(|_| reader.read_exact(&mut block))
        .map_err(|e| e.to_string())?;

    let df = IpcReader::new(Cursor::new(block))
        .finish()
        .map_err(|e| format!("key '{}': {e}", entry.key))?;
    let table = from_dataframe(&df).map_err(|e| format!("key '{}': {e}", entry.key))?;
    Ok((table, entry.key.clone()))
}
