//! Per-generator file holding the high id and the freed-id backlog.
//!
//! ```text
//! | flag (u8) | high id (u64 BE) | freed id (u64 BE) * |
//! ```
//!
//! The flag is `CLEAN` only after an orderly close. An open generator keeps
//! the file `STICKY`; finding it sticky on open means the previous owner
//! crashed, so its freed ids are not trusted.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};
use common::serde::encoding::{decode_u8, decode_u64};
use tracing::{debug, warn};

use crate::error::{Error, Result};

const CLEAN: u8 = 0x00;
const STICKY: u8 = 0x01;
const HEADER_LEN: usize = 9;

/// Contents of an id file found at open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdFileContents {
    pub high_id: u64,
    pub freed_ids: Vec<u64>,
    /// Whether the previous owner closed the file cleanly.
    pub clean: bool,
}

/// Open, sticky id file owned by one generator.
#[derive(Debug)]
pub struct IdFile {
    path: PathBuf,
    file: File,
}

impl IdFile {
    /// Creates (or overwrites) a clean id file with no freed ids.
    pub fn create(path: &Path, high_id: u64) -> Result<()> {
        replace(path, CLEAN, high_id, &[])
    }

    /// Opens the id file at `path`, creating it if missing, and marks it sticky.
    ///
    /// The returned high id is never lower than `min_high_id`.
    pub fn open(path: &Path, min_high_id: u64) -> Result<(IdFile, IdFileContents)> {
        if !path.exists() {
            Self::create(path, min_high_id)?;
        }
        let data = std::fs::read(path).map_err(|e| io_error(path, e))?;
        let mut contents = decode(path, &data)?;
        if !contents.clean {
            warn!(
                file = %path.display(),
                high_id = contents.high_id,
                "id file was not closed cleanly, discarding freed ids"
            );
            contents.freed_ids.clear();
        }
        contents.high_id = contents.high_id.max(min_high_id);

        replace(path, STICKY, contents.high_id, &[])?;
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| io_error(path, e))?;
        let id_file = IdFile {
            path: path.to_path_buf(),
            file,
        };
        debug!(
            file = %path.display(),
            high_id = contents.high_id,
            freed = contents.freed_ids.len(),
            "opened id file"
        );
        Ok((id_file, contents))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the sticky header with `high_id` in place. The header is a
    /// single nine-byte write at offset zero.
    pub fn write_high_id(&mut self, high_id: u64) -> Result<()> {
        let path = &self.path;
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&header(STICKY, high_id)))
            .and_then(|_| self.file.sync_data())
            .map_err(|e| io_error(path, e))
    }

    /// Writes the freed-id backlog and a clean header, consuming the file.
    pub fn close(self, high_id: u64, freed_ids: &[u64]) -> Result<()> {
        drop(self.file);
        replace(&self.path, CLEAN, high_id, freed_ids)
    }
}

/// Atomically replaces the file at `path` through a synced temp file and a
/// rename, so a crash leaves either the old or the new contents.
fn replace(path: &Path, flag: u8, high_id: u64, freed_ids: &[u64]) -> Result<()> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + freed_ids.len() * 8);
    buf.extend_from_slice(&header(flag, high_id));
    for id in freed_ids {
        buf.put_u64(*id);
    }

    let tmp_path = tmp_path(path);
    let mut tmp = File::create(&tmp_path).map_err(|e| io_error(&tmp_path, e))?;
    tmp.write_all(&buf)
        .and_then(|_| tmp.sync_all())
        .map_err(|e| io_error(&tmp_path, e))?;
    drop(tmp);

    fs::rename(&tmp_path, path).map_err(|e| io_error(path, e))?;
    fsync_dir(path)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn fsync_dir(path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| io_error(dir, e))
}

/// Reads an id file without opening it for writing.
pub fn read_id_file(path: &Path) -> Result<IdFileContents> {
    let data = std::fs::read(path).map_err(|e| io_error(path, e))?;
    decode(path, &data)
}

fn header(flag: u8, high_id: u64) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0] = flag;
    header[1..].copy_from_slice(&high_id.to_be_bytes());
    header
}

fn decode(path: &Path, data: &[u8]) -> Result<IdFileContents> {
    let mut buf = data;
    let flag = decode_u8(&mut buf)
        .map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))?;
    let high_id = decode_u64(&mut buf)
        .map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))?;
    let clean = match flag {
        CLEAN => true,
        STICKY => false,
        other => {
            return Err(Error::Storage(format!(
                "{}: invalid id file flag 0x{:02x}",
                path.display(),
                other
            )));
        }
    };

    let mut freed_ids = Vec::with_capacity(buf.len() / 8);
    if clean {
        if buf.len() % 8 != 0 {
            return Err(Error::Storage(format!(
                "{}: {} trailing bytes after freed ids",
                path.display(),
                buf.len() % 8
            )));
        }
        while !buf.is_empty() {
            freed_ids.push(decode_u64(&mut buf)?);
        }
    }
    Ok(IdFileContents {
        high_id,
        freed_ids,
        clean,
    })
}

fn io_error(path: &Path, e: std::io::Error) -> Error {
    Error::Storage(format!("{}: {}", path.display(), e))
}
