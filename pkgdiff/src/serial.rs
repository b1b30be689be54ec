//! Changelog checkpoint persistence
//!
//! The checkpoint is a single decimal serial, stored as the sole
//! content of a file. It is read once at run start and written once at
//! run end, always with the serial observed as current at the start.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::{Error, Result};

/// Read the persisted serial.
///
/// A missing or unreadable file is not an error; the caller falls back
/// to querying the registry for the current serial.
pub fn read(path: &Path) -> Option<u64> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse().ok()
}

/// Persist a serial, replacing any previous checkpoint.
///
/// Writes to a temporary file in the target directory and renames it
/// into place, so a crash mid-write never leaves a torn checkpoint.
pub fn write(path: &Path, serial: u64) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(serial.to_string().as_bytes())?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
