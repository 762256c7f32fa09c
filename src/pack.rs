//! Pack archive reader
//!
//! A pack file is a read-only concatenation of member files with a trailing
//! directory, located by a 12-byte header:
//!
//! ```text
//! offset  size  field
//!   0      4    magic            = "PACK"
//!   4      4    directory_offset (u32 LE)
//!   8      4    directory_length (u32 LE)
//! ```
//!
//! The directory is an array of 64-byte entries: a 56-byte NUL-padded name,
//! a u32 LE file position and a u32 LE file length. The whole directory is
//! read once at load time and normalized into hunk low memory, where it
//! stays for the life of the engine; member reads share the pack's file
//! handle. Names keep the full 56-byte width in memory.
//!
//! Positions and lengths are trusted once parsed; reads past the end of
//! the file just come back short.

use crate::arena::Arena;
use crate::error::{EngineError, Result};
use crate::files::FileTable;
use crate::hunk::Hunk;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The four bytes every pack file starts with.
pub const PACK_MAGIC: [u8; 4] = *b"PACK";

/// Size of the on-disk pack header.
pub const PACK_HEADER_SIZE: usize = 12;

/// Size of one directory entry, on disk and in memory.
pub const PACK_ENTRY_SIZE: usize = 64;

/// Width of the name field inside a directory entry.
pub const PACK_NAME_LEN: usize = 56;

/// Default cap on directory entries accepted in one pack.
pub const MAX_FILES_IN_PACK: usize = 2048;

/// Directory entry count of the stock pak0; anything else marks the
/// archive as modified. Purely informational.
const STOCK_PAK0_ENTRIES: usize = 339;

const ENTRY_OFF_POSITION: usize = 56;
const ENTRY_OFF_LENGTH: usize = 60;

/// An opened pack archive: its shared file handle plus the directory
/// entries resident in hunk low memory.
pub struct Pack {
    path: PathBuf,
    handle: usize,
    count: usize,
    entries: usize,
    modified: bool,
}

impl Pack {
    /// Open and parse a pack file.
    ///
    /// Returns `Ok(None)` when the file cannot be opened (the caller stops
    /// scanning for numbered packs at the first hole). A present file with
    /// a bad magic or an oversized directory is a hard error.
    pub fn load(
        path: &Path,
        table: &mut FileTable,
        hunk: &mut Hunk,
        max_entries: usize,
    ) -> Result<Option<Pack>> {
        let Some((handle, _file_len)) = table.open_read(path)? else {
            return Ok(None);
        };

        let mut header = [0u8; PACK_HEADER_SIZE];
        if let Err(e) = table.read_exact(handle, &mut header) {
            table.release(handle);
            return Err(e);
        }
        if header[0..4] != PACK_MAGIC {
            table.release(handle);
            return Err(EngineError::InvalidMagic(path.to_path_buf()));
        }

        let dir_offset = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as u64;
        let dir_length =
            u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
        let count = dir_length / PACK_ENTRY_SIZE;

        if count > max_entries {
            table.release(handle);
            return Err(EngineError::TooManyEntries {
                path: path.to_path_buf(),
                count,
            });
        }

        let modified = count != STOCK_PAK0_ENTRIES;
        if modified {
            warn!(path = %path.display(), count, "pack differs from the stock directory");
        }

        let mut directory = vec![0u8; count * PACK_ENTRY_SIZE];
        let read = (|| -> Result<()> {
            table.seek(handle, dir_offset)?;
            table.read_exact(handle, &mut directory)
        })();
        if let Err(e) = read {
            table.release(handle);
            return Err(e);
        }

        let entries = match hunk.alloc_low(count * PACK_ENTRY_SIZE, "packentries") {
            Ok(off) => off,
            Err(e) => {
                table.release(handle);
                return Err(e);
            }
        };

        // Normalize each entry: name copied up to its NUL and zero-padded,
        // position and length kept little-endian.
        for i in 0..count {
            let src = &directory[i * PACK_ENTRY_SIZE..(i + 1) * PACK_ENTRY_SIZE];
            let dst_off = entries + i * PACK_ENTRY_SIZE;
            let name_end = src[..PACK_NAME_LEN]
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(PACK_NAME_LEN);
            let dst = hunk.arena_mut().bytes_mut(dst_off, PACK_ENTRY_SIZE);
            dst.fill(0);
            dst[..name_end].copy_from_slice(&src[..name_end]);
            dst[ENTRY_OFF_POSITION..ENTRY_OFF_POSITION + 4]
                .copy_from_slice(&src[ENTRY_OFF_POSITION..ENTRY_OFF_POSITION + 4]);
            dst[ENTRY_OFF_LENGTH..ENTRY_OFF_LENGTH + 4]
                .copy_from_slice(&src[ENTRY_OFF_LENGTH..ENTRY_OFF_LENGTH + 4]);
        }

        info!(path = %path.display(), count, "added pack file");

        Ok(Some(Pack {
            path: path.to_path_buf(),
            handle,
            count,
            entries,
            modified,
        }))
    }

    /// Linear-scan the directory for `name`; on a hit return the member's
    /// position and length within the pack file.
    pub fn find(&self, arena: &Arena, name: &str) -> Option<(u64, usize)> {
        let wanted = name.as_bytes();
        if wanted.len() > PACK_NAME_LEN {
            return None;
        }
        for i in 0..self.count {
            let off = self.entries + i * PACK_ENTRY_SIZE;
            let stored = arena.bytes(off, PACK_NAME_LEN);
            let matches = stored[..wanted.len()] == *wanted
                && (wanted.len() == PACK_NAME_LEN || stored[wanted.len()] == 0);
            if matches {
                let position = arena.read_u32(off + ENTRY_OFF_POSITION) as u64;
                let length = arena.read_u32(off + ENTRY_OFF_LENGTH) as usize;
                return Some((position, length));
            }
        }
        None
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index of the pack's shared handle in the open-file table.
    pub fn handle(&self) -> usize {
        self.handle
    }

    /// Number of directory entries.
    pub fn count(&self) -> usize {
        self.count
    }

    /// True when the entry count differs from the stock archive.
    pub fn modified(&self) -> bool {
        self.modified
    }

    /// Name of entry `i`, read back out of hunk memory.
    pub fn entry_name(&self, arena: &Arena, i: usize) -> String {
        let off = self.entries + i * PACK_ENTRY_SIZE;
        let field = arena.bytes(off, PACK_NAME_LEN);
        let end = field.iter().position(|&b| b == 0).unwrap_or(PACK_NAME_LEN);
        String::from_utf8_lossy(&field[..end]).into_owned()
    }

    /// File position of entry `i`.
    pub fn entry_position(&self, arena: &Arena, i: usize) -> u32 {
        arena.read_u32(self.entries + i * PACK_ENTRY_SIZE + ENTRY_OFF_POSITION)
    }

    /// File length of entry `i`.
    pub fn entry_length(&self, arena: &Arena, i: usize) -> u32 {
        arena.read_u32(self.entries + i * PACK_ENTRY_SIZE + ENTRY_OFF_LENGTH)
    }
}

/// Serialize a pack file image from `(name, bytes)` members. Test helper
/// for everything above the reader; mirrors the on-disk layout exactly.
#[cfg(test)]
pub(crate) fn build_pack(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut data = Vec::new();
    let mut entries = Vec::new();
    let mut position = PACK_HEADER_SIZE;

    for (name, bytes) in members {
        data.extend_from_slice(bytes);
        let mut entry = [0u8; PACK_ENTRY_SIZE];
        let n = name.len().min(PACK_NAME_LEN);
        entry[..n].copy_from_slice(&name.as_bytes()[..n]);
        entry[ENTRY_OFF_POSITION..ENTRY_OFF_POSITION + 4]
            .copy_from_slice(&(position as u32).to_le_bytes());
        entry[ENTRY_OFF_LENGTH..ENTRY_OFF_LENGTH + 4]
            .copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        entries.push(entry);
        position += bytes.len();
    }

    let dir_offset = (PACK_HEADER_SIZE + data.len()) as u32;
    let dir_length = (entries.len() * PACK_ENTRY_SIZE) as u32;

    let mut image = Vec::new();
    image.extend_from_slice(&PACK_MAGIC);
    image.extend_from_slice(&dir_offset.to_le_bytes());
    image.extend_from_slice(&dir_length.to_le_bytes());
    image.extend_from_slice(&data);
    for entry in &entries {
        image.extend_from_slice(entry);
    }
    image
}
