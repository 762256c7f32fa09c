//! Search path and asset loader
//!
//! Logical asset paths resolve against an ordered list of search nodes:
//! plain game directories and the pack archives found inside them. Nodes
//! are prepended at registration time, so a directory registered later
//! shadows an earlier one, and within one directory `pak1.pak` shadows
//! `pak0.pak`, which in turn shadows loose files.
//!
//! Open files live in a small fixed table of handles. Reads out of a pack
//! share the pack's handle, which is why the loader's close is a no-op for
//! handles a pack owns.

use crate::cache::CacheUser;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::memory::Memory;
use crate::pack::Pack;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default capacity of the open-file table.
pub const MAX_FILE_HANDLES: usize = 10;

/// Which allocator receives a loaded asset. Expresses the caller's
/// lifetime intent, not a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDest {
    /// Permanent, lives until the level is rolled back.
    HunkLow,
    /// Scratch space, reused by the next temp allocation.
    HunkTemp,
    /// Small and dynamic, freed individually.
    Zone,
    /// Evictable; the user handle must be re-checked before every use.
    Cache(CacheUser),
    /// Transient staging for parse-and-discard loads.
    TempStack,
}

/// Fixed-capacity table of open OS files, addressed by index.
pub struct FileTable {
    slots: Vec<Option<File>>,
}

impl FileTable {
    pub fn new(capacity: usize) -> Self {
        FileTable {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Open `path` for reading into a free slot.
    ///
    /// Returns `Ok(None)` when the file cannot be opened; running out of
    /// slots is an error.
    pub fn open_read(&mut self, path: &Path) -> Result<Option<(usize, usize)>> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(EngineError::OutOfFileHandles)?;
        match File::open(path) {
            Ok(file) => {
                let length = file.metadata()?.len() as usize;
                self.slots[slot] = Some(file);
                Ok(Some((slot, length)))
            }
            Err(_) => Ok(None),
        }
    }

    pub fn seek(&mut self, handle: usize, position: u64) -> Result<()> {
        self.file_mut(handle)?.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    pub fn read_exact(&mut self, handle: usize, buf: &mut [u8]) -> Result<()> {
        self.file_mut(handle)?.read_exact(buf)?;
        Ok(())
    }

    /// Read up to `buf.len()` bytes, stopping early at end of file.
    /// Returns the number of bytes read. Member positions in a pack are
    /// trusted, so a stale directory entry reads short instead of failing.
    pub fn read_up_to(&mut self, handle: usize, buf: &mut [u8]) -> Result<usize> {
        let file = self.file_mut(handle)?;
        let mut done = 0;
        while done < buf.len() {
            let n = file.read(&mut buf[done..])?;
            if n == 0 {
                break;
            }
            done += n;
        }
        Ok(done)
    }

    /// Close the file in `handle` and free the slot.
    pub fn release(&mut self, handle: usize) {
        if let Some(slot) = self.slots.get_mut(handle) {
            *slot = None;
        }
    }

    /// Number of slots currently holding an open file.
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn file_mut(&mut self, handle: usize) -> Result<&mut File> {
        self.slots
            .get_mut(handle)
            .and_then(Option::as_mut)
            .ok_or(EngineError::BadFileHandle(handle))
    }
}

enum SearchNode {
    Directory(PathBuf),
    Pack(Pack),
}

/// The resolver: an open-file table plus the ordered search path.
pub struct FileSystem {
    table: FileTable,
    search: Vec<SearchNode>,
    game_dir: PathBuf,
    max_pack_entries: usize,
}

impl FileSystem {
    /// Build an empty file system. Verifies once that the host is
    /// little-endian, since pack files are.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        verify_little_endian()?;
        Ok(FileSystem {
            table: FileTable::new(config.max_file_handles),
            search: Vec::new(),
            game_dir: PathBuf::new(),
            max_pack_entries: config.max_pack_entries,
        })
    }

    /// Directory most recently registered; where writes would go.
    pub fn game_dir(&self) -> &Path {
        &self.game_dir
    }

    /// Register a game directory and every numbered pack inside it.
    ///
    /// The directory node goes in front of the existing search path, then
    /// `pak0.pak`, `pak1.pak`, … are each prepended in turn; the scan
    /// stops at the first number with no pack file.
    pub fn add_game_directory<P: AsRef<Path>>(&mut self, memory: &mut Memory, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        self.game_dir = dir.to_path_buf();
        self.search.insert(0, SearchNode::Directory(dir.to_path_buf()));

        for i in 0.. {
            let pak_path = dir.join(format!("pak{}.pak", i));
            match Pack::load(
                &pak_path,
                &mut self.table,
                memory.hunk_mut(),
                self.max_pack_entries,
            )? {
                Some(pack) => self.search.insert(0, SearchNode::Pack(pack)),
                None => break,
            }
        }

        info!(dir = %dir.display(), "game directory registered");
        Ok(())
    }

    /// Resolve a logical path against the search path, head first.
    ///
    /// On a hit returns the handle to read from (positioned at the start
    /// of the data) and the data length. Pack members share the pack's
    /// handle; loose files get a fresh one. Unopenable filesystem
    /// candidates are skipped, exhaustion of the search path is a miss.
    pub fn find(&mut self, memory: &Memory, logical: &str) -> Result<Option<(usize, usize)>> {
        for i in 0..self.search.len() {
            match &self.search[i] {
                SearchNode::Pack(pack) => {
                    if let Some((position, length)) = pack.find(memory.hunk().arena(), logical) {
                        let handle = pack.handle();
                        self.table.seek(handle, position)?;
                        return Ok(Some((handle, length)));
                    }
                }
                SearchNode::Directory(dir) => {
                    let candidate = dir.join(logical);
                    if let Some((handle, length)) = self.table.open_read(&candidate)? {
                        return Ok(Some((handle, length)));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Resolve `logical`, allocate room for it in the allocator `dest`
    /// names, and read it in.
    ///
    /// The allocation is one byte longer than the asset and that byte is
    /// set to zero, so text assets read as NUL-terminated strings. The
    /// backing block is named after the path's last segment. Returns the
    /// payload offset, or `Ok(None)` when the path resolves nowhere.
    pub fn load(
        &mut self,
        memory: &mut Memory,
        logical: &str,
        dest: LoadDest,
    ) -> Result<Option<usize>> {
        let Some((handle, length)) = self.find(memory, logical)? else {
            return Ok(None);
        };

        let name = base_name(logical);
        let payload = match dest {
            LoadDest::HunkLow => memory.hunk_mut().alloc_low(length + 1, &name)?,
            LoadDest::HunkTemp | LoadDest::TempStack => memory.hunk_mut().temp_alloc(length + 1)?,
            LoadDest::Zone => memory.zone_malloc(length + 1)?,
            LoadDest::Cache(user) => memory.cache_alloc(user, length + 1, &name)?,
        };

        self.table
            .read_up_to(handle, memory.bytes_mut(payload, length))?;
        memory.bytes_mut(payload, length + 1)[length] = 0;
        self.close(handle);

        debug!(path = logical, length, ?dest, "asset loaded");
        Ok(Some(payload))
    }

    /// Close a handle obtained from [`FileSystem::find`]. Handles owned
    /// by a pack stay open; everything else is released.
    pub fn close(&mut self, handle: usize) {
        let pack_owned = self.search.iter().any(|node| match node {
            SearchNode::Pack(pack) => pack.handle() == handle,
            SearchNode::Directory(_) => false,
        });
        if !pack_owned {
            self.table.release(handle);
        }
    }

    /// Number of file handles currently open (packs included).
    pub fn open_handles(&self) -> usize {
        self.table.open_count()
    }
}

/// Last path segment, truncated to the 15 characters a block name holds.
pub(crate) fn base_name(path: &str) -> String {
    let start = path.rfind(['/', '\\']).map(|i| i + 1).unwrap_or(0);
    let base = &path[start..];
    base.chars().take(15).collect()
}

/// Pack files store little-endian words; refuse to run on hosts that
/// disagree.
pub fn verify_little_endian() -> Result<()> {
    if u32::from_ne_bytes([1, 0, 0, 0]) != 1 {
        return Err(EngineError::BigEndianHost);
    }
    Ok(())
}
