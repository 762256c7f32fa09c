//! The engine context
//!
//! One record owning the memory system, the file system and the console
//! variables, with a single `init` entry point. Hosts thread this through
//! their call sites instead of touching process-wide globals.

use crate::config::EngineConfig;
use crate::cvar::{CvarId, Cvars};
use crate::error::Result;
use crate::files::{FileSystem, LoadDest};
use crate::memory::Memory;
use std::path::Path;

/// Memory, file resolution and console variables behind one handle.
pub struct Engine {
    pub memory: Memory,
    pub files: FileSystem,
    pub cvars: Cvars,
}

impl Engine {
    /// Bring the whole foundation up from a configuration. The host
    /// endianness check runs before the buffer is allocated.
    pub fn init(config: &EngineConfig) -> Result<Engine> {
        let files = FileSystem::new(config)?;
        let memory = Memory::with_config(config)?;
        Ok(Engine {
            memory,
            files,
            cvars: Cvars::new(),
        })
    }

    /// Register a game directory and its packs; later registrations
    /// shadow earlier ones.
    pub fn add_game_directory<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        self.files.add_game_directory(&mut self.memory, dir)
    }

    /// Load an asset into the allocator `dest` names. `Ok(None)` when the
    /// path resolves nowhere.
    pub fn load(&mut self, logical: &str, dest: LoadDest) -> Result<Option<usize>> {
        self.files.load(&mut self.memory, logical, dest)
    }

    /// Borrow a loaded asset's bytes.
    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        self.memory.bytes(offset, len)
    }

    pub fn cvar_get(&mut self, name: &str) -> Result<CvarId> {
        self.cvars.get(&mut self.memory, name)
    }

    pub fn cvar_set(&mut self, name: &str, value: f32) -> Result<CvarId> {
        self.cvars.set(&mut self.memory, name, value)
    }

    pub fn cvar_value(&self, id: CvarId) -> f32 {
        self.cvars.value(id)
    }
}
