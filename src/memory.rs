//! The engine's memory context
//!
//! One record owns all three allocators and the buffer they share:
//! the hunk wraps the arena, the zone slab is the first low-hunk
//! allocation, and the cache lives in whatever is left between the two
//! stacks. Everything that allocates threads a `&mut Memory` rather than
//! reaching for globals.

use crate::cache::{Cache, CacheUser};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::hunk::Hunk;
use crate::zone::Zone;
use tracing::info;

/// Hunk, zone and cache over one buffer.
pub struct Memory {
    hunk: Hunk,
    zone: Zone,
    cache: Cache,
}

impl Memory {
    /// Build the memory system over a fresh buffer of `hunk_size` bytes,
    /// carving a `zone_size` slab for small allocations.
    pub fn init(hunk_size: usize, zone_size: usize) -> Result<Self> {
        let mut hunk = Hunk::new(hunk_size);
        let zone = Zone::new(&mut hunk, zone_size)?;
        info!(hunk_size, zone_size, "memory system initialized");
        Ok(Memory {
            hunk,
            zone,
            cache: Cache::new(),
        })
    }

    pub fn with_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Self::init(config.hunk_size, config.zone_size)
    }

    pub fn hunk(&self) -> &Hunk {
        &self.hunk
    }

    pub fn hunk_mut(&mut self) -> &mut Hunk {
        &mut self.hunk
    }

    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    /// Borrow `len` payload bytes at `offset`.
    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        self.hunk.arena().bytes(offset, len)
    }

    /// Mutably borrow `len` payload bytes at `offset`.
    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        self.hunk.arena_mut().bytes_mut(offset, len)
    }

    pub fn zone_malloc(&mut self, size: usize) -> Result<usize> {
        self.zone.malloc(self.hunk.arena_mut(), size)
    }

    pub fn zone_tag_malloc(&mut self, size: usize, tag: u32) -> Result<Option<usize>> {
        self.zone.tag_malloc(self.hunk.arena_mut(), size, tag)
    }

    pub fn zone_free(&mut self, payload: usize) -> Result<()> {
        self.zone.free(self.hunk.arena_mut(), payload)
    }

    pub fn zone_check(&self) -> Result<()> {
        self.zone.check_heap(self.hunk.arena())
    }

    pub fn cache_new_user(&mut self) -> CacheUser {
        self.cache.new_user()
    }

    pub fn cache_alloc(&mut self, user: CacheUser, size: usize, name: &str) -> Result<usize> {
        self.cache.alloc(&mut self.hunk, user, size, name)
    }

    pub fn cache_check(&mut self, user: CacheUser) -> Option<usize> {
        self.cache.check(self.hunk.arena_mut(), user)
    }

    pub fn cache_free(&mut self, user: CacheUser) -> Result<()> {
        self.cache.free(self.hunk.arena_mut(), user)
    }

    pub fn cache_flush_all(&mut self) {
        self.cache.flush_all();
    }

    pub fn cache_user_data(&self, user: CacheUser) -> Option<usize> {
        self.cache.user_data(user)
    }

    /// Run every structural check: hunk headers, zone ring, cache rings.
    pub fn validate(&self) -> Result<()> {
        self.hunk.check()?;
        self.zone.check_heap(self.hunk.arena())?;
        self.cache.validate(
            self.hunk.arena(),
            self.hunk.low_used(),
            self.hunk.total_size() - self.hunk.high_used(),
        )
    }
}
