//! LRU-evictable blobs between the two hunk stacks
//!
//! Cache blocks live in the free middle of the arena, between the low and
//! high hunk stacks. Two circular linked lists run through the in-band
//! block headers: one ordered by address (used to find gaps) and one by
//! recency (used to pick eviction victims). Both share a sentinel; the
//! sentinel's link words live in the [`Cache`] struct itself and the value
//! [`u32::MAX`] inside a link field denotes it.
//!
//! Cache memory is co-owned: the allocator may evict any block to satisfy
//! a new request, clearing the owning user's data slot. Holders must
//! re-check through [`Cache::check`] before every use.
//!
//! Block header layout (48 bytes, payloads 16-byte aligned):
//!
//! ```text
//! offset  size  field
//!   0     16    name      (15 chars + NUL)
//!  16      4    user      (owning user slot)
//!  20      4    prev      (address ring)
//!  24      4    next      (address ring)
//!  28      4    lru_prev  (recency ring)
//!  32      4    lru_next  (recency ring)
//!  36      4    size      (total, header included)
//!  40      8    pad
//! ```

use crate::arena::Arena;
use crate::error::{EngineError, Result};
use crate::hunk::{align16, Hunk};
use tracing::debug;

/// Bytes of header prefixed to every cache block.
pub const CACHE_HEADER_SIZE: usize = 48;

/// Link value standing in for the sentinel.
const NIL: u32 = u32::MAX;

const OFF_NAME: usize = 0;
const OFF_USER: usize = 16;
const OFF_PREV: usize = 20;
const OFF_NEXT: usize = 24;
const OFF_LRU_PREV: usize = 28;
const OFF_LRU_NEXT: usize = 32;
const OFF_SIZE: usize = 36;

/// Caller-owned handle to at most one cache block.
///
/// The handle itself never dangles; the block behind it can vanish at any
/// allocation, which is why every access goes through [`Cache::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheUser(usize);

/// The cache allocator: bookkeeping for both rings plus the user slots.
/// All block state lives in-band in the arena.
pub struct Cache {
    head_next: u32,
    head_prev: u32,
    head_lru_next: u32,
    head_lru_prev: u32,
    users: Vec<Option<usize>>,
}

impl Cache {
    pub fn new() -> Self {
        Cache {
            head_next: NIL,
            head_prev: NIL,
            head_lru_next: NIL,
            head_lru_prev: NIL,
            users: Vec::new(),
        }
    }

    /// Register a new user handle holding no block.
    pub fn new_user(&mut self) -> CacheUser {
        self.users.push(None);
        CacheUser(self.users.len() - 1)
    }

    /// Payload offset currently backing `user`, if any. Does not touch the
    /// recency ring; use [`Cache::check`] on the access path.
    pub fn user_data(&self, user: CacheUser) -> Option<usize> {
        self.users.get(user.0).copied().flatten()
    }

    /// True when no blocks are cached.
    pub fn is_empty(&self) -> bool {
        self.head_next == NIL
    }

    /// Attach a freshly allocated block of `size` bytes to `user`,
    /// evicting least-recently-used blocks until the request fits.
    ///
    /// Fails if the user already holds a block, and reports exhaustion
    /// once every cache block has been evicted and the request still does
    /// not fit between the stacks.
    pub fn alloc(&mut self, hunk: &mut Hunk, user: CacheUser, size: usize, name: &str) -> Result<usize> {
        if self.user_data(user).is_some() {
            return Err(EngineError::AlreadyCached);
        }
        if size == 0 {
            return Err(EngineError::InvalidSize("cache allocation of zero bytes"));
        }

        let rounded = align16(size + CACHE_HEADER_SIZE);
        loop {
            if let Some(block) = self.try_alloc(hunk, rounded) {
                let arena = hunk.arena_mut();
                arena.write_name(block as usize + OFF_NAME, name);
                arena.write_u32(block as usize + OFF_USER, user.0 as u32);
                let payload = block as usize + CACHE_HEADER_SIZE;
                self.users[user.0] = Some(payload);
                return Ok(payload);
            }

            if self.head_next == NIL {
                return Err(EngineError::OutOfMemory {
                    allocator: "cache",
                    requested: size,
                });
            }

            // evict the least recently used block and try again
            let victim = self.head_lru_prev;
            let owner = hunk.arena().read_u32(victim as usize + OFF_USER) as usize;
            debug!(
                victim = %hunk.arena().read_name(victim as usize + OFF_NAME),
                "cache eviction"
            );
            self.free(hunk.arena_mut(), CacheUser(owner))?;
        }
    }

    /// If `user` still holds a block, promote it to most recently used and
    /// return its payload offset.
    pub fn check(&mut self, arena: &mut Arena, user: CacheUser) -> Option<usize> {
        let payload = self.user_data(user)?;
        let block = (payload - CACHE_HEADER_SIZE) as u32;
        self.lru_unlink(arena, block);
        self.lru_link_front(arena, block);
        Some(payload)
    }

    /// Detach `user`'s block from both rings and clear the handle.
    pub fn free(&mut self, arena: &mut Arena, user: CacheUser) -> Result<()> {
        let payload = self.user_data(user).ok_or(EngineError::NotCached)?;
        let block = (payload - CACHE_HEADER_SIZE) as u32;

        let prev = self.prev_of(arena, block);
        let next = self.next_of(arena, block);
        self.set_next(arena, prev, next);
        self.set_prev(arena, next, prev);

        self.lru_unlink(arena, block);
        self.users[user.0] = None;
        Ok(())
    }

    /// Drop every cache block and clear every user handle.
    pub fn flush_all(&mut self) {
        for slot in &mut self.users {
            *slot = None;
        }
        self.head_next = NIL;
        self.head_prev = NIL;
        self.head_lru_next = NIL;
        self.head_lru_prev = NIL;
    }

    /// Search the address-ordered ring for a gap wide enough for a block
    /// of `rounded` bytes. On success the block is linked into both rings
    /// with a zeroed header and its size recorded.
    fn try_alloc(&mut self, hunk: &mut Hunk, rounded: usize) -> Option<u32> {
        let low = hunk.low_used();
        let high_base = hunk.total_size() - hunk.high_used();

        if self.head_next == NIL {
            if high_base - low < rounded {
                return None;
            }
            let block = low as u32;
            let arena = hunk.arena_mut();
            arena.fill(low, CACHE_HEADER_SIZE, 0);
            arena.write_u32(low + OFF_SIZE, rounded as u32);
            self.set_prev(arena, block, NIL);
            self.set_next(arena, block, NIL);
            self.head_next = block;
            self.head_prev = block;
            self.lru_link_front(arena, block);
            return Some(block);
        }

        // walk the caches in address order looking for a hole; blocks the
        // low stack has since grown past just advance the candidate
        let mut candidate = low;
        let mut cursor = self.head_next;
        while cursor != NIL {
            let cursor_off = cursor as usize;
            if cursor_off >= candidate && cursor_off - candidate >= rounded {
                return Some(self.place_before(hunk.arena_mut(), candidate, rounded, cursor));
            }
            candidate = candidate.max(cursor_off + self.size_of(hunk.arena(), cursor));
            cursor = self.next_of(hunk.arena(), cursor);
        }

        // no hole between caches; try the tail gap below the high stack
        if high_base >= candidate + rounded {
            return Some(self.place_before(hunk.arena_mut(), candidate, rounded, NIL));
        }

        None
    }

    /// Write a zeroed header at `at` and link it into the address ring
    /// immediately before `successor` (NIL appends at the tail), then mark
    /// it most recently used.
    fn place_before(&mut self, arena: &mut Arena, at: usize, rounded: usize, successor: u32) -> u32 {
        let block = at as u32;
        arena.fill(at, CACHE_HEADER_SIZE, 0);
        arena.write_u32(at + OFF_SIZE, rounded as u32);

        let prev = self.prev_of(arena, successor);
        self.set_next(arena, prev, block);
        self.set_prev(arena, block, prev);
        self.set_next(arena, block, successor);
        self.set_prev(arena, successor, block);

        self.lru_link_front(arena, block);
        block
    }

    /// Verify both rings against the current stack bounds: address order,
    /// containment, non-overlap, ring symmetry, identical membership and
    /// user back-pointers.
    pub fn validate(&self, arena: &Arena, low: usize, high_base: usize) -> Result<()> {
        let mut members = Vec::new();
        let mut last_end = low;
        let mut cursor = self.head_next;
        let mut steps = 0;

        while cursor != NIL {
            steps += 1;
            if steps > arena.len() / CACHE_HEADER_SIZE {
                return Err(EngineError::Corruption("cache ring does not close"));
            }
            let off = cursor as usize;
            if off < last_end {
                return Err(EngineError::Corruption(
                    "cache blocks out of order or overlapping",
                ));
            }
            let size = self.size_of(arena, cursor);
            if size < CACHE_HEADER_SIZE || off + size > high_base {
                return Err(EngineError::Corruption("cache block outside the free middle"));
            }
            let owner = arena.read_u32(off + OFF_USER) as usize;
            if self.users.get(owner).copied().flatten() != Some(off + CACHE_HEADER_SIZE) {
                return Err(EngineError::Corruption(
                    "cache user does not point at its block",
                ));
            }
            let next = self.next_of(arena, cursor);
            if self.prev_of(arena, next) != cursor {
                return Err(EngineError::Corruption("cache ring links are asymmetric"));
            }
            members.push(cursor);
            last_end = off + size;
            cursor = next;
        }

        // recency ring must contain exactly the same blocks
        let mut recency = Vec::new();
        cursor = self.head_lru_next;
        let mut steps = 0;
        while cursor != NIL {
            steps += 1;
            if steps > members.len() {
                return Err(EngineError::Corruption("cache recency ring does not close"));
            }
            recency.push(cursor);
            cursor = self.lru_next_of(arena, cursor);
        }
        let mut sorted_members = members.clone();
        sorted_members.sort_unstable();
        recency.sort_unstable();
        if sorted_members != recency {
            return Err(EngineError::Corruption(
                "cache rings disagree about membership",
            ));
        }
        Ok(())
    }

    fn lru_unlink(&mut self, arena: &mut Arena, block: u32) {
        let prev = self.lru_prev_of(arena, block);
        let next = self.lru_next_of(arena, block);
        self.set_lru_next(arena, prev, next);
        self.set_lru_prev(arena, next, prev);
    }

    fn lru_link_front(&mut self, arena: &mut Arena, block: u32) {
        let first = self.head_lru_next;
        self.set_lru_prev(arena, first, block);
        self.set_lru_next(arena, block, first);
        self.set_lru_prev(arena, block, NIL);
        self.head_lru_next = block;
    }

    fn size_of(&self, arena: &Arena, block: u32) -> usize {
        arena.read_u32(block as usize + OFF_SIZE) as usize
    }

    fn prev_of(&self, arena: &Arena, block: u32) -> u32 {
        if block == NIL {
            self.head_prev
        } else {
            arena.read_u32(block as usize + OFF_PREV)
        }
    }

    fn next_of(&self, arena: &Arena, block: u32) -> u32 {
        if block == NIL {
            self.head_next
        } else {
            arena.read_u32(block as usize + OFF_NEXT)
        }
    }

    fn set_prev(&mut self, arena: &mut Arena, block: u32, value: u32) {
        if block == NIL {
            self.head_prev = value;
        } else {
            arena.write_u32(block as usize + OFF_PREV, value);
        }
    }

    fn set_next(&mut self, arena: &mut Arena, block: u32, value: u32) {
        if block == NIL {
            self.head_next = value;
        } else {
            arena.write_u32(block as usize + OFF_NEXT, value);
        }
    }

    fn lru_prev_of(&self, arena: &Arena, block: u32) -> u32 {
        if block == NIL {
            self.head_lru_prev
        } else {
            arena.read_u32(block as usize + OFF_LRU_PREV)
        }
    }

    fn lru_next_of(&self, arena: &Arena, block: u32) -> u32 {
        if block == NIL {
            self.head_lru_next
        } else {
            arena.read_u32(block as usize + OFF_LRU_NEXT)
        }
    }

    fn set_lru_prev(&mut self, arena: &mut Arena, block: u32, value: u32) {
        if block == NIL {
            self.head_lru_prev = value;
        } else {
            arena.write_u32(block as usize + OFF_LRU_PREV, value);
        }
    }

    fn set_lru_next(&mut self, arena: &mut Arena, block: u32, value: u32) {
        if block == NIL {
            self.head_lru_next = value;
        } else {
            arena.write_u32(block as usize + OFF_LRU_NEXT, value);
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}
