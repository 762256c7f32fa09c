//! Small-block heap inside a hunk slab
//!
//! The zone serves small dynamic allocations (strings, console variables)
//! so they do not chew through hunk space. Its backing store is a single
//! low-hunk allocation; inside it, a circular doubly linked list of block
//! headers covers every byte of the slab. Links are arena offsets, never
//! pointers.
//!
//! A sentinel node at the start of the slab stores no payload and is
//! permanently tagged as allocated, so coalescing can never cross the
//! wraparound. The rover remembers where the last allocation ended and the
//! next search starts.
//!
//! Block header layout (24 bytes, payloads 8-byte aligned):
//!
//! ```text
//! offset  size  field
//!   0      4    size   (total, header included)
//!   4      4    tag    (0 = free)
//!   8      4    id     (always ZONE_ID)
//!  12      4    prev   (arena offset)
//!  16      4    next   (arena offset)
//!  20      4    pad
//! ```

use crate::arena::Arena;
use crate::error::{EngineError, Result};
use crate::hunk::Hunk;

/// Identity word stamped into every zone block header, and into the last
/// four bytes of every used block as a write-past-end detector.
pub const ZONE_ID: u32 = 0x001d_4a11;

/// Default slab size (128 KiB).
pub const DEFAULT_ZONE_SIZE: usize = 128 * 1024;

/// A free block is only split when the leftover would exceed this many
/// bytes; smaller remainders stay attached to the allocation.
pub const MIN_FRAGMENT: usize = 64;

/// Bytes of header prefixed to every zone block.
pub const ZONE_HEADER_SIZE: usize = 24;

const TAIL_WORD: usize = 4;

const OFF_SIZE: usize = 0;
const OFF_TAG: usize = 4;
const OFF_ID: usize = 8;
const OFF_PREV: usize = 12;
const OFF_NEXT: usize = 16;

fn align8(v: usize) -> usize {
    (v + 7) & !7
}

/// A snapshot of one ring node, in address order. Produced by
/// [`Zone::blocks`] for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneBlock {
    /// Arena offset of the block header.
    pub offset: usize,
    /// Total block size, header included.
    pub size: usize,
    /// Allocation tag; 0 means free.
    pub tag: u32,
}

/// The small-block allocator. Holds only its own bookkeeping; all block
/// state lives in-band in the arena.
pub struct Zone {
    slab: usize,
    size: usize,
    rover: usize,
}

impl Zone {
    /// Carve a `size`-byte slab out of the low hunk and format it as one
    /// free block behind the sentinel.
    pub fn new(hunk: &mut Hunk, size: usize) -> Result<Zone> {
        if size < 2 * ZONE_HEADER_SIZE + TAIL_WORD {
            return Err(EngineError::InvalidSize("zone slab too small for a block"));
        }
        let slab = hunk.alloc_low(size, "zone")?;
        let mut zone = Zone {
            slab,
            size,
            rover: 0,
        };
        zone.clear(hunk.arena_mut());
        Ok(zone)
    }

    /// Reset the slab to a single free block. Every outstanding allocation
    /// is forgotten.
    pub fn clear(&mut self, arena: &mut Arena) {
        let sentinel = self.slab;
        let first = self.slab + ZONE_HEADER_SIZE;

        arena.write_u32(sentinel + OFF_SIZE, 0);
        arena.write_u32(sentinel + OFF_TAG, 1);
        arena.write_u32(sentinel + OFF_ID, ZONE_ID);
        arena.write_u32(sentinel + OFF_PREV, first as u32);
        arena.write_u32(sentinel + OFF_NEXT, first as u32);

        arena.write_u32(first + OFF_SIZE, (self.size - ZONE_HEADER_SIZE) as u32);
        arena.write_u32(first + OFF_TAG, 0);
        arena.write_u32(first + OFF_ID, ZONE_ID);
        arena.write_u32(first + OFF_PREV, sentinel as u32);
        arena.write_u32(first + OFF_NEXT, sentinel as u32);

        self.rover = first;
    }

    /// Allocate with the default tag. Exhaustion is an error here; callers
    /// that want to handle a full zone use [`Zone::tag_malloc`].
    pub fn malloc(&mut self, arena: &mut Arena, size: usize) -> Result<usize> {
        match self.tag_malloc(arena, size, 1)? {
            Some(payload) => Ok(payload),
            None => Err(EngineError::OutOfMemory {
                allocator: "zone",
                requested: size,
            }),
        }
    }

    /// Allocate `size` bytes under a caller-owned tag (`tag != 0`),
    /// returning `Ok(None)` when no free block is large enough.
    pub fn tag_malloc(&mut self, arena: &mut Arena, size: usize, tag: u32) -> Result<Option<usize>> {
        if tag == 0 {
            return Err(EngineError::ReservedTag);
        }

        #[cfg(debug_assertions)]
        self.check_heap(arena)?;

        let rounded = align8(size + ZONE_HEADER_SIZE + TAIL_WORD);

        // One full circuit from the rover; rover.prev is the stop marker.
        let stop = self.prev_of(arena, self.rover);
        let mut candidate = self.rover;
        loop {
            if candidate == stop {
                return Ok(None);
            }
            if self.tag_of(arena, candidate) == 0 && self.size_of(arena, candidate) >= rounded {
                break;
            }
            candidate = self.next_of(arena, candidate);
        }

        let extra = self.size_of(arena, candidate) - rounded;
        if extra > MIN_FRAGMENT {
            let fragment = candidate + rounded;
            arena.write_u32(fragment + OFF_SIZE, extra as u32);
            arena.write_u32(fragment + OFF_TAG, 0);
            arena.write_u32(fragment + OFF_ID, ZONE_ID);

            let after = self.next_of(arena, candidate);
            self.set_prev(arena, after, fragment);
            self.set_next(arena, fragment, after);
            self.set_next(arena, candidate, fragment);
            self.set_prev(arena, fragment, candidate);

            arena.write_u32(candidate + OFF_SIZE, rounded as u32);
        }

        arena.write_u32(candidate + OFF_TAG, tag);
        arena.write_u32(candidate + OFF_ID, ZONE_ID);

        // next search starts just past this block
        self.rover = self.next_of(arena, candidate);

        // trash detector at the tail of the block
        let total = self.size_of(arena, candidate);
        arena.write_u32(candidate + total - TAIL_WORD, ZONE_ID);

        Ok(Some(candidate + ZONE_HEADER_SIZE))
    }

    /// Return a block to the free pool, coalescing with free neighbors.
    /// The rover is left on the resulting free block, so the next search
    /// begins at the hole this free just opened.
    pub fn free(&mut self, arena: &mut Arena, payload: usize) -> Result<()> {
        if payload < self.slab + 2 * ZONE_HEADER_SIZE || payload >= self.slab + self.size {
            return Err(EngineError::Corruption("free of an address outside the zone"));
        }
        let mut block = payload - ZONE_HEADER_SIZE;
        if self.id_of(arena, block) != ZONE_ID {
            return Err(EngineError::Corruption("zone block without zone id"));
        }
        if self.tag_of(arena, block) == 0 {
            return Err(EngineError::Corruption("double free of a zone block"));
        }

        arena.write_u32(block + OFF_TAG, 0);

        let prev = self.prev_of(arena, block);
        if self.tag_of(arena, prev) == 0 {
            let next = self.next_of(arena, block);
            self.set_next(arena, prev, next);
            self.set_prev(arena, next, prev);
            let merged = self.size_of(arena, prev) + self.size_of(arena, block);
            arena.write_u32(prev + OFF_SIZE, merged as u32);
            block = prev;
        }

        let next = self.next_of(arena, block);
        if self.tag_of(arena, next) == 0 {
            let after = self.next_of(arena, next);
            self.set_next(arena, block, after);
            self.set_prev(arena, after, block);
            let merged = self.size_of(arena, block) + self.size_of(arena, next);
            arena.write_u32(block + OFF_SIZE, merged as u32);
        }

        self.rover = block;
        Ok(())
    }

    /// Walk the whole ring and verify it: link symmetry, size arithmetic,
    /// identity words, and the no-two-adjacent-frees invariant.
    pub fn check_heap(&self, arena: &Arena) -> Result<()> {
        let sentinel = self.slab;
        let slab_end = self.slab + self.size;
        let mut covered = ZONE_HEADER_SIZE; // sentinel span
        let mut steps = 0;

        let mut block = self.next_of(arena, sentinel);
        while block != sentinel {
            steps += 1;
            if steps > self.size / ZONE_HEADER_SIZE {
                return Err(EngineError::Corruption("zone ring does not close"));
            }
            if block < self.slab + ZONE_HEADER_SIZE || block + ZONE_HEADER_SIZE > slab_end {
                return Err(EngineError::Corruption("zone link outside the slab"));
            }
            if self.id_of(arena, block) != ZONE_ID {
                return Err(EngineError::Corruption("zone block without zone id"));
            }
            let size = self.size_of(arena, block);
            if size < ZONE_HEADER_SIZE || block + size > slab_end {
                return Err(EngineError::Corruption("zone block size out of range"));
            }
            let next = self.next_of(arena, block);
            if next == sentinel {
                if block + size != slab_end {
                    return Err(EngineError::Corruption(
                        "last zone block does not reach the slab end",
                    ));
                }
            } else if block + size != next {
                return Err(EngineError::Corruption(
                    "zone block size does not reach the next block",
                ));
            }
            if self.prev_of(arena, next) != block {
                return Err(EngineError::Corruption("zone ring links are asymmetric"));
            }
            if self.tag_of(arena, block) == 0 && self.tag_of(arena, next) == 0 {
                return Err(EngineError::Corruption("two consecutive free zone blocks"));
            }
            covered += size;
            block = next;
        }

        if covered != self.size {
            return Err(EngineError::Corruption(
                "zone blocks do not sum to the slab size",
            ));
        }
        Ok(())
    }

    /// Snapshot the ring in address order, sentinel excluded.
    pub fn blocks(&self, arena: &Arena) -> Result<Vec<ZoneBlock>> {
        self.check_heap(arena)?;
        let mut out = Vec::new();
        let mut block = self.next_of(arena, self.slab);
        while block != self.slab {
            out.push(ZoneBlock {
                offset: block,
                size: self.size_of(arena, block),
                tag: self.tag_of(arena, block),
            });
            block = self.next_of(arena, block);
        }
        Ok(out)
    }

    /// Arena offset of the slab (the sentinel header).
    pub fn slab_offset(&self) -> usize {
        self.slab
    }

    /// Slab size in bytes.
    pub fn slab_size(&self) -> usize {
        self.size
    }

    /// Current rover position (a block header offset).
    pub fn rover(&self) -> usize {
        self.rover
    }

    fn size_of(&self, arena: &Arena, block: usize) -> usize {
        arena.read_u32(block + OFF_SIZE) as usize
    }

    fn tag_of(&self, arena: &Arena, block: usize) -> u32 {
        arena.read_u32(block + OFF_TAG)
    }

    fn id_of(&self, arena: &Arena, block: usize) -> u32 {
        arena.read_u32(block + OFF_ID)
    }

    fn prev_of(&self, arena: &Arena, block: usize) -> usize {
        arena.read_u32(block + OFF_PREV) as usize
    }

    fn next_of(&self, arena: &Arena, block: usize) -> usize {
        arena.read_u32(block + OFF_NEXT) as usize
    }

    fn set_prev(&self, arena: &mut Arena, block: usize, value: usize) {
        arena.write_u32(block + OFF_PREV, value as u32);
    }

    fn set_next(&self, arena: &mut Arena, block: usize, value: usize) {
        arena.write_u32(block + OFF_NEXT, value as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(zone_size: usize) -> (Hunk, Zone) {
        let mut hunk = Hunk::new(zone_size + 4096);
        let zone = Zone::new(&mut hunk, zone_size).unwrap();
        (hunk, zone)
    }

    #[test]
    fn test_fresh_zone_is_one_free_block() {
        let (hunk, zone) = fixture(1024);
        let blocks = zone.blocks(hunk.arena()).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].size, 1024 - ZONE_HEADER_SIZE);
        assert_eq!(blocks[0].tag, 0);
    }

    #[test]
    fn test_payloads_are_eight_byte_aligned() {
        let (mut hunk, mut zone) = fixture(4096);
        for size in [1, 7, 13, 100] {
            let p = zone.malloc(hunk.arena_mut(), size).unwrap();
            assert_eq!(p % 8, 0, "payload for size {} misaligned", size);
        }
    }

    #[test]
    fn test_first_hole_is_reused_and_rover_advances() {
        let (mut hunk, mut zone) = fixture(8192);

        let p1 = zone.malloc(hunk.arena_mut(), 100).unwrap();
        let p2 = zone.malloc(hunk.arena_mut(), 200).unwrap();
        zone.free(hunk.arena_mut(), p1).unwrap();

        // ring: [free 128][used 200+overhead][free remainder]
        let blocks = zone.blocks(hunk.arena()).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].size, 128);
        assert_eq!(blocks[0].tag, 0);
        assert_eq!(blocks[1].size, 232);
        assert_ne!(blocks[1].tag, 0);
        assert_eq!(blocks[2].tag, 0);

        // the 50-byte request lands in the first hole, not the tail
        let p3 = zone.malloc(hunk.arena_mut(), 50).unwrap();
        assert_eq!(p3, p1);
        // rover moved past the hole onto the following block
        assert_eq!(zone.rover(), p2 - ZONE_HEADER_SIZE);
    }

    #[test]
    fn test_free_restores_ring_shape() {
        let (mut hunk, mut zone) = fixture(4096);
        zone.malloc(hunk.arena_mut(), 64).unwrap();
        let before = zone.blocks(hunk.arena()).unwrap();

        let p = zone.malloc(hunk.arena_mut(), 500).unwrap();
        zone.free(hunk.arena_mut(), p).unwrap();

        let after = zone.blocks(hunk.arena()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_whole_slab_allocation() {
        let (mut hunk, mut zone) = fixture(4096);
        // overhead: sentinel header, block header and the tail word
        let largest = 4096 - 2 * ZONE_HEADER_SIZE - 4;
        let p = zone.malloc(hunk.arena_mut(), largest).unwrap();
        assert_eq!(p, zone.slab_offset() + 2 * ZONE_HEADER_SIZE);

        // slab is now exhausted
        let second = zone.tag_malloc(hunk.arena_mut(), 1, 1).unwrap();
        assert!(second.is_none());
        assert!(matches!(
            zone.malloc(hunk.arena_mut(), 1),
            Err(EngineError::OutOfMemory { .. })
        ));

        zone.free(hunk.arena_mut(), p).unwrap();
        zone.malloc(hunk.arena_mut(), largest).unwrap();
    }

    #[test]
    fn test_split_policy_is_strict() {
        // extra == MIN_FRAGMENT keeps the remainder attached
        let (mut hunk, mut zone) = fixture(1024);
        let free_size = 1024 - ZONE_HEADER_SIZE; // 1000
        let rounded = free_size - MIN_FRAGMENT; // 936, already 8-aligned
        let request = rounded - ZONE_HEADER_SIZE - 4;

        zone.malloc(hunk.arena_mut(), request).unwrap();
        let blocks = zone.blocks(hunk.arena()).unwrap();
        assert_eq!(blocks.len(), 1, "remainder of exactly MIN_FRAGMENT must not split");
        assert_eq!(blocks[0].size, free_size);
    }

    #[test]
    fn test_split_happens_above_min_fragment() {
        let (mut hunk, mut zone) = fixture(1024);
        let free_size = 1024 - ZONE_HEADER_SIZE;
        let rounded = free_size - MIN_FRAGMENT - 8; // leftover 72
        let request = rounded - ZONE_HEADER_SIZE - 4;

        zone.malloc(hunk.arena_mut(), request).unwrap();
        let blocks = zone.blocks(hunk.arena()).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].size, rounded);
        assert_eq!(blocks[1].size, MIN_FRAGMENT + 8);
        assert_eq!(blocks[1].tag, 0);
    }

    #[test]
    fn test_coalesce_merges_back_to_one_block() {
        let (mut hunk, mut zone) = fixture(4096);
        let a = zone.malloc(hunk.arena_mut(), 100).unwrap();
        let b = zone.malloc(hunk.arena_mut(), 100).unwrap();
        let c = zone.malloc(hunk.arena_mut(), 100).unwrap();

        // free outer blocks first, middle last: both merges must fire
        zone.free(hunk.arena_mut(), a).unwrap();
        zone.free(hunk.arena_mut(), c).unwrap();
        zone.free(hunk.arena_mut(), b).unwrap();

        let blocks = zone.blocks(hunk.arena()).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].size, 4096 - ZONE_HEADER_SIZE);
    }

    #[test]
    fn test_tail_word_is_written() {
        let (mut hunk, mut zone) = fixture(1024);
        let p = zone.malloc(hunk.arena_mut(), 40).unwrap();
        let block = p - ZONE_HEADER_SIZE;
        let size = zone.blocks(hunk.arena()).unwrap()[0].size;
        assert_eq!(hunk.arena().read_u32(block + size - 4), ZONE_ID);
    }

    #[test]
    fn test_double_free_is_detected() {
        let (mut hunk, mut zone) = fixture(1024);
        let p = zone.malloc(hunk.arena_mut(), 40).unwrap();
        zone.free(hunk.arena_mut(), p).unwrap();
        assert!(matches!(
            zone.free(hunk.arena_mut(), p),
            Err(EngineError::Corruption(_))
        ));
    }

    #[test]
    fn test_free_of_foreign_address_is_detected() {
        let (mut hunk, mut zone) = fixture(1024);
        let p = zone.malloc(hunk.arena_mut(), 40).unwrap();
        assert!(matches!(
            zone.free(hunk.arena_mut(), p + 8),
            Err(EngineError::Corruption(_))
        ));
    }

    #[test]
    fn test_tag_zero_is_reserved() {
        let (mut hunk, mut zone) = fixture(1024);
        assert!(matches!(
            zone.tag_malloc(hunk.arena_mut(), 10, 0),
            Err(EngineError::ReservedTag)
        ));
    }

    #[test]
    fn test_check_heap_detects_stomped_id() {
        let (mut hunk, mut zone) = fixture(1024);
        let p = zone.malloc(hunk.arena_mut(), 40).unwrap();
        hunk.arena_mut().write_u32(p - ZONE_HEADER_SIZE + 8, 0);
        assert!(matches!(
            zone.check_heap(hunk.arena()),
            Err(EngineError::Corruption("zone block without zone id"))
        ));
    }

    #[test]
    fn test_check_heap_detects_bad_size() {
        let (mut hunk, mut zone) = fixture(1024);
        let p = zone.malloc(hunk.arena_mut(), 40).unwrap();
        // shrink the block's recorded size so it no longer reaches its
        // successor
        hunk.arena_mut().write_u32(p - ZONE_HEADER_SIZE, 64);
        assert!(zone.check_heap(hunk.arena()).is_err());
    }

    #[test]
    fn test_clear_resets_everything() {
        let (mut hunk, mut zone) = fixture(2048);
        for _ in 0..5 {
            zone.malloc(hunk.arena_mut(), 64).unwrap();
        }
        zone.clear(hunk.arena_mut());
        let blocks = zone.blocks(hunk.arena()).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].tag, 0);
    }
}
