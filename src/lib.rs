//! Memory and asset foundation for a classic game engine
//!
//! A self-contained runtime that carves one preallocated buffer into three
//! cooperating allocators, layered beneath an asset loader that reads
//! files either from a game directory on disk or out of a read-only pack
//! archive.
//!
//! ## Features
//!
//! - **Hunk**: bidirectional stack allocator over the single buffer;
//!   permanent data grows from the bottom, frame-scoped data from the top
//! - **Zone**: small-block heap with coalescing, carved out of the low hunk
//! - **Cache**: LRU-evictable blobs in the free middle between the stacks
//! - **Pack reader**: parses archive directories once into hunk memory
//! - **Search path**: later registrations shadow earlier ones, higher
//!   numbered packs shadow lower ones
//! - **Console variables**: open-addressed registry with names in the zone
//!
//! ## Memory map
//!
//! ```text
//! ┌──────────────────────────────┐ 0
//! │ Hunk low stack               │   zone slab, pack directories,
//! │   ↓ grows down the page      │   level data, permanent assets
//! ├──────────────────────────────┤ low_used
//! │                              │
//! │ Cache arena (free middle)    │   LRU-evictable blobs
//! │                              │
//! ├──────────────────────────────┤ N - high_used
//! │ Hunk high stack              │   temp file staging,
//! │   ↑ grows up the page        │   frame working sets
//! └──────────────────────────────┘ N
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use bedrock::{Engine, EngineConfig, LoadDest};
//!
//! let mut engine = Engine::init(&EngineConfig::default())?;
//! engine.add_game_directory("data/id1")?;
//!
//! if let Some(asset) = engine.load("maps/e1m1.bsp", LoadDest::HunkLow)? {
//!     let header = engine.bytes(asset, 4);
//!     println!("first bytes: {:?}", header);
//! }
//! # Ok::<(), bedrock::EngineError>(())
//! ```
//!
//! The whole core is single-threaded by design: no locks, no atomics, and
//! every operation returns before the caller regains control.

pub mod arena;
pub mod cache;
pub mod config;
pub mod cvar;
pub mod engine;
pub mod error;
pub mod files;
pub mod hunk;
pub mod memory;
pub mod pack;
pub mod zone;

pub use arena::Arena;
pub use cache::{Cache, CacheUser, CACHE_HEADER_SIZE};
pub use config::EngineConfig;
pub use cvar::{CvarId, Cvars, MAX_CVARS};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use files::{FileSystem, FileTable, LoadDest, MAX_FILE_HANDLES};
pub use hunk::{Hunk, HUNK_ALIGN, HUNK_HEADER_SIZE, HUNK_SENTINEL};
pub use memory::Memory;
pub use pack::{Pack, MAX_FILES_IN_PACK, PACK_ENTRY_SIZE, PACK_MAGIC, PACK_NAME_LEN};
pub use zone::{Zone, ZoneBlock, DEFAULT_ZONE_SIZE, MIN_FRAGMENT, ZONE_HEADER_SIZE, ZONE_ID};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
