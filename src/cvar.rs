//! Console variable registry
//!
//! A fixed-capacity open-addressed hash table mapping variable names to
//! float values. Lookup hashes the name (djb2) and probes linearly modulo
//! the table size; a miss on `get` creates the variable with value 0.
//! Names are NUL-terminated strings allocated out of the zone, which is
//! exactly what the zone exists for.

use crate::error::{EngineError, Result};
use crate::memory::Memory;

/// Capacity of the registry.
pub const MAX_CVARS: usize = 512;

/// Handle to a registered console variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CvarId(usize);

#[derive(Clone, Copy)]
struct Slot {
    name_off: usize,
    name_len: usize,
    value: f32,
}

/// The console-variable registry.
pub struct Cvars {
    slots: Vec<Option<Slot>>,
    count: usize,
}

impl Cvars {
    pub fn new() -> Self {
        Cvars {
            slots: vec![None; MAX_CVARS],
            count: 0,
        }
    }

    /// Number of registered variables.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Look a variable up by name, creating it with value 0 when missing.
    /// The name string is copied into zone memory on creation.
    pub fn get(&mut self, memory: &mut Memory, name: &str) -> Result<CvarId> {
        let mut index = hash_name(name) as usize % MAX_CVARS;
        let mut probes = 0;
        while let Some(slot) = self.slots[index] {
            if self.name_matches(memory, &slot, name) {
                return Ok(CvarId(index));
            }
            index = (index + 1) % MAX_CVARS;
            probes += 1;
            if probes == MAX_CVARS {
                return Err(EngineError::CvarTableFull);
            }
        }

        if self.count >= MAX_CVARS {
            return Err(EngineError::CvarTableFull);
        }

        let name_len = name.len();
        let name_off = memory.zone_malloc(name_len + 1)?;
        let dest = memory.bytes_mut(name_off, name_len + 1);
        dest[..name_len].copy_from_slice(name.as_bytes());
        dest[name_len] = 0;

        self.slots[index] = Some(Slot {
            name_off,
            name_len,
            value: 0.0,
        });
        self.count += 1;
        Ok(CvarId(index))
    }

    /// Set a variable, creating it first if needed.
    pub fn set(&mut self, memory: &mut Memory, name: &str, value: f32) -> Result<CvarId> {
        let id = self.get(memory, name)?;
        if let Some(slot) = &mut self.slots[id.0] {
            slot.value = value;
        }
        Ok(id)
    }

    /// Current value of a variable.
    pub fn value(&self, id: CvarId) -> f32 {
        self.slots[id.0].map(|s| s.value).unwrap_or(0.0)
    }

    /// Read a variable's name back out of zone memory.
    pub fn name(&self, memory: &Memory, id: CvarId) -> String {
        match self.slots[id.0] {
            Some(slot) => {
                String::from_utf8_lossy(memory.bytes(slot.name_off, slot.name_len)).into_owned()
            }
            None => String::new(),
        }
    }

    fn name_matches(&self, memory: &Memory, slot: &Slot, name: &str) -> bool {
        if slot.name_len != name.len() {
            return false;
        }
        let stored = memory.bytes(slot.name_off, slot.name_len + 1);
        &stored[..slot.name_len] == name.as_bytes() && stored[slot.name_len] == 0
    }
}

impl Default for Cvars {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_name(name: &str) -> u32 {
    // djb2
    let mut hash: u32 = 5381;
    for &byte in name.as_bytes() {
        hash = hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(byte as u32);
    }
    hash
}
