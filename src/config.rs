//! Engine configuration
//!
//! All knobs default to the values the engine shipped with; a host can
//! override any subset through JSON (missing fields keep their defaults).

use crate::error::{EngineError, Result};
use crate::files::MAX_FILE_HANDLES;
use crate::pack::MAX_FILES_IN_PACK;
use crate::zone::DEFAULT_ZONE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default size of the whole preallocated buffer (16 MiB).
pub const DEFAULT_HUNK_SIZE: usize = 16 * 1024 * 1024;

/// Engine configuration
///
/// # Examples
///
/// ```
/// use bedrock::config::EngineConfig;
///
/// let cfg = EngineConfig::from_json(r#"{ "hunk_size": 2097152 }"#).unwrap();
/// assert_eq!(cfg.hunk_size, 2 * 1024 * 1024);
/// assert_eq!(cfg.zone_size, 128 * 1024); // untouched fields keep defaults
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Size of the single preallocated buffer everything lives in
    pub hunk_size: usize,

    /// Size of the small-block zone slab carved out of the low hunk
    pub zone_size: usize,

    /// Capacity of the open-file handle table
    pub max_file_handles: usize,

    /// Maximum number of directory entries accepted in one pack file
    pub max_pack_entries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            hunk_size: DEFAULT_HUNK_SIZE,
            zone_size: DEFAULT_ZONE_SIZE,
            max_file_handles: MAX_FILE_HANDLES,
            max_pack_entries: MAX_FILES_IN_PACK,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Reject configurations the memory system cannot be built from.
    pub fn validate(&self) -> Result<()> {
        if self.zone_size >= self.hunk_size {
            return Err(EngineError::InvalidConfig(format!(
                "zone size ({}) must be smaller than the hunk size ({})",
                self.zone_size, self.hunk_size
            )));
        }
        if self.max_file_handles == 0 {
            return Err(EngineError::InvalidConfig(
                "at least one file handle is required".to_string(),
            ));
        }
        Ok(())
    }
}
