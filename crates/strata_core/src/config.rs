//! # Store Configuration
//!
//! Sizing of a [`CompositionRepository`](crate::CompositionRepository),
//! loaded once at startup from TOML.
//!
//! ```toml
//! class_index_bit = 20
//! chunk_bit = 14
//! chunk_count_bit = 16
//! id_stack_capacity = 16384
//! id_stack_growth = "growable"
//! ```
//!
//! Every key is optional.

use std::path::Path;

use serde::Deserialize;

use crate::error::{StoreError, StoreResult};
use crate::memory::{IdSchema, StackGrowth};

/// Default class-index table width.
pub const DEFAULT_CLASS_INDEX_BIT: u32 = 20;
/// Default object-id width: 16384 entries per chunk.
pub const DEFAULT_CHUNK_BIT: u32 = 14;
/// Default chunk-count width: 65536 chunks.
pub const DEFAULT_CHUNK_COUNT_BIT: u32 = 16;
/// Default initial size of each node's free-id stack.
pub const DEFAULT_ID_STACK_CAPACITY: usize = 1 << 14;

/// Repository sizing.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Class-index table width, clamped to `[14, 24]`.
    pub class_index_bit: u32,
    /// Object-id width, `[10, 24]`.
    pub chunk_bit: u32,
    /// Chunk-count width, `[6, 20]`.
    pub chunk_count_bit: u32,
    /// Initial slots of each node's free-id stack.
    pub id_stack_capacity: usize,
    /// What a full free-id stack does.
    pub id_stack_growth: StackGrowth,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            class_index_bit: DEFAULT_CLASS_INDEX_BIT,
            chunk_bit: DEFAULT_CHUNK_BIT,
            chunk_count_bit: DEFAULT_CHUNK_COUNT_BIT,
            id_stack_capacity: DEFAULT_ID_STACK_CAPACITY,
            id_stack_growth: StackGrowth::Growable,
        }
    }
}

impl StoreConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] on malformed TOML or unknown
    /// keys, [`StoreError::InvalidSchema`] on out-of-range bit widths.
    pub fn from_toml_str(source: &str) -> StoreResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// As [`Self::from_toml_str`], plus [`StoreError::InvalidConfig`] if the
    /// file cannot be read.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| StoreError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Checks the bit widths.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidSchema`] on out-of-range widths.
    pub fn validate(&self) -> StoreResult<()> {
        self.id_schema().map(|_| ())
    }

    /// Id layout described by this config.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidSchema`] on out-of-range widths.
    pub fn id_schema(&self) -> StoreResult<IdSchema> {
        IdSchema::new(self.chunk_bit, self.chunk_count_bit)
    }
}
