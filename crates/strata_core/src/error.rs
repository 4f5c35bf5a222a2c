//! # Store Error Types
//!
//! All errors that can occur in the storage core.

use thiserror::Error;

/// Errors that can occur in the storage core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The id bit layout is outside the supported ranges.
    #[error("invalid id schema: chunk_bit {chunk_bit}, chunk_count_bit {chunk_count_bit}")]
    InvalidSchema {
        /// Requested object-id width.
        chunk_bit: u32,
        /// Requested chunk-count width.
        chunk_count_bit: u32,
    },

    /// Every chunk slot of the pool is in use. Not recoverable without
    /// reconfiguring the pool with a larger chunk count.
    #[error("cannot create a new memory chunk: all {chunk_count} chunks are allocated")]
    ChunkLimitExceeded {
        /// Configured maximum number of chunks.
        chunk_count: u32,
    },

    /// The same component type appeared twice in one composition.
    #[error("duplicate component type (class index {index}) in composition")]
    DuplicateComponentType {
        /// Class index of the repeated type.
        index: u32,
    },

    /// Configuration could not be read or parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The repository backing a composition has been dropped.
    #[error("composition repository is no longer available")]
    RepositoryClosed,
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
