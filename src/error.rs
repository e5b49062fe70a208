//! Central error handling for acceleration-structure construction.
//!
//! Build and refit entry points validate their inputs before touching any
//! state and report failures through [`AccelError`]. Traversal is total: it
//! never fails, it only misses.

/// Centralized error type for all build and refit operations.
#[derive(thiserror::Error, Debug)]
pub enum AccelError {
    #[error("{what} count {count} exceeds supported maximum {max}")]
    CapacityExceeded {
        what: &'static str,
        count: usize,
        max: usize,
    },

    #[error("tree depth {depth} exceeds the 64-entry traversal stack")]
    DepthExceeded { depth: u32 },

    #[error("triangle count changed since build: expected {expected}, got {got}")]
    TriCountChanged { expected: usize, got: usize },

    #[error("invalid build options: {0}")]
    InvalidOptions(String),

    #[error("invalid mesh: {0}")]
    InvalidMesh(String),
}

impl AccelError {
    pub fn invalid_options<T: ToString>(msg: T) -> Self {
        AccelError::InvalidOptions(msg.to_string())
    }

    pub fn invalid_mesh<T: ToString>(msg: T) -> Self {
        AccelError::InvalidMesh(msg.to_string())
    }
}

/// Result type alias for acceleration-structure operations.
pub type Result<T> = std::result::Result<T, AccelError>;
