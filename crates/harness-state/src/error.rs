//! Errors for the persistence substrate.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from the state store and the components built on it.
///
/// Reads deliberately do not surface here: an absent or corrupt snapshot
/// is recovered to an empty mapping with a logged warning, because read
/// availability matters more than strict propagation. Writes get the
/// opposite treatment and fail loudly.
#[derive(Error, Debug)]
pub enum StateError {
    /// Another writer held the lock for the whole acquisition window.
    #[error("Could not acquire state lock at {} within {timeout:?}", path.display())]
    LockTimeout {
        /// Path of the contended lock file.
        path: PathBuf,
        /// The acquisition window that elapsed.
        timeout: Duration,
    },

    /// Filesystem failure on the write path.
    #[error("state I/O error at {}: {source}", path.display())]
    Io {
        /// File or directory the operation touched.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A value could not be serialized into the snapshot document.
    #[error("failed to serialize state snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
