//! Error types for cache decoding and library resolution

use std::path::PathBuf;

use hugbox_common::UnsupportedArch;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DynlibError {
    /// Malformed ld.so.cache
    #[error("dynlib: ld.so.cache {0}")]
    Decode(String),

    /// Binary is not a dynamically linked ELF object for the target
    #[error("dynlib: {}: {reason}", path.display())]
    Elf { path: PathBuf, reason: String },

    #[error("dynlib: {0}")]
    UnsupportedArch(#[from] UnsupportedArch),

    /// Import found neither in the search path nor in the cache
    #[error("dynlib: failed to find library: {library}")]
    Unresolved { library: String },

    #[error("dynlib: {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DynlibError {
    pub(crate) fn decode(reason: impl Into<String>) -> Self {
        DynlibError::Decode(reason.into())
    }

    pub(crate) fn elf(path: &std::path::Path, reason: impl Into<String>) -> Self {
        DynlibError::Elf {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        DynlibError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DynlibError>;
