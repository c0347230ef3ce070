//! Routines for working with the glibc dynamic linker.
//!
//! [`Cache`] reads `ld.so.cache`, [`ElfImports`] lists what a binary
//! imports, and [`Resolver`] walks both to find every library a set of
//! binaries needs and the names each one is loaded under.

pub mod cache;
pub mod elf;
pub mod error;
pub mod resolver;

pub use cache::{Cache, CacheEntry};
pub use elf::{ElfImports, ImportExtractor};
pub use error::{DynlibError, Result};
pub use resolver::{split_search_path, LibraryMap, Resolver};
