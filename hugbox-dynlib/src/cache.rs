//! Dynamic linker cache reader.
//!
//! `ld.so.cache` layout (`sysdeps/generic/dl-cache.h`). Since glibc 2.2 the
//! new table is embedded in the string area of the old one:
//!
//! ```text
//! old_magic "ld.so-1.7.0\0"
//! nlibs     u32
//! libs[nlibs]               12 bytes each
//! pad to 8 bytes            string[0] of the old format
//! new_magic "glibc-ld.so.cache1.1"
//! nlibs, len_strings        u32, u32
//! unused[5]                 u32
//! libs[nlibs]               flags u32, key u32, value u32, osversion u32, hwcap u64
//! strings                   NUL terminated, offsets relative to new_magic
//! ```
//!
//! glibc 2.32 and later write the new table on its own by default, so a file
//! starting with the new magic is accepted too.

use std::collections::HashMap;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use hugbox_common::{Arch, LD_SO_CACHE};
use tracing::debug;

use crate::error::{DynlibError, Result};

const OLD_MAGIC: &[u8] = b"ld.so-1.7.0\0";
const OLD_ENTRY_SIZE: usize = 4 + 4 + 4;

const NEW_MAGIC: &[u8] = b"glibc-ld.so.cache1.1";
const NEW_HEADER_SIZE: usize = NEW_MAGIC.len() + 4 + 4 + 5 * 4;
const NEW_ENTRY_SIZE: usize = 4 + 4 + 4 + 4 + 8;

/// One library record from the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Library name (soname)
    pub name: String,
    /// Install path
    pub path: String,
    pub flags: u32,
    pub os_version: u32,
    pub hwcap: u64,
}

/// Parsed `ld.so.cache`, indexed by library name.
///
/// A name may map to several entries (hwcap or os-version variants). Lookups
/// take the first one in file order and make no attempt to disambiguate.
#[derive(Debug, Clone, Default)]
pub struct Cache {
    store: HashMap<String, Vec<CacheEntry>>,
}

impl Cache {
    /// Load the host cache for the native architecture.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(LD_SO_CACHE), Arch::native()?)
    }

    /// Load the cache at `path`, keeping entries for `arch`.
    pub fn load_from(path: &Path, arch: Arch) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| DynlibError::io(path, e))?;
        debug!("Read {} bytes from {}", bytes.len(), path.display());
        Self::parse(&bytes, arch)
    }

    /// Decode a cache image, keeping entries for `arch`.
    pub fn parse(bytes: &[u8], arch: Arch) -> Result<Self> {
        let table = new_table(bytes)?;

        if !table.starts_with(NEW_MAGIC) {
            return Err(DynlibError::decode("has invalid new_magic"));
        }
        if table.len() < NEW_HEADER_SIZE {
            return Err(DynlibError::decode("truncated (new header)"));
        }

        let off = NEW_MAGIC.len();
        let nlibs = LittleEndian::read_u32(&table[off..]) as usize;
        let len_strings = LittleEndian::read_u32(&table[off + 4..]) as usize;

        let entries_end = nlibs
            .checked_mul(NEW_ENTRY_SIZE)
            .and_then(|n| n.checked_add(NEW_HEADER_SIZE))
            .filter(|&end| end <= table.len())
            .ok_or_else(|| DynlibError::decode("truncated (libs[])"))?;
        let strings_end = entries_end
            .checked_add(len_strings)
            .filter(|&end| end <= table.len())
            .ok_or_else(|| DynlibError::decode("truncated (strings)"))?;

        let strings = StringTable {
            table,
            start: entries_end,
            end: strings_end,
        };

        let mut cache = Cache::default();
        for raw in table[NEW_HEADER_SIZE..entries_end].chunks_exact(NEW_ENTRY_SIZE) {
            let flags = LittleEndian::read_u32(&raw[0..]);
            let key = LittleEndian::read_u32(&raw[4..]);
            let value = LittleEndian::read_u32(&raw[8..]);

            let entry = CacheEntry {
                name: strings.get(key).map_err(|e| prefix(e, "key"))?,
                path: strings.get(value).map_err(|e| prefix(e, "value"))?,
                flags,
                os_version: LittleEndian::read_u32(&raw[12..]),
                hwcap: LittleEndian::read_u64(&raw[16..]),
            };

            if arch.accepts_cache_entry(entry.flags, entry.hwcap) {
                cache.insert(entry);
            } else {
                debug!(
                    "dynlib: ignoring library: {} (flags: {:#x}, hwcap: {:#x})",
                    entry.name, entry.flags, entry.hwcap
                );
            }
        }

        for (name, entries) in &cache.store {
            if entries.len() > 1 {
                let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
                debug!("dynlib: ambiguous entry: {}: {:?}", name, paths);
            }
        }

        debug!("Indexed {} of {} cache entries for {}", cache.len(), nlibs, arch);
        Ok(cache)
    }

    fn insert(&mut self, entry: CacheEntry) {
        self.store.entry(entry.name.clone()).or_default().push(entry);
    }

    /// Install path of `name`, first entry wins.
    pub fn library_path(&self, name: &str) -> Option<&str> {
        self.store
            .get(name)
            .and_then(|entries| entries.first())
            .map(|e| e.path.as_str())
    }

    /// Every retained entry for `name`, in file order.
    pub fn entries(&self, name: &str) -> &[CacheEntry] {
        self.store.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Total number of retained entries
    pub fn len(&self) -> usize {
        self.store.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl FromIterator<CacheEntry> for Cache {
    fn from_iter<I: IntoIterator<Item = CacheEntry>>(iter: I) -> Self {
        let mut cache = Cache::default();
        for entry in iter {
            cache.insert(entry);
        }
        cache
    }
}

/// Skip the old format, if present, and return the slice starting at the
/// new header.
fn new_table(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.starts_with(NEW_MAGIC) {
        return Ok(bytes);
    }
    if !bytes.starts_with(OLD_MAGIC) {
        return Err(DynlibError::decode("has invalid old_magic"));
    }

    let mut off = OLD_MAGIC.len();
    if bytes.len() < off + 4 {
        return Err(DynlibError::decode("truncated (nlibs)"));
    }
    let nlibs = LittleEndian::read_u32(&bytes[off..]) as usize;
    off += 4;

    off = nlibs
        .checked_mul(OLD_ENTRY_SIZE)
        .and_then(|n| n.checked_add(off))
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| DynlibError::decode("truncated (libs[])"))?;

    // new_magic is 8 byte aligned
    let aligned = (off + 7) & !7;
    if bytes.len() < aligned {
        return Err(DynlibError::decode("truncated (pad)"));
    }
    Ok(&bytes[aligned..])
}

struct StringTable<'a> {
    table: &'a [u8],
    start: usize,
    end: usize,
}

impl StringTable<'_> {
    fn get(&self, offset: u32) -> Result<String> {
        let offset = offset as usize;
        if offset < self.start || offset >= self.end {
            return Err(DynlibError::decode("string table index out of bounds"));
        }

        let tail = &self.table[offset..self.end];
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| DynlibError::decode("string is not NUL terminated"))?;

        String::from_utf8(tail[..len].to_vec())
            .map_err(|_| DynlibError::decode("string is not valid UTF-8"))
    }
}

fn prefix(err: DynlibError, field: &str) -> DynlibError {
    match err {
        DynlibError::Decode(reason) => DynlibError::Decode(format!("{field}: {reason}")),
        other => other,
    }
}
