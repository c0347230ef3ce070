//! Direct library imports of an ELF object.
//!
//! Only the parts of the format needed to list `DT_NEEDED` are read: the ELF
//! header, the program headers, the `PT_DYNAMIC` segment and the dynamic
//! string table it points at.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use hugbox_common::Arch;
use tracing::trace;

use crate::error::{DynlibError, Result};

const ELF_MAGIC: &[u8] = b"\x7fELF";
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;

const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;

const EM_X86_64: u16 = 62;
const EM_AARCH64: u16 = 183;
const EM_RISCV: u16 = 243;

const PHDR_SIZE: u16 = 56;
const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;

const DYN_SIZE: u64 = 16;
const DT_NULL: i64 = 0;
const DT_NEEDED: i64 = 1;
const DT_STRTAB: i64 = 5;
const DT_STRSZ: i64 = 10;

/// Longest `DT_NEEDED` name read when `DT_STRSZ` is absent
const MAX_NAME: u64 = 4096;

/// Source of a binary's direct shared library imports.
pub trait ImportExtractor {
    /// `DT_NEEDED` names of `path`, in file order.
    fn imports(&self, path: &Path) -> Result<Vec<String>>;
}

impl<T: ImportExtractor + ?Sized> ImportExtractor for &T {
    fn imports(&self, path: &Path) -> Result<Vec<String>> {
        (**self).imports(path)
    }
}

/// Reads imports from 64-bit little-endian ELF objects built for one architecture.
#[derive(Debug, Clone, Copy)]
pub struct ElfImports {
    arch: Arch,
}

impl ElfImports {
    pub fn new(arch: Arch) -> Self {
        Self { arch }
    }
}

impl ImportExtractor for ElfImports {
    fn imports(&self, path: &Path) -> Result<Vec<String>> {
        let file = File::open(path).map_err(|e| DynlibError::io(path, e))?;
        let mut reader = BufReader::new(file);

        let needed = read_needed(&mut reader, self.arch).map_err(|e| match e {
            ReadError::Io(e) if e.kind() == ErrorKind::UnexpectedEof => {
                DynlibError::elf(path, "truncated")
            }
            ReadError::Io(e) => DynlibError::io(path, e),
            ReadError::Invalid(reason) => DynlibError::elf(path, reason),
        })?;

        trace!("{}: DT_NEEDED {:?}", path.display(), needed);
        Ok(needed)
    }
}

fn machine(arch: Arch) -> u16 {
    match arch {
        Arch::X86_64 => EM_X86_64,
        Arch::Aarch64 => EM_AARCH64,
        Arch::Riscv64 => EM_RISCV,
    }
}

enum ReadError {
    Io(std::io::Error),
    Invalid(String),
}

impl From<std::io::Error> for ReadError {
    fn from(e: std::io::Error) -> Self {
        ReadError::Io(e)
    }
}

fn invalid<T>(reason: impl Into<String>) -> std::result::Result<T, ReadError> {
    Err(ReadError::Invalid(reason.into()))
}

struct Segment {
    kind: u32,
    offset: u64,
    vaddr: u64,
    filesz: u64,
}

impl Segment {
    fn contains(&self, vaddr: u64) -> bool {
        vaddr >= self.vaddr && vaddr - self.vaddr < self.filesz
    }
}

fn read_needed<R: BufRead + Seek>(
    r: &mut R,
    arch: Arch,
) -> std::result::Result<Vec<String>, ReadError> {
    let mut ident = [0u8; 16];
    r.read_exact(&mut ident)?;
    if !ident.starts_with(ELF_MAGIC) {
        return invalid("not an ELF file");
    }
    if ident[4] != ELFCLASS64 {
        return invalid("not a 64-bit ELF object");
    }
    if ident[5] != ELFDATA2LSB {
        return invalid("not a little-endian ELF object");
    }

    let e_type = r.read_u16::<LittleEndian>()?;
    let e_machine = r.read_u16::<LittleEndian>()?;
    if e_type != ET_EXEC && e_type != ET_DYN {
        return invalid(format!("unexpected ELF type {e_type}"));
    }
    if e_machine != machine(arch) {
        return invalid(format!("machine {e_machine} is not {arch}"));
    }

    r.seek(SeekFrom::Start(32))?;
    let phoff = r.read_u64::<LittleEndian>()?;
    r.seek(SeekFrom::Start(54))?;
    let phentsize = r.read_u16::<LittleEndian>()?;
    let phnum = r.read_u16::<LittleEndian>()?;
    if phnum > 0 && phentsize < PHDR_SIZE {
        return invalid(format!("program header size {phentsize}"));
    }

    let mut segments = Vec::with_capacity(usize::from(phnum));
    for i in 0..u64::from(phnum) {
        r.seek(SeekFrom::Start(phoff.saturating_add(i * u64::from(phentsize))))?;
        let kind = r.read_u32::<LittleEndian>()?;
        let _flags = r.read_u32::<LittleEndian>()?;
        let offset = r.read_u64::<LittleEndian>()?;
        let vaddr = r.read_u64::<LittleEndian>()?;
        let _paddr = r.read_u64::<LittleEndian>()?;
        let filesz = r.read_u64::<LittleEndian>()?;
        segments.push(Segment {
            kind,
            offset,
            vaddr,
            filesz,
        });
    }

    let Some(dynamic) = segments.iter().find(|s| s.kind == PT_DYNAMIC) else {
        return invalid("no PT_DYNAMIC segment, not dynamically linked");
    };

    let mut needed_offsets = Vec::new();
    let mut strtab = None;
    let mut strsz = None;

    r.seek(SeekFrom::Start(dynamic.offset))?;
    for _ in 0..dynamic.filesz / DYN_SIZE {
        let tag = r.read_i64::<LittleEndian>()?;
        let val = r.read_u64::<LittleEndian>()?;
        match tag {
            DT_NULL => break,
            DT_NEEDED => needed_offsets.push(val),
            DT_STRTAB => strtab = Some(val),
            DT_STRSZ => strsz = Some(val),
            _ => {}
        }
    }

    if needed_offsets.is_empty() {
        return Ok(Vec::new());
    }

    let Some(strtab) = strtab else {
        return invalid("DT_NEEDED without DT_STRTAB");
    };
    let Some(load) = segments
        .iter()
        .find(|s| s.kind == PT_LOAD && s.contains(strtab))
    else {
        return invalid("DT_STRTAB outside loaded segments");
    };
    let strtab_offset = load.offset + (strtab - load.vaddr);

    needed_offsets
        .into_iter()
        .map(|off| {
            let limit = match strsz {
                Some(size) if off >= size => return invalid("DT_NEEDED offset out of bounds"),
                Some(size) => (size - off).min(MAX_NAME),
                None => MAX_NAME,
            };
            r.seek(SeekFrom::Start(strtab_offset.saturating_add(off)))?;
            read_cstr(&mut *r, limit)
        })
        .collect()
}

fn read_cstr<R: BufRead>(r: &mut R, limit: u64) -> std::result::Result<String, ReadError> {
    let mut buf = Vec::new();
    r.by_ref().take(limit).read_until(0, &mut buf)?;
    if buf.pop() != Some(0) {
        return invalid("unterminated DT_NEEDED string");
    }
    String::from_utf8(buf).or_else(|_| invalid("DT_NEEDED is not valid UTF-8"))
}
