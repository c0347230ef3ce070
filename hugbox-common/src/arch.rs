//! Target architectures and their static capability descriptors

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Architecture identifiers (matching AUDIT_ARCH_*)
pub mod audit_arch {
    pub const X86_64: u32 = 0xc000003e;
    pub const AARCH64: u32 = 0xc00000b7;
    pub const RISCV64: u32 = 0xc00000f3;
}

/// ld.so.cache entry flags (glibc `dl-cache.h`)
pub mod cache_flags {
    /// Mask for the library type bits
    pub const TYPE_MASK: u32 = 0x00ff;
    /// Mask for the architecture requirement bits
    pub const REQUIRED_MASK: u32 = 0xff00;

    pub const ELF: u32 = 1;
    pub const ELF_LIBC5: u32 = 2;
    pub const ELF_LIBC6: u32 = 3;

    pub const X8664_LIB64: u32 = 0x0300;
    pub const AARCH64_LIB64: u32 = 0x0a00;
    pub const RISCV_FLOAT_ABI_DOUBLE: u32 = 0x1000;
}

/// Raised when the host or a requested target has no descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported architecture: {0} (supported: x86_64, aarch64, riscv64)")]
pub struct UnsupportedArch(pub String);

/// A target instruction-set architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    #[serde(alias = "amd64")]
    X86_64,
    #[serde(alias = "arm64")]
    Aarch64,
    Riscv64,
}

/// What the sandbox builder knows about one architecture.
#[derive(Debug)]
pub struct ArchSpec {
    /// Canonical name
    pub name: &'static str,
    /// AUDIT_ARCH_* value checked by the filter prologue
    pub audit_arch: u32,
    /// Argument-conditional rules are honored. Where they are not, a
    /// conditional whitelist rule degrades to an unconditional allow.
    pub conditional_filters: bool,
    /// Required bits of a native 64-bit libc6 entry in ld.so.cache
    pub cache_required_flags: u32,
    /// Blacklist entries that only exist in this architecture's syscall table
    pub legacy_blacklist: &'static [&'static str],
}

static X86_64_SPEC: ArchSpec = ArchSpec {
    name: "x86_64",
    audit_arch: audit_arch::X86_64,
    conditional_filters: true,
    cache_required_flags: cache_flags::X8664_LIB64,
    legacy_blacklist: &[
        "uselib",
        "modify_ldt",
        "create_module",
        "iopl",
        "ioperm",
        "sysfs",
        "_sysctl",
        "tuxcall",
        "get_kernel_syms",
    ],
};

static AARCH64_SPEC: ArchSpec = ArchSpec {
    name: "aarch64",
    audit_arch: audit_arch::AARCH64,
    conditional_filters: false,
    cache_required_flags: cache_flags::AARCH64_LIB64,
    legacy_blacklist: &[],
};

static RISCV64_SPEC: ArchSpec = ArchSpec {
    name: "riscv64",
    audit_arch: audit_arch::RISCV64,
    conditional_filters: false,
    cache_required_flags: cache_flags::RISCV_FLOAT_ABI_DOUBLE,
    legacy_blacklist: &[],
};

impl Arch {
    pub const ALL: [Arch; 3] = [Arch::X86_64, Arch::Aarch64, Arch::Riscv64];

    /// The architecture this binary was built for.
    pub fn native() -> Result<Self, UnsupportedArch> {
        Self::from_name(std::env::consts::ARCH)
    }

    /// Look up an architecture by name (`x86_64`, `amd64`, `aarch64`, `arm64`, `riscv64`).
    pub fn from_name(name: &str) -> Result<Self, UnsupportedArch> {
        match name {
            "x86_64" | "amd64" => Ok(Arch::X86_64),
            "aarch64" | "arm64" => Ok(Arch::Aarch64),
            "riscv64" => Ok(Arch::Riscv64),
            other => Err(UnsupportedArch(other.to_string())),
        }
    }

    pub fn spec(self) -> &'static ArchSpec {
        match self {
            Arch::X86_64 => &X86_64_SPEC,
            Arch::Aarch64 => &AARCH64_SPEC,
            Arch::Riscv64 => &RISCV64_SPEC,
        }
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn supports_conditionals(self) -> bool {
        self.spec().conditional_filters
    }

    /// Whether an ld.so.cache entry describes a library this architecture can load.
    ///
    /// Accepts only libc6 ELF entries whose required bits are exactly the
    /// native 64-bit ABI. hwcap is not consulted on any supported architecture.
    pub fn accepts_cache_entry(self, flags: u32, _hwcap: u64) -> bool {
        let spec = self.spec();
        flags & cache_flags::TYPE_MASK == cache_flags::ELF_LIBC6
            && flags & cache_flags::REQUIRED_MASK == spec.cache_required_flags
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Arch {
    type Err = UnsupportedArch;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}
