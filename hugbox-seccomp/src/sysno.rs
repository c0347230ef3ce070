//! Syscall name -> number resolution per target architecture

use hugbox_common::Arch;

/// Number of `name` in `arch`'s syscall table, if it has one.
pub fn resolve(arch: Arch, name: &str) -> Option<i64> {
    let id = match arch {
        Arch::X86_64 => name.parse::<syscalls::x86_64::Sysno>().ok()?.id(),
        Arch::Aarch64 => name.parse::<syscalls::aarch64::Sysno>().ok()?.id(),
        Arch::Riscv64 => name.parse::<syscalls::riscv64::Sysno>().ok()?.id(),
    };
    Some(i64::from(id))
}
