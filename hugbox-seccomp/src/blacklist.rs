//! Static deny list for blacklist profiles.
//!
//! Calls that should essentially never be made from inside the sandbox,
//! due to security or privacy issues. Processes that need a tighter
//! surface use a whitelist profile instead.

use hugbox_common::Arch;

/// Syscalls denied on every architecture, with the reason they are denied
pub const DENIED_SYSCALLS: &[(&str, &str)] = &[
    ("syslog", "reads the kernel log"),
    ("personality", "switches execution domain"),
    ("acct", "toggles process accounting"),
    ("quotactl", "reads current quota use"),
    // NUMA and VM placement
    ("move_pages", "moves pages of other processes"),
    ("mbind", "sets NUMA memory policy"),
    ("get_mempolicy", "reads NUMA memory policy"),
    ("set_mempolicy", "sets NUMA memory policy"),
    ("migrate_pages", "moves pages of other processes"),
    // Nested namespace setup. clone(CLONE_NEWUSER) stays allowed, bwrap needs it.
    ("unshare", "creates namespaces"),
    ("mount", "mounts filesystems"),
    ("pivot_root", "changes root filesystem"),
    ("umount2", "unmounts filesystems"),
    ("chroot", "changes root directory"),
    // Profiling is done from outside the sandbox
    ("perf_event_open", "accesses performance events"),
    ("ptrace", "inspects and manipulates processes"),
    ("process_vm_readv", "reads other process memory"),
    ("process_vm_writev", "writes other process memory"),
    ("kcmp", "compares kernel resources of processes"),
    // Kernel and host administration
    ("kexec_load", "loads a new kernel"),
    ("init_module", "loads kernel modules"),
    ("finit_module", "loads kernel modules"),
    ("delete_module", "unloads kernel modules"),
    ("reboot", "reboots the system"),
    ("swapon", "enables swap"),
    ("swapoff", "disables swap"),
    ("ioprio_set", "changes I/O scheduling of other processes"),
    ("adjtimex", "adjusts the system clock"),
    ("clock_adjtime", "adjusts the system clock"),
    ("lookup_dcookie", "resolves directory entry cookies"),
    ("nfsservctl", "talks to the kernel NFS daemon"),
    // File handles bypass path-based confinement
    ("open_by_handle_at", "opens files by handle"),
    ("name_to_handle_at", "obtains file handles"),
    ("fanotify_init", "watches filesystem-wide events"),
    // Keyring
    ("add_key", "modifies the kernel keyring"),
    ("request_key", "queries the kernel keyring"),
    ("keyctl", "manipulates the kernel keyring"),
    // Legacy AIO
    ("io_setup", "legacy AIO"),
    ("io_destroy", "legacy AIO"),
    ("io_getevents", "legacy AIO"),
    ("io_submit", "legacy AIO"),
    ("io_cancel", "legacy AIO"),
    ("remap_file_pages", "deprecated nonlinear mappings"),
    ("vmsplice", "historic source of kernel exploits"),
];

/// Names to deny on `arch`: the common list followed by the architecture's
/// legacy extension.
pub fn denied_syscalls(arch: Arch) -> impl Iterator<Item = &'static str> {
    DENIED_SYSCALLS
        .iter()
        .map(|(name, _)| *name)
        .chain(arch.spec().legacy_blacklist.iter().copied())
}

/// Reason a syscall is on the common deny list, if it is. Architecture
/// extensions carry no reason.
pub fn deny_reason(name: &str) -> Option<&'static str> {
    DENIED_SYSCALLS
        .iter()
        .find(|(denied, _)| *denied == name)
        .map(|(_, reason)| *reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn no_duplicates() {
        for arch in Arch::ALL {
            let names: Vec<_> = denied_syscalls(arch).collect();
            let unique: HashSet<_> = names.iter().collect();
            assert_eq!(names.len(), unique.len(), "{arch}");
        }
    }

    #[test]
    fn x86_64_carries_legacy_calls() {
        let names: HashSet<_> = denied_syscalls(Arch::X86_64).collect();
        assert!(names.contains("modify_ldt"));
        assert!(names.contains("_sysctl"));
        assert!(names.contains("ptrace"));

        let names: HashSet<_> = denied_syscalls(Arch::Aarch64).collect();
        assert!(!names.contains("modify_ldt"));
        assert!(names.contains("ptrace"));
    }

    #[test]
    fn generic_table_calls_are_common() {
        for arch in Arch::ALL {
            let names: HashSet<_> = denied_syscalls(arch).collect();
            assert!(names.contains("lookup_dcookie"), "{arch}");
            assert!(names.contains("nfsservctl"), "{arch}");
        }
    }

    #[test]
    fn reasons() {
        assert_eq!(deny_reason("ptrace"), Some("inspects and manipulates processes"));
        assert_eq!(deny_reason("read"), None);
    }
}
