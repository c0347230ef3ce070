//! Named constant table for rule files.
//!
//! Rule conditions compare syscall arguments against numbers, which rule
//! files usually spell as platform constants (`PR_SET_NAME`, `AF_UNIX`).
//! The table is seeded with the host's values and grows as declaration
//! lines are parsed, so a name is only visible to lines after it. Values
//! that differ between architectures are only seeded for the host.

use std::collections::HashMap;

use hugbox_common::Arch;
use tracing::debug;

macro_rules! libc_constants {
    ($($name:ident),* $(,)?) => {
        [$((stringify!($name), libc::$name as u64)),*]
    };
}

/// Builtins whose value differs between supported architectures. They are
/// only seeded when compiling for the host.
const HOST_SPECIFIC: &[&str] = &["O_DIRECTORY", "O_NOFOLLOW"];

/// Host constants every profile may reference without declaring them.
fn builtins() -> impl Iterator<Item = (&'static str, u64)> {
    let prctl = libc_constants![
        PR_SET_PDEATHSIG,
        PR_GET_DUMPABLE,
        PR_SET_DUMPABLE,
        PR_SET_NAME,
        PR_GET_NAME,
        PR_GET_SECCOMP,
        PR_SET_SECCOMP,
        PR_CAPBSET_READ,
        PR_GET_TIMERSLACK,
        PR_SET_TIMERSLACK,
        PR_SET_NO_NEW_PRIVS,
        PR_GET_NO_NEW_PRIVS,
    ];
    let sockets = libc_constants![
        AF_UNSPEC,
        AF_UNIX,
        AF_INET,
        AF_INET6,
        AF_NETLINK,
        SOCK_STREAM,
        SOCK_DGRAM,
        SOCK_SEQPACKET,
        SOCK_NONBLOCK,
        SOCK_CLOEXEC,
    ];
    let files = libc_constants![
        O_RDONLY,
        O_WRONLY,
        O_RDWR,
        O_CREAT,
        O_EXCL,
        O_TRUNC,
        O_APPEND,
        O_NONBLOCK,
        O_DIRECTORY,
        O_NOFOLLOW,
        O_CLOEXEC,
        F_DUPFD,
        F_GETFD,
        F_SETFD,
        F_GETFL,
        F_SETFL,
        F_DUPFD_CLOEXEC,
    ];
    let process = libc_constants![
        CLONE_VM,
        CLONE_FS,
        CLONE_FILES,
        CLONE_SIGHAND,
        CLONE_THREAD,
        CLONE_SYSVSEM,
        CLONE_SETTLS,
        CLONE_PARENT_SETTID,
        CLONE_CHILD_CLEARTID,
        CLONE_NEWNS,
        CLONE_NEWUSER,
        CLONE_NEWPID,
        CLONE_NEWNET,
        FUTEX_WAIT,
        FUTEX_WAKE,
        FUTEX_REQUEUE,
        FUTEX_CMP_REQUEUE,
        FUTEX_WAKE_OP,
        FUTEX_WAIT_BITSET,
        FUTEX_WAKE_BITSET,
        FUTEX_PRIVATE_FLAG,
        FUTEX_CLOCK_REALTIME,
        MADV_NORMAL,
        MADV_DONTNEED,
        MADV_FREE,
    ];

    prctl
        .into_iter()
        .chain(sockets)
        .chain(files)
        .chain(process)
}

/// Symbol table mapping constant names to 64-bit values.
///
/// Owned by a single compilation; never shared between profiles.
#[derive(Debug, Clone, Default)]
pub struct ConstantTable {
    values: HashMap<String, u64>,
}

impl ConstantTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table seeded with the host's built-in constants.
    pub fn with_builtins() -> Self {
        let values = builtins()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        Self { values }
    }

    /// Builtins valid for `arch`.
    ///
    /// Values come from the host's libc. Compiling for another architecture
    /// leaves out the ones that differ, so a rule file needing them must
    /// declare them itself.
    pub fn for_target(arch: Arch) -> Self {
        let mut table = Self::with_builtins();
        if Arch::native().ok() != Some(arch) {
            debug!("seccomp: cross compiling for {}, dropping {:?}", arch, HOST_SPECIFIC);
            table.values.retain(|name, _| !HOST_SPECIFIC.contains(&name.as_str()));
        }
        table
    }

    /// Add or overwrite a constant.
    pub fn declare(&mut self, name: &str, value: u64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Resolve one value token: a known symbol, else a numeric literal.
    pub fn resolve_token(&self, token: &str) -> Option<u64> {
        self.get(token).or_else(|| parse_literal(token))
    }
}

/// Parse an unsigned integer literal with base prefix.
///
/// Accepts decimal, `0x` hex, `0o` or leading-`0` octal and `0b` binary,
/// with `_` digit separators.
pub fn parse_literal(token: &str) -> Option<u64> {
    let (digits, radix) = if let Some(rest) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        (rest, 16)
    } else if let Some(rest) = token
        .strip_prefix("0b")
        .or_else(|| token.strip_prefix("0B"))
    {
        (rest, 2)
    } else if let Some(rest) = token
        .strip_prefix("0o")
        .or_else(|| token.strip_prefix("0O"))
    {
        (rest, 8)
    } else if token.len() > 1 && token.starts_with('0') {
        (&token[1..], 8)
    } else {
        (token, 10)
    };

    // Separators only between digits
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') {
        return None;
    }
    let cleaned: String = digits.chars().filter(|&c| c != '_').collect();
    if cleaned.starts_with('+') {
        return None;
    }
    u64::from_str_radix(&cleaned, radix).ok()
}
