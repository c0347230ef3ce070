//! Error types for policy compilation

use hugbox_common::{Arch, UnsupportedArch};
use thiserror::Error;

/// Errors raised while parsing or compiling a seccomp profile.
///
/// Every variant aborts the profile: a partially built policy is never
/// handed to the launcher.
#[derive(Debug, Error)]
pub enum SeccompError {
    /// Malformed declaration, rule, condition or value
    #[error("seccomp: {reason}: {line}:{text}")]
    Syntax {
        /// 1-based line number
        line: usize,
        /// Offending line, trimmed
        text: String,
        reason: String,
    },

    /// Syscall name with no number on the target (fatal for blacklists)
    #[error("seccomp: unknown system call '{name}' on {arch}")]
    UnknownSyscall { name: String, arch: Arch },

    #[error("seccomp: {0}")]
    UnsupportedArch(#[from] UnsupportedArch),

    /// seccompiler rejected the rule set
    #[error("seccomp: failed to build filter: {0}")]
    Backend(#[from] seccompiler::BackendError),

    #[error("seccomp: failed to write filter: {0}")]
    Io(#[from] std::io::Error),
}

impl SeccompError {
    pub(crate) fn syntax(line: usize, text: &str, reason: impl Into<String>) -> Self {
        SeccompError::Syntax {
            line,
            text: text.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SeccompError>;
