//! Seccomp policy compiler.
//!
//! Profiles come in two postures. A whitelist is read from a small rule
//! language (see [`parser`]) and denies everything it does not name. A
//! blacklist is built from the static list in [`blacklist`] and allows
//! everything else. Either compiles to a [`Filter`] for one architecture,
//! which lowers to a classic BPF program and exports as raw `sock_filter`
//! records.

pub mod blacklist;
pub mod codegen;
pub mod compiler;
pub mod constants;
pub mod error;
pub mod parser;
pub mod sysno;

#[cfg(test)]
mod bpf_eval;

pub use compiler::{
    compile_blacklist, compile_profile, compile_whitelist, compile_whitelist_text, Filter, Rule,
    Verdict,
};
pub use constants::ConstantTable;
pub use error::{Result, SeccompError};
pub use parser::{parse, RuleSet};

/// Default whitelist for the browser process
pub const BROWSER_WHITELIST: &str = include_str!("../profiles/browser-whitelist.seccomp");
