//! hugbox - Shared types and definitions
//!
//! This crate contains types shared between the seccomp policy compiler,
//! the dynamic library resolver and the command line tools.

pub mod arch;
pub mod config;

pub use arch::*;
pub use config::*;

use tracing_subscriber::EnvFilter;

/// Host dynamic linker cache
pub const LD_SO_CACHE: &str = "/etc/ld.so.cache";

/// Errno returned for syscalls a filter refuses (EPERM)
pub const DENY_ERRNO: u32 = 1;

/// Number of syscall arguments addressable by a filter condition
pub const MAX_ARGS: u8 = 6;

/// Install the global tracing subscriber.
///
/// Each `-v` raises the level one step from `warn`. `RUST_LOG` wins when set.
pub fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
