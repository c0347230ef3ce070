//! hugbox library resolver
//!
//! Prints the shared libraries a set of binaries needs, keyed by canonical
//! path, with every name each one is imported under. The sandbox builder
//! binds each file at each of its aliases.
//!
//! # Usage
//!
//! ```bash
//! hugbox-resolve /opt/bundle/firefox --search-path /opt/bundle --extra-lib libnss_files.so.2
//! hugbox-resolve --config hugbox.yaml --format json
//! ```

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use hugbox_common::{Arch, SandboxConfig, LD_SO_CACHE};
use hugbox_dynlib::{split_search_path, Cache, ElfImports, LibraryMap, Resolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Yaml,
    Json,
}

/// hugbox - shared library resolver
#[derive(Parser, Debug)]
#[command(name = "hugbox-resolve")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Binaries that will run inside the sandbox
    #[arg(required_unless_present = "config", conflicts_with = "config")]
    binaries: Vec<PathBuf>,

    /// Library loaded at runtime without being imported (repeatable)
    #[arg(short, long = "extra-lib", conflicts_with = "config")]
    extra_libs: Vec<String>,

    /// Search path seen inside the sandbox (`:`-separated)
    #[arg(short, long, default_value = "", conflicts_with = "config")]
    search_path: String,

    /// Dynamic linker cache
    #[arg(long, default_value = LD_SO_CACHE, conflicts_with = "config")]
    cache: PathBuf,

    /// Target architecture (x86_64, aarch64, riscv64); native when omitted
    #[arg(long)]
    arch: Option<Arch>,

    /// Take binaries, extra libs, search path and cache from a configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Yaml)]
    format: Format,

    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Resolver inputs, from the command line or a config file
struct Inputs {
    arch: Arch,
    cache: PathBuf,
    binaries: Vec<PathBuf>,
    extra_libs: Vec<String>,
    search_path: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    hugbox_common::init_tracing(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let format = args.format;
    let inputs = inputs(args)?;
    let map = resolve(&inputs)?;
    print!("{}", render(&map, format)?);
    Ok(())
}

fn inputs(args: Args) -> Result<Inputs> {
    if let Some(path) = &args.config {
        let config = SandboxConfig::load(path).context("Failed to load configuration")?;
        let arch = match args.arch {
            Some(arch) => arch,
            None => config.target_arch()?,
        };
        let libraries = config.libraries;
        if libraries.binaries.is_empty() {
            bail!("{}: no binaries under 'libraries'", path.display());
        }
        return Ok(Inputs {
            arch,
            cache: config.ld_so_cache,
            binaries: libraries.binaries,
            extra_libs: libraries.extra_libs,
            search_path: split_search_path(OsStr::new(&libraries.search_path)),
        });
    }

    let arch = match args.arch {
        Some(arch) => arch,
        None => Arch::native()?,
    };
    Ok(Inputs {
        arch,
        cache: args.cache,
        binaries: args.binaries,
        extra_libs: args.extra_libs,
        search_path: split_search_path(OsStr::new(&args.search_path)),
    })
}

fn resolve(inputs: &Inputs) -> Result<LibraryMap> {
    info!("Loading {} for {}", inputs.cache.display(), inputs.arch);
    let cache = Cache::load_from(&inputs.cache, inputs.arch)
        .with_context(|| format!("Failed to load {}", inputs.cache.display()))?;
    info!("{} cache entries", cache.len());

    Resolver::new(&cache, ElfImports::new(inputs.arch))
        .resolve(&inputs.binaries, &inputs.extra_libs, &inputs.search_path)
        .context("Failed to resolve libraries")
}

fn render(map: &LibraryMap, format: Format) -> Result<String> {
    Ok(match format {
        Format::Yaml => serde_yaml::to_string(map)?,
        Format::Json => {
            let mut json = serde_json::to_string_pretty(map)?;
            json.push('\n');
            json
        }
    })
}
