//! hugbox seccomp profile compiler
//!
//! Compiles rule files into raw BPF programs, as read by `bwrap --seccomp FD`.
//!
//! # Usage
//!
//! ```bash
//! hugbox-compile --rules browser.seccomp -o browser.bpf
//! hugbox-compile --posture blacklist --arch aarch64 -o helper.bpf
//! hugbox-compile --config hugbox.yaml --out-dir build/
//! ```

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use hugbox_common::{Arch, Posture, ProfileConfig, SandboxConfig};
use hugbox_seccomp::{compile_profile, Filter, BROWSER_WHITELIST};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PostureArg {
    Whitelist,
    Blacklist,
}

impl From<PostureArg> for Posture {
    fn from(arg: PostureArg) -> Self {
        match arg {
            PostureArg::Whitelist => Posture::Whitelist,
            PostureArg::Blacklist => Posture::Blacklist,
        }
    }
}

/// hugbox - seccomp profile compiler
///
/// Whitelist profiles are compiled from a rule file (the built-in browser
/// whitelist when none is given). Blacklist profiles deny a fixed list of
/// dangerous syscalls and take no rule file.
#[derive(Parser, Debug)]
#[command(name = "hugbox-compile")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rule file to compile
    #[arg(short, long, conflicts_with = "config")]
    rules: Option<PathBuf>,

    /// Filter posture
    #[arg(short, long, value_enum, default_value_t = PostureArg::Whitelist)]
    posture: PostureArg,

    /// Target architecture (x86_64, aarch64, riscv64); native when omitted
    #[arg(long)]
    arch: Option<Arch>,

    /// Output BPF file
    #[arg(short, long, required_unless_present = "config")]
    output: Option<PathBuf>,

    /// Compile every profile in a configuration file
    #[arg(short, long, conflicts_with = "output")]
    config: Option<PathBuf>,

    /// Output directory for --config, one <profile>.bpf per profile
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
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
    if let Some(config) = &args.config {
        let written = compile_config(config, &args.out_dir, args.arch)?;
        println!("Compiled {} profiles into {}", written.len(), args.out_dir.display());
        return Ok(());
    }

    let Some(output) = &args.output else {
        bail!("--output is required without --config");
    };
    let arch = match args.arch {
        Some(arch) => arch,
        None => Arch::native()?,
    };
    let posture = Posture::from(args.posture);

    let rules = load_rules(posture, args.rules.as_deref())?;
    let filter = compile_profile(posture, &rules, arch).context("Failed to compile profile")?;
    write_filter(&filter, output)?;

    println!(
        "Compiled {:?} filter for {}: {} rules -> {}",
        posture,
        arch,
        filter.rules().len(),
        output.display()
    );
    Ok(())
}

/// Rule text for a profile. Blacklists ignore it.
fn load_rules(posture: Posture, path: Option<&Path>) -> Result<String> {
    match (posture, path) {
        (Posture::Blacklist, Some(path)) => {
            warn!("Ignoring rule file {} for blacklist profile", path.display());
            Ok(String::new())
        }
        (Posture::Blacklist, None) => Ok(String::new()),
        (Posture::Whitelist, Some(path)) => {
            info!("Reading rules from: {}", path.display());
            fs::read_to_string(path)
                .with_context(|| format!("Failed to read rule file {}", path.display()))
        }
        (Posture::Whitelist, None) => {
            info!("Using built-in browser whitelist");
            Ok(BROWSER_WHITELIST.to_string())
        }
    }
}

fn write_filter(filter: &Filter, output: &Path) -> Result<()> {
    info!("Writing filter to: {}", output.display());
    let file = File::create(output)
        .with_context(|| format!("Failed to create output file {}", output.display()))?;
    filter
        .export(&mut BufWriter::new(file))
        .with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(())
}

/// Compile every profile in `config_path` into `out_dir`, returning the
/// files written. Relative rule paths are taken from the config file's
/// directory. Nothing is written unless every profile compiles.
fn compile_config(config_path: &Path, out_dir: &Path, arch: Option<Arch>) -> Result<Vec<PathBuf>> {
    let config = SandboxConfig::load(config_path).context("Failed to load configuration")?;
    let arch = match arch {
        Some(arch) => arch,
        None => config.target_arch()?,
    };
    let base = config_path.parent().unwrap_or_else(|| Path::new("."));

    if config.profiles.is_empty() {
        warn!("No profiles in {}", config_path.display());
    }

    let filters = config
        .profiles
        .iter()
        .map(|profile| {
            compile_one(profile, base, arch)
                .with_context(|| format!("Profile '{}'", profile.name))
                .map(|filter| (profile, filter))
        })
        .collect::<Result<Vec<_>>>()?;

    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let mut written = Vec::with_capacity(filters.len());
    for (profile, filter) in filters {
        let output = out_dir.join(format!("{}.bpf", profile.name));
        write_filter(&filter, &output)?;
        written.push(output);
    }
    Ok(written)
}

fn compile_one(profile: &ProfileConfig, base: &Path, arch: Arch) -> Result<Filter> {
    info!("Compiling profile '{}' ({:?})", profile.name, profile.posture);
    let rules_path = profile.rules.as_ref().map(|p| base.join(p));
    let rules = load_rules(profile.posture, rules_path.as_deref())?;
    Ok(compile_profile(profile.posture, &rules, arch)?)
}
