//! Policy compiler: rule sets to architecture-bound filters

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use hugbox_common::{Arch, Posture, DENY_ERRNO};
use seccompiler::BpfProgram;
use tracing::{debug, info, warn};

use crate::blacklist::{denied_syscalls, deny_reason};
use crate::constants::ConstantTable;
use crate::error::{Result, SeccompError};
use crate::parser::{self, Condition, RuleSet};
use crate::{codegen, sysno};

/// What the filter does with a syscall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Let the call through
    Allow,
    /// Fail the call with this errno
    Errno(u32),
}

/// A rule bound to a syscall number.
///
/// `conditions` maps an argument index to the values it may take. Values
/// for one index are alternatives; distinct indices must all match. An
/// empty map matches every invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub syscall: String,
    pub nr: i64,
    pub conditions: BTreeMap<u8, BTreeSet<u64>>,
}

impl Rule {
    pub fn unconditional(syscall: &str, nr: i64) -> Self {
        Self {
            syscall: syscall.to_string(),
            nr,
            conditions: BTreeMap::new(),
        }
    }

    pub fn is_unconditional(&self) -> bool {
        self.conditions.is_empty()
    }

    fn matches(&self, args: &[u64; 6]) -> bool {
        self.conditions
            .iter()
            .all(|(&arg, values)| values.contains(&args[arg as usize]))
    }
}

/// Coalesce `argN == V` conditions by argument index.
pub fn coalesce(conditions: &[Condition]) -> BTreeMap<u8, BTreeSet<u64>> {
    let mut by_arg: BTreeMap<u8, BTreeSet<u64>> = BTreeMap::new();
    for cond in conditions {
        by_arg.entry(cond.arg).or_default().insert(cond.value);
    }
    by_arg
}

/// A compiled profile, ready to lower to BPF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    arch: Arch,
    posture: Posture,
    default_action: Verdict,
    rule_verdict: Verdict,
    rules: Vec<Rule>,
}

impl Filter {
    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn posture(&self) -> Posture {
        self.posture
    }

    /// Verdict for syscalls no rule matches
    pub fn default_action(&self) -> Verdict {
        self.default_action
    }

    /// Verdict for syscalls a rule matches
    pub fn rule_verdict(&self) -> Verdict {
        self.rule_verdict
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Verdict for one invocation, computed from the rules directly.
    pub fn evaluate(&self, nr: i64, args: &[u64; 6]) -> Verdict {
        let hit = self
            .rules
            .iter()
            .filter(|rule| rule.nr == nr)
            .any(|rule| rule.matches(args));
        if hit {
            self.rule_verdict
        } else {
            self.default_action
        }
    }

    /// Lower to a BPF program.
    pub fn to_bpf(&self) -> Result<BpfProgram> {
        codegen::lower(self)
    }

    /// Write the program as raw `sock_filter` records, as `bwrap --seccomp` reads it.
    pub fn export<W: Write>(&self, out: &mut W) -> Result<()> {
        let program = self.to_bpf()?;
        codegen::write_program(&program, out)?;
        debug!("Exported {} BPF instructions", program.len());
        Ok(())
    }
}

/// Build a deny-by-default filter from a parsed rule set.
///
/// Unknown syscalls are skipped with a warning: dropping an allow rule only
/// removes a capability. On architectures without conditional filtering every
/// conditional rule becomes an unconditional allow.
pub fn compile_whitelist(rule_set: &RuleSet, arch: Arch) -> Result<Filter> {
    let conditionals = arch.supports_conditionals();
    let mut rules = Vec::with_capacity(rule_set.len());

    for parsed in &rule_set.rules {
        let Some(nr) = sysno::resolve(arch, &parsed.syscall) else {
            warn!(
                "seccomp: unknown system call: {} (line {})",
                parsed.syscall, parsed.line
            );
            continue;
        };

        let conditions = if conditionals {
            coalesce(&parsed.conditions)
        } else {
            if !parsed.is_unconditional() {
                debug!(
                    "seccomp: {} has no conditional filtering, allowing {} unconditionally",
                    arch, parsed.syscall
                );
            }
            BTreeMap::new()
        };

        rules.push(Rule {
            syscall: parsed.syscall.clone(),
            nr,
            conditions,
        });
    }

    info!(
        "Compiled whitelist for {}: {} of {} rules",
        arch,
        rules.len(),
        rule_set.len()
    );

    Ok(Filter {
        arch,
        posture: Posture::Whitelist,
        default_action: Verdict::Errno(DENY_ERRNO),
        rule_verdict: Verdict::Allow,
        rules,
    })
}

/// Parse rule-file text with a fresh built-in constant table for `arch` and
/// compile it.
pub fn compile_whitelist_text(text: &str, arch: Arch) -> Result<Filter> {
    let mut constants = ConstantTable::for_target(arch);
    let rule_set = parser::parse(text, &mut constants)?;
    compile_whitelist(&rule_set, arch)
}

/// Build the allow-by-default filter denying the static blacklist.
///
/// Every listed name must exist on `arch`; a blacklist silently missing an
/// entry would not provide the protection it claims.
pub fn compile_blacklist(arch: Arch) -> Result<Filter> {
    let rules = denied_syscalls(arch)
        .map(|name| {
            debug!(
                "seccomp: denying {}: {}",
                name,
                deny_reason(name).unwrap_or("legacy syscall")
            );
            sysno::resolve(arch, name)
                .map(|nr| Rule::unconditional(name, nr))
                .ok_or_else(|| SeccompError::UnknownSyscall {
                    name: name.to_string(),
                    arch,
                })
        })
        .collect::<Result<Vec<_>>>()?;

    info!("Compiled blacklist for {}: {} denied syscalls", arch, rules.len());

    Ok(Filter {
        arch,
        posture: Posture::Blacklist,
        default_action: Verdict::Allow,
        rule_verdict: Verdict::Errno(DENY_ERRNO),
        rules,
    })
}

/// Compile a profile of either posture. `rules` is only read for whitelists.
pub fn compile_profile(posture: Posture, rules: &str, arch: Arch) -> Result<Filter> {
    match posture {
        Posture::Whitelist => compile_whitelist_text(rules, arch),
        Posture::Blacklist => compile_blacklist(arch),
    }
}
