//! Lowering of compiled filters to BPF

use std::collections::BTreeMap;
use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use hugbox_common::Arch;
use seccompiler::{
    BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter,
    SeccompRule, TargetArch,
};

use crate::compiler::{Filter, Rule, Verdict};
use crate::error::Result;

fn target_arch(arch: Arch) -> TargetArch {
    match arch {
        Arch::X86_64 => TargetArch::x86_64,
        Arch::Aarch64 => TargetArch::aarch64,
        Arch::Riscv64 => TargetArch::riscv64,
    }
}

fn action(verdict: Verdict) -> SeccompAction {
    match verdict {
        Verdict::Allow => SeccompAction::Allow,
        Verdict::Errno(errno) => SeccompAction::Errno(errno),
    }
}

/// Expand a rule's per-index alternatives into AND-clauses.
///
/// seccompiler ORs the rules of a syscall and ANDs the conditions inside a
/// rule, so `{0: {a, b}, 1: {c}}` becomes `[a && c, b && c]`. Index and value
/// order come from the sorted maps.
fn expand(rule: &Rule) -> Result<Vec<SeccompRule>> {
    let mut clauses: Vec<Vec<SeccompCondition>> = vec![Vec::new()];

    for (&arg, values) in &rule.conditions {
        let mut next = Vec::with_capacity(clauses.len() * values.len());
        for clause in &clauses {
            for &value in values {
                let mut extended = clause.clone();
                extended.push(SeccompCondition::new(
                    arg,
                    SeccompCmpArgLen::Qword,
                    SeccompCmpOp::Eq,
                    value,
                )?);
                next.push(extended);
            }
        }
        clauses = next;
    }

    let rules = clauses
        .into_iter()
        .map(SeccompRule::new)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rules)
}

/// Lower a filter to a BPF program.
pub fn lower(filter: &Filter) -> Result<BpfProgram> {
    // None: matched unconditionally
    let mut by_nr: BTreeMap<i64, Option<Vec<SeccompRule>>> = BTreeMap::new();

    for rule in filter.rules() {
        let entry = by_nr.entry(rule.nr).or_insert_with(|| Some(Vec::new()));
        if rule.is_unconditional() {
            *entry = None;
        } else if let Some(alternatives) = entry {
            alternatives.extend(expand(rule)?);
        }
    }

    let rules = by_nr
        .into_iter()
        .map(|(nr, alternatives)| (nr, alternatives.unwrap_or_default()))
        .collect();

    let seccomp_filter = SeccompFilter::new(
        rules,
        action(filter.default_action()),
        action(filter.rule_verdict()),
        target_arch(filter.arch()),
    )?;

    Ok(BpfProgram::try_from(seccomp_filter)?)
}

/// Write `program` as packed `sock_filter` records.
///
/// Record layout: u16 code, u8 jt, u8 jf, u32 k.
pub fn write_program<W: Write>(program: &BpfProgram, out: &mut W) -> std::io::Result<()> {
    for insn in program {
        out.write_u16::<LittleEndian>(insn.code)?;
        out.write_u8(insn.jt)?;
        out.write_u8(insn.jf)?;
        out.write_u32::<LittleEndian>(insn.k)?;
    }
    out.flush()
}
