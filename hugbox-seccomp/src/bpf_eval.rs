//! Minimal classic-BPF interpreter for checking compiled filters in tests.
//!
//! Covers the instruction subset seccompiler emits.

use seccompiler::BpfProgram;

pub const RET_KILL_PROCESS: u32 = 0x8000_0000;
pub const RET_ALLOW: u32 = 0x7fff_0000;
pub const RET_ERRNO_EPERM: u32 = 0x0005_0000 | 1;

const LD_W_ABS: u16 = 0x20;
const ALU_AND_K: u16 = 0x54;
const JMP_JA: u16 = 0x05;
const JMP_JEQ_K: u16 = 0x15;
const JMP_JGT_K: u16 = 0x25;
const JMP_JGE_K: u16 = 0x35;
const JMP_JSET_K: u16 = 0x45;
const RET_K: u16 = 0x06;

/// `struct seccomp_data` for one invocation
fn seccomp_data(arch: u32, nr: u32, args: [u64; 6]) -> [u8; 64] {
    let mut data = [0u8; 64];
    data[0..4].copy_from_slice(&nr.to_le_bytes());
    data[4..8].copy_from_slice(&arch.to_le_bytes());
    // instruction_pointer stays zero
    for (i, arg) in args.iter().enumerate() {
        let off = 16 + i * 8;
        data[off..off + 8].copy_from_slice(&arg.to_le_bytes());
    }
    data
}

/// Run `program` and return the seccomp return value.
pub fn run(program: &BpfProgram, arch: u32, nr: u32, args: [u64; 6]) -> u32 {
    let data = seccomp_data(arch, nr, args);
    let mut acc: u32 = 0;
    let mut pc = 0usize;

    loop {
        let insn = &program[pc];
        let k = insn.k;
        let branch = |taken: bool| 1 + usize::from(if taken { insn.jt } else { insn.jf });

        pc += match insn.code {
            LD_W_ABS => {
                let off = k as usize;
                acc = u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
                1
            }
            ALU_AND_K => {
                acc &= k;
                1
            }
            JMP_JA => 1 + k as usize,
            JMP_JEQ_K => branch(acc == k),
            JMP_JGT_K => branch(acc > k),
            JMP_JGE_K => branch(acc >= k),
            JMP_JSET_K => branch(acc & k != 0),
            RET_K => return k,
            code => panic!("unsupported BPF opcode {code:#x} at {pc}"),
        };
    }
}
