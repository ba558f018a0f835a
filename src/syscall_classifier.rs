//! Static per-architecture table of the syscalls the harness knows how to
//! intercept, and what it does with each of them.

use crate::{
    error::{HarnessError, Result},
    kernel_abi::{x64, x86, SupportedArch},
};
use std::fmt::{self, Display, Formatter};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Policy {
    /// Runs natively in both recording and replay; the result is still checked.
    Passthrough,
    /// Never executed during replay; the recorded effect is reproduced by the harness.
    Emulate,
    /// Arguments and/or results are rewritten on the way through.
    Rewrite,
}

impl Display for Policy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Passthrough => f.write_str("passthrough"),
            Policy::Emulate => f.write_str("emulate"),
            Policy::Rewrite => f.write_str("rewrite"),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ArgKind {
    /// Compared between recording and replay.
    Value,
    /// A tracee address. Allowed to differ between runs.
    Pointer,
}

#[derive(Debug, Eq, PartialEq)]
pub struct SyscallDesc {
    pub name: &'static str,
    pub number: i32,
    pub policy: Policy,
    pub args: &'static [ArgKind],
}

impl SyscallDesc {
    pub fn nargs(&self) -> usize {
        self.args.len()
    }

    /// Syscalls that do not return to the tracee.
    pub fn is_exit(&self) -> bool {
        self.name == "exit" || self.name == "exit_group"
    }
}

use ArgKind::*;
use Policy::*;

macro_rules! syscall_table {
    ($($name:ident => $number:expr, $policy:expr, [$($arg:expr),*];)+) => {
        &[$(SyscallDesc {
            name: stringify!($name),
            number: $number,
            policy: $policy,
            args: &[$($arg),*],
        },)+]
    };
}

static X64_SYSCALLS: &[SyscallDesc] = syscall_table! {
    write => x64::WRITE, Emulate, [Value, Pointer, Value];
    exit => x64::EXIT, Passthrough, [Value];
    exit_group => x64::EXIT_GROUP, Passthrough, [Value];
    arch_prctl => x64::ARCH_PRCTL, Rewrite, [Value, Pointer];
    set_thread_area => x64::SET_THREAD_AREA, Rewrite, [Pointer];
    get_thread_area => x64::GET_THREAD_AREA, Rewrite, [Pointer];
};

static X86_SYSCALLS: &[SyscallDesc] = syscall_table! {
    write => x86::WRITE, Emulate, [Value, Pointer, Value];
    exit => x86::EXIT, Passthrough, [Value];
    exit_group => x86::EXIT_GROUP, Passthrough, [Value];
    arch_prctl => x86::ARCH_PRCTL, Rewrite, [Value, Pointer];
    set_thread_area => x86::SET_THREAD_AREA, Rewrite, [Pointer];
    get_thread_area => x86::GET_THREAD_AREA, Rewrite, [Pointer];
};

pub fn supported_syscalls(arch: SupportedArch) -> &'static [SyscallDesc] {
    match arch {
        SupportedArch::X86 => X86_SYSCALLS,
        SupportedArch::X64 => X64_SYSCALLS,
    }
}

pub fn classify(arch: SupportedArch, syscallno: i32) -> Result<&'static SyscallDesc> {
    supported_syscalls(arch)
        .iter()
        .find(|d| d.number == syscallno)
        .ok_or(HarnessError::UnsupportedSyscall { arch, syscallno })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_supported_pair_has_a_policy() {
        for arch in [SupportedArch::X86, SupportedArch::X64] {
            for desc in supported_syscalls(arch) {
                let found = classify(arch, desc.number).unwrap();
                assert_eq!(found, desc);
            }
            assert_eq!(supported_syscalls(arch).len(), 6);
        }
    }

    #[test]
    fn arch_prctl_is_rewritten() {
        let desc = classify(SupportedArch::X64, 158).unwrap();
        assert_eq!(desc.name, "arch_prctl");
        assert_eq!(desc.policy, Rewrite);
        assert_eq!(desc.args, &[Value, Pointer]);

        let desc = classify(SupportedArch::X86, 384).unwrap();
        assert_eq!(desc.name, "arch_prctl");
    }

    #[test]
    fn numbers_differ_per_arch() {
        // 1 is write on x86_64 but exit on x86.
        assert_eq!(classify(SupportedArch::X64, 1).unwrap().policy, Emulate);
        assert_eq!(classify(SupportedArch::X86, 1).unwrap().policy, Passthrough);
        assert!(classify(SupportedArch::X86, 1).unwrap().is_exit());
    }

    #[test]
    fn unknown_syscall_is_unsupported() {
        // openat
        match classify(SupportedArch::X64, 257) {
            Err(HarnessError::UnsupportedSyscall { arch, syscallno }) => {
                assert_eq!(arch, SupportedArch::X64);
                assert_eq!(syscallno, 257);
            }
            _ => panic!("expected UnsupportedSyscall"),
        }
        assert!(classify(SupportedArch::X86, -1).is_err());
    }
}
