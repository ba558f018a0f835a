use crate::{
    error::{HarnessError, Result},
    kernel_abi::SupportedArch,
};
use libc::user_regs_struct;
use std::fmt::{self, Display, Formatter};

use SupportedArch::*;

/// A 64-bit tracer always sees the 64-bit register layout. Compat (x86) tasks
/// keep their 32-bit registers in the low halves.
macro_rules! sd_get_reg {
    ($slf:expr, $x86case:ident, $x64case:ident) => {
        match $slf.arch_ {
            X86 => $slf.regs.$x86case as u32 as u64,
            X64 => $slf.regs.$x64case,
        }
    };
}

macro_rules! sd_set_reg {
    ($slf:expr, $x86case:ident, $x64case:ident, $val:expr) => {
        match $slf.arch_ {
            X86 => $slf.regs.$x86case = $val as u32 as u64,
            X64 => $slf.regs.$x64case = $val as u64,
        }
    };
}

#[derive(Copy, Clone)]
pub struct Registers {
    arch_: SupportedArch,
    regs: user_regs_struct,
}

impl Registers {
    /// Fails with `UnsupportedArch` unless `%cs` is a known user code segment.
    pub fn from_ptrace(regs: user_regs_struct) -> Result<Registers> {
        match SupportedArch::from_cs(regs.cs) {
            Some(arch_) => Ok(Registers { arch_, regs }),
            None => Err(HarnessError::UnsupportedArch { cs: regs.cs }),
        }
    }

    pub fn arch(&self) -> SupportedArch {
        self.arch_
    }

    pub fn get_ptrace(&self) -> user_regs_struct {
        self.regs
    }

    pub fn original_syscallno(&self) -> i32 {
        sd_get_reg!(self, orig_rax, orig_rax) as i32
    }

    /// -1 makes the kernel skip the syscall at a syscall-entry stop.
    pub fn set_original_syscallno(&mut self, syscallno: i64) {
        sd_set_reg!(self, orig_rax, orig_rax, syscallno);
    }

    pub fn syscall_result_signed(&self) -> i64 {
        match self.arch_ {
            X86 => self.regs.rax as u32 as i32 as i64,
            X64 => self.regs.rax as i64,
        }
    }

    pub fn set_syscall_result(&mut self, syscall_result: i64) {
        sd_set_reg!(self, rax, rax, syscall_result);
    }

    /// The six syscall argument registers, in ABI order.
    pub fn syscall_args(&self) -> [u64; 6] {
        [
            self.arg1(),
            self.arg2(),
            self.arg3(),
            self.arg4(),
            self.arg5(),
            self.arg6(),
        ]
    }

    pub fn arg1(&self) -> u64 {
        sd_get_reg!(self, rbx, rdi)
    }

    pub fn arg2(&self) -> u64 {
        sd_get_reg!(self, rcx, rsi)
    }

    pub fn arg3(&self) -> u64 {
        sd_get_reg!(self, rdx, rdx)
    }

    pub fn arg4(&self) -> u64 {
        sd_get_reg!(self, rsi, r10)
    }

    pub fn arg5(&self) -> u64 {
        sd_get_reg!(self, rdi, r8)
    }

    pub fn arg6(&self) -> u64 {
        sd_get_reg!(self, rbp, r9)
    }

    pub fn fs_base(&self) -> u64 {
        self.regs.fs_base
    }

    pub fn gs_base(&self) -> u64 {
        self.regs.gs_base
    }

    pub fn ip(&self) -> u64 {
        sd_get_reg!(self, rip, rip)
    }
}

impl Display for Registers {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ arch:{} ip:{:#x} orig_ax:{} ax:{:#x} args:[{:#x}, {:#x}, {:#x}] fs_base:{:#x} gs_base:{:#x} }}",
            self.arch_,
            self.ip(),
            self.original_syscallno(),
            self.syscall_result_signed(),
            self.arg1(),
            self.arg2(),
            self.arg3(),
            self.fs_base(),
            self.gs_base()
        )
    }
}

#[cfg(test)]
pub(crate) fn zeroed_user_regs() -> user_regs_struct {
    // All-zero is a valid user_regs_struct: it's plain integers.
    unsafe { std::mem::zeroed() }
}
