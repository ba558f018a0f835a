//! Decides, per intercepted syscall, which tracee buffer carries its effect
//! and whether replay may let the kernel execute it again.

use crate::{
    error::Result,
    kernel_abi::{SupportedArch, ARCH_GET_FS, ARCH_GET_GS, USER_DESC_SIZE},
    registers::Registers,
    remote_ptr::{RemotePtr, Void},
    session::Tracee,
    syscall_classifier::{Policy, SyscallDesc},
    trace::syscall_record::SyscallRecord,
};
use std::cmp::min;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Payload {
    /// The kernel stores `len` bytes at `addr` before returning.
    KernelWritten { addr: RemotePtr<Void>, len: usize },
    /// The tracee hands `len` bytes at `addr` to the kernel for `fd`.
    TraceeWritten {
        fd: i32,
        addr: RemotePtr<Void>,
        len: usize,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RewritePlan {
    pub payload: Option<Payload>,
    /// When false the syscall is suppressed at entry and its recorded effect injected at exit.
    pub replay_natively: bool,
}

impl RewritePlan {
    fn native() -> RewritePlan {
        RewritePlan {
            payload: None,
            replay_natively: true,
        }
    }

    pub fn kernel_written(&self) -> Option<(RemotePtr<Void>, usize)> {
        match self.payload {
            Some(Payload::KernelWritten { addr, len }) => Some((addr, len)),
            _ => None,
        }
    }
}

pub fn plan(arch: SupportedArch, desc: &SyscallDesc, args: &[u64]) -> RewritePlan {
    let arg = |i: usize| args.get(i).copied().unwrap_or(0);
    if desc.policy == Policy::Passthrough {
        return RewritePlan::native();
    }

    match desc.name {
        "write" => RewritePlan {
            payload: Some(Payload::TraceeWritten {
                fd: arg(0) as i32,
                addr: RemotePtr::new_from_val(arg(1)),
                len: arg(2) as usize,
            }),
            replay_natively: false,
        },
        // The 32-bit arch_prctl only knows the vdso codes and never touches fs/gs.
        "arch_prctl" if arch == SupportedArch::X64 => match arg(0) {
            ARCH_GET_FS | ARCH_GET_GS => RewritePlan {
                payload: Some(Payload::KernelWritten {
                    addr: RemotePtr::new_from_val(arg(1)),
                    len: 8,
                }),
                replay_natively: false,
            },
            // ARCH_SET_FS, ARCH_SET_GS and the rest mutate segment state and must really happen.
            _ => RewritePlan::native(),
        },
        "get_thread_area" => RewritePlan {
            payload: Some(Payload::KernelWritten {
                addr: RemotePtr::new_from_val(arg(0)),
                len: USER_DESC_SIZE,
            }),
            replay_natively: false,
        },
        // The kernel writes back entry_number; the recorded descriptor is re-injected afterwards.
        "set_thread_area" => RewritePlan {
            payload: Some(Payload::KernelWritten {
                addr: RemotePtr::new_from_val(arg(0)),
                len: USER_DESC_SIZE,
            }),
            replay_natively: true,
        },
        _ => RewritePlan::native(),
    }
}

/// At syscall exit during recording: the bytes that make up the call's effect.
pub fn capture<T: Tracee + ?Sized>(
    tracee: &T,
    plan: &RewritePlan,
    result: i64,
) -> Result<Option<Vec<u8>>> {
    if result < 0 {
        return Ok(None);
    }
    match plan.payload {
        None => Ok(None),
        Some(Payload::KernelWritten { addr, len }) => Ok(Some(tracee.read_vec(addr, len)?)),
        Some(Payload::TraceeWritten { addr, len, .. }) => {
            let n = min(result as u64, len as u64) as usize;
            Ok(Some(tracee.read_vec(addr, n)?))
        }
    }
}

/// At syscall exit during replay: reproduce the recorded effect in the tracee.
/// Kernel-written bytes go to the pointer argument of *this* run. `forced_result`
/// overrides the recorded return value; a forced failure leaves memory untouched.
pub fn inject<T: Tracee + ?Sized>(
    tracee: &mut T,
    regs: &mut Registers,
    plan: &RewritePlan,
    record: &SyscallRecord,
    forced_result: Option<i64>,
) -> Result<()> {
    let result = forced_result.unwrap_or(record.result_code);
    if let (Some((addr, len)), Some(bytes)) = (plan.kernel_written(), &record.captured_output) {
        if result >= 0 && !addr.is_null() {
            let n = min(len, bytes.len());
            tracee.write_bytes(addr, &bytes[..n])?;
        }
    }
    regs.set_syscall_result(result);
    Ok(())
}
