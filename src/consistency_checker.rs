use crate::{
    kernel_abi::{x64, SupportedArch, ARCH_GET_FS, ARCH_GET_GS, ARCH_SET_FS, ARCH_SET_GS},
    registers::Registers,
    remote_ptr::RemotePtr,
    session::Tracee,
    syscall_rewriter::RewritePlan,
};
use std::fmt::{self, Display, Formatter};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Segment {
    Fs,
    Gs,
}

impl Display for Segment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Fs => f.write_str("fs"),
            Segment::Gs => f.write_str("gs"),
        }
    }
}

/// What a syscall promises the tracee when it returns.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Contract {
    /// Returns 0.
    Succeeds,
    /// Returns 0 and stores the live base of `segment` through the pointer
    /// argument. With `thread_pointer` the base must also obey the x86-64 TLS ABI:
    /// it is non-null and the word it points at is the base itself.
    SegmentBase { segment: Segment, thread_pointer: bool },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ObservedResult {
    pub sequence_number: u64,
    pub syscall: &'static str,
    pub result_code: i64,
    /// Word read back through the pointer argument.
    pub value: Option<u64>,
    /// The tracee's segment base register as the kernel has it right now.
    pub live_base: Option<u64>,
    /// Word at address `value`, when `value` is dereferenceable.
    pub thread_pointer_word: Option<u64>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Violation {
    pub sequence_number: u64,
    pub syscall: String,
    pub expected: String,
    pub actual: String,
}

impl Display for Violation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}' (#{}) expected {}, got {}",
            self.syscall, self.sequence_number, self.expected, self.actual
        )
    }
}

pub fn contract_for(arch: SupportedArch, syscallno: i32, args: &[u64]) -> Option<Contract> {
    if arch != SupportedArch::X64 {
        return None;
    }
    match syscallno {
        x64::ARCH_PRCTL => match args.first().copied() {
            Some(ARCH_GET_FS) => Some(Contract::SegmentBase {
                segment: Segment::Fs,
                thread_pointer: true,
            }),
            Some(ARCH_GET_GS) => Some(Contract::SegmentBase {
                segment: Segment::Gs,
                thread_pointer: false,
            }),
            Some(ARCH_SET_FS) | Some(ARCH_SET_GS) => Some(Contract::Succeeds),
            _ => None,
        },
        x64::GET_THREAD_AREA | x64::SET_THREAD_AREA => Some(Contract::Succeeds),
        _ => None,
    }
}

/// Reads back what the tracee is about to see. Unreadable memory shows up as `None`
/// fields rather than an error: it is the checker's job to judge it.
pub fn observe<T: Tracee + ?Sized>(
    tracee: &T,
    regs: &Registers,
    plan: &RewritePlan,
    contract: &Contract,
    sequence_number: u64,
    syscall: &'static str,
) -> ObservedResult {
    let result_code = regs.syscall_result_signed();
    let mut observed = ObservedResult {
        sequence_number,
        syscall,
        result_code,
        value: None,
        live_base: None,
        thread_pointer_word: None,
    };

    if let Contract::SegmentBase {
        segment,
        thread_pointer,
    } = *contract
    {
        observed.live_base = Some(match segment {
            Segment::Fs => regs.fs_base(),
            Segment::Gs => regs.gs_base(),
        });
        if result_code == 0 {
            if let Some((addr, _)) = plan.kernel_written() {
                observed.value = tracee.read_u64(addr).ok();
            }
        }
        if thread_pointer {
            if let Some(v) = observed.value.filter(|v| *v != 0) {
                observed.thread_pointer_word = tracee.read_u64(RemotePtr::new_from_val(v)).ok();
            }
        }
    }

    observed
}

pub fn verify(observed: &ObservedResult, contract: &Contract) -> Result<(), Violation> {
    let violation = |expected: String, actual: String| Violation {
        sequence_number: observed.sequence_number,
        syscall: observed.syscall.to_owned(),
        expected,
        actual,
    };

    if observed.result_code != 0 {
        return Err(violation(
            "result 0".into(),
            format!("result {}", observed.result_code),
        ));
    }

    let (segment, thread_pointer) = match *contract {
        Contract::Succeeds => return Ok(()),
        Contract::SegmentBase {
            segment,
            thread_pointer,
        } => (segment, thread_pointer),
    };

    let value = observed.value.ok_or_else(|| {
        violation(
            format!("{} base stored at the pointer argument", segment),
            "unreadable pointer argument".into(),
        )
    })?;
    let live_base = observed.live_base.unwrap_or(0);
    if value != live_base {
        return Err(violation(
            format!("live {} base {:#x}", segment, live_base),
            format!("{:#x}", value),
        ));
    }
    if thread_pointer {
        if value == 0 {
            return Err(violation("non-null thread pointer".into(), "0x0".into()));
        }
        match observed.thread_pointer_word {
            None => {
                return Err(violation(
                    format!("dereferenceable thread pointer {:#x}", value),
                    "unmapped".into(),
                ))
            }
            Some(word) if word != value => {
                return Err(violation(
                    format!("self-pointer {:#x} at the thread pointer", value),
                    format!("{:#x}", word),
                ))
            }
            Some(_) => (),
        }
    }
    Ok(())
}
