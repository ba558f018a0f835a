use crate::{
    consistency_checker::Violation,
    error::Result,
    kernel_metadata::signal_name,
    remote_ptr::{RemotePtr, Void},
    trace::recording_log::SessionId,
    wait_status::{WaitStatus, WaitType},
};
use memchr::memmem;
use std::{
    convert::TryInto,
    fmt::{self, Display, Formatter},
};

pub mod record_session;
pub mod replay_engine;
pub mod replay_session;
pub mod traced_process;

/// Printed by a workload, in one write, when it reaches its end.
pub const COMPLETION_MARKER: &[u8] = b"EXIT-SUCCESS";

/// Memory access to a stopped tracee.
pub trait Tracee {
    fn read_bytes(&self, addr: RemotePtr<Void>, buf: &mut [u8]) -> Result<()>;

    fn write_bytes(&mut self, addr: RemotePtr<Void>, buf: &[u8]) -> Result<()>;

    fn read_vec(&self, addr: RemotePtr<Void>, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_bytes(addr, &mut buf)?;
        Ok(buf)
    }

    fn read_u64(&self, addr: RemotePtr<Void>) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_bytes(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    Pass,
    /// The workload exited with a non-zero status, e.g. from a failed `test_assert!`.
    AssertionFailure { exit_code: i32 },
    Crash { signal: i32 },
    /// Exit status 0 but no completion marker on stdout.
    MissingMarker,
    Violation(Violation),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        *self == Verdict::Pass
    }

    /// Verdict for a workload that ran to completion without a checker violation.
    pub fn from_exit(status: WaitStatus, output: &[u8]) -> Verdict {
        match status.wait_type() {
            WaitType::Exit => match status.exit_code() {
                Some(0) if memmem::find(output, COMPLETION_MARKER).is_some() => Verdict::Pass,
                Some(0) => Verdict::MissingMarker,
                Some(exit_code) => Verdict::AssertionFailure { exit_code },
                None => Verdict::MissingMarker,
            },
            WaitType::FatalSignal => Verdict::Crash {
                signal: status.fatal_sig().unwrap_or(0),
            },
            _ => fatal!("Verdict requested for live tracee, status {}", status),
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::AssertionFailure { exit_code } => {
                write!(f, "FAIL: workload exited with status {}", exit_code)
            }
            Verdict::Crash { signal } => write!(f, "FAIL: workload killed by {}", signal_name(*signal)),
            Verdict::MissingMarker => write!(
                f,
                "FAIL: workload exited 0 without printing `{}'",
                String::from_utf8_lossy(COMPLETION_MARKER)
            ),
            Verdict::Violation(v) => write!(f, "FAIL: {}", v),
        }
    }
}

/// What the checker saw for one intercepted syscall that returned to the tracee.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ObservedSyscall {
    pub sequence_number: u64,
    pub syscall_id: i32,
    pub result_code: i64,
    /// Word the kernel (or the harness) stored through the pointer argument, if any.
    pub value: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub verdict: Verdict,
    pub observed: Vec<ObservedSyscall>,
    /// Everything the workload wrote to stdout (record) or what replay reproduced.
    pub output: Vec<u8>,
    /// Syscalls recorded (record) or matched against the log (replay).
    pub intercepted: u64,
}

/// First 8 bytes of a payload as a little-endian word.
pub(crate) fn payload_word(bytes: &[u8]) -> Option<u64> {
    let word: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
    Some(u64::from_le_bytes(word))
}

#[cfg(test)]
pub(crate) mod fake {
    use super::Tracee;
    use crate::{
        error::{HarnessError, Result},
        remote_ptr::{RemotePtr, Void},
    };
    use nix::errno::Errno;

    /// A flat window of tracee memory at `base`; anything outside it faults.
    pub struct FakeTracee {
        pub base: u64,
        pub mem: Vec<u8>,
    }

    impl FakeTracee {
        pub fn new(base: u64, len: usize) -> FakeTracee {
            FakeTracee {
                base,
                mem: vec![0; len],
            }
        }

        fn range(&self, addr: RemotePtr<Void>, len: usize) -> Result<std::ops::Range<usize>> {
            let a = addr.as_u64();
            if a < self.base || a - self.base + len as u64 > self.mem.len() as u64 {
                return Err(HarnessError::Sys(Errno::EFAULT));
            }
            let start = (a - self.base) as usize;
            Ok(start..start + len)
        }
    }

    impl Tracee for FakeTracee {
        fn read_bytes(&self, addr: RemotePtr<Void>, buf: &mut [u8]) -> Result<()> {
            let r = self.range(addr, buf.len())?;
            buf.copy_from_slice(&self.mem[r]);
            Ok(())
        }

        fn write_bytes(&mut self, addr: RemotePtr<Void>, buf: &[u8]) -> Result<()> {
            let r = self.range(addr, buf.len())?;
            self.mem[r].copy_from_slice(buf);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_from_exit() {
        let ok = WaitStatus::for_exit_code(0);
        assert_eq!(Verdict::from_exit(ok, b"EXIT-SUCCESS\n"), Verdict::Pass);
        assert_eq!(Verdict::from_exit(ok, b"hello\n"), Verdict::MissingMarker);
        assert_eq!(
            Verdict::from_exit(WaitStatus::for_exit_code(1), b"EXIT-SUCCESS\n"),
            Verdict::AssertionFailure { exit_code: 1 }
        );
        assert_eq!(
            Verdict::from_exit(WaitStatus::for_fatal_sig(libc::SIGSEGV), b""),
            Verdict::Crash {
                signal: libc::SIGSEGV
            }
        );
    }

    #[test]
    fn payload_word_needs_eight_bytes() {
        assert_eq!(payload_word(&0x1234u64.to_le_bytes()), Some(0x1234));
        assert_eq!(payload_word(&[1, 2, 3]), None);
    }
}
