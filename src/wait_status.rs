use crate::kernel_metadata::{ptrace_event_name, signal_name};
use libc::{
    PTRACE_EVENT_STOP, SIGSTOP, SIGTRAP, WEXITSTATUS, WIFEXITED, WIFSIGNALED, WIFSTOPPED,
    WSTOPSIG, WTERMSIG,
};
use std::{
    fmt,
    fmt::{Display, Formatter, Result},
    num::NonZeroU8,
};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum WaitType {
    /// Tracee exited normally.
    Exit,
    /// Tracee exited due to fatal signal.
    FatalSignal,
    /// Tracee is in a signal-delivery-stop. Without PTRACE_SEIZE group-stops land here too.
    SignalStop,
    /// Tracee is in a syscall-stop triggered by PTRACE_SYSCALL
    /// and PTRACE_O_TRACESYSGOOD.
    SyscallStop,
    /// Tracee is in a PTRACE_EVENT stop.
    PtraceEvent,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct WaitStatus {
    status: i32,
}

impl Default for WaitStatus {
    fn default() -> Self {
        Self::new(0)
    }
}

impl WaitStatus {
    pub fn new(status: i32) -> WaitStatus {
        WaitStatus { status }
    }

    pub fn wait_type(&self) -> WaitType {
        if self.exit_code().is_some() {
            return WaitType::Exit;
        }

        if self.fatal_sig().is_some() {
            return WaitType::FatalSignal;
        }

        if self.maybe_stop_sig().is_sig() {
            return WaitType::SignalStop;
        }

        if self.is_syscall() {
            return WaitType::SyscallStop;
        }

        if self.maybe_ptrace_event().is_ptrace_event() {
            return WaitType::PtraceEvent;
        }

        fatal!("Status {:#x} not understood", self.status);
    }

    /// Exit code if wait_type() == Exit, otherwise None.
    pub fn exit_code(&self) -> Option<i32> {
        if WIFEXITED(self.status) {
            Some(WEXITSTATUS(self.status))
        } else {
            None
        }
    }

    /// Fatal signal if wait_type() == FatalSignal, otherwise None.
    pub fn fatal_sig(&self) -> Option<i32> {
        let termsig = WTERMSIG(self.status);
        if WIFSIGNALED(self.status) && termsig > 0 {
            Some(termsig)
        } else {
            None
        }
    }

    /// Stop signal if wait_type() == SignalStop. A zero signal is converted to SIGSTOP.
    pub fn maybe_stop_sig(&self) -> MaybeStopSignal {
        // A non-zero high byte is a ptrace event stop, not a signal.
        if !WIFSTOPPED(self.status) || ((self.status >> 16) & 0xff != 0) {
            return MaybeStopSignal::new_none();
        }

        let mut sig: i32 = WSTOPSIG(self.status);
        if sig == (SIGTRAP | 0x80) {
            // PTRACE_O_TRACESYSGOOD syscall-enter or syscall-exit stop
            return MaybeStopSignal::new_none();
        }

        sig &= !0x80;
        if sig != 0 {
            MaybeStopSignal::new_sig(sig)
        } else {
            MaybeStopSignal::new_sig(SIGSTOP)
        }
    }

    pub fn is_syscall(&self) -> bool {
        if self.maybe_ptrace_event().is_ptrace_event() || !WIFSTOPPED(self.status) {
            return false;
        }

        WSTOPSIG(self.status) == (SIGTRAP | 0x80)
    }

    /// ptrace event if wait_type() == PtraceEvent, None otherwise.
    pub fn maybe_ptrace_event(&self) -> MaybePtraceEvent {
        if !WIFSTOPPED(self.status) {
            return MaybePtraceEvent::new_none();
        }
        let event = (self.status >> 16) & 0xff;
        if event == PTRACE_EVENT_STOP {
            MaybePtraceEvent::new_none()
        } else {
            MaybePtraceEvent::new_event(event)
        }
    }

    #[cfg(test)]
    pub fn for_exit_code(code: i32) -> WaitStatus {
        debug_assert!((0..0x100).contains(&code));
        WaitStatus { status: code << 8 }
    }

    #[cfg(test)]
    pub fn for_fatal_sig(sig: i32) -> WaitStatus {
        debug_assert!((1..0x80).contains(&sig));
        WaitStatus { status: sig }
    }

    #[cfg(test)]
    pub fn for_stop_sig(sig: i32) -> WaitStatus {
        debug_assert!((1..0x80).contains(&sig));
        WaitStatus {
            status: (sig << 8) | 0x7f,
        }
    }

    /// A syscall stop as reported with PTRACE_O_TRACESYSGOOD.
    #[cfg(test)]
    pub fn for_syscall() -> WaitStatus {
        WaitStatus {
            status: ((SIGTRAP | 0x80) << 8) | 0x7f,
        }
    }

    #[cfg(test)]
    pub fn for_ptrace_event(ptrace_event: i32) -> WaitStatus {
        debug_assert!((1..0x100).contains(&ptrace_event));
        WaitStatus {
            status: (ptrace_event << 16) | (SIGTRAP << 8) | 0x7f,
        }
    }
}

impl Display for WaitStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{:#x}", self.status)?;
        match self.wait_type() {
            WaitType::Exit => write!(f, " (EXIT-{})", self.exit_code().unwrap_or(0)),
            WaitType::FatalSignal => write!(
                f,
                " (FATAL-{})",
                signal_name(self.fatal_sig().unwrap_or(0))
            ),
            WaitType::SignalStop => write!(f, " (STOP-{})", self.maybe_stop_sig()),
            WaitType::SyscallStop => write!(f, " (SYSCALL)"),
            WaitType::PtraceEvent => write!(f, " ({})", self.maybe_ptrace_event()),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct MaybePtraceEvent(Option<NonZeroU8>);

impl MaybePtraceEvent {
    pub fn is_ptrace_event(&self) -> bool {
        self.0.is_some()
    }

    pub fn new_none() -> MaybePtraceEvent {
        MaybePtraceEvent(None)
    }

    /// Values outside 1..=0xff give `MaybePtraceEvent(None)`
    pub fn new_event(val: i32) -> MaybePtraceEvent {
        if val <= 0 || val > 0xff {
            MaybePtraceEvent(None)
        } else {
            MaybePtraceEvent(NonZeroU8::new(val as u8))
        }
    }
}

impl Display for MaybePtraceEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.0 {
            None => f.write_str("- Not a ptrace event -"),
            Some(ev) => f.write_str(&ptrace_event_name(ev.get() as i32)),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct MaybeStopSignal(Option<NonZeroU8>);

impl MaybeStopSignal {
    pub fn unwrap_sig(&self) -> i32 {
        match self.0 {
            None => panic!("Cannot unwrap"),
            Some(non_zero) => non_zero.get() as i32,
        }
    }

    pub fn is_sig(&self) -> bool {
        self.0.is_some()
    }

    pub fn new_none() -> MaybeStopSignal {
        MaybeStopSignal(None)
    }

    /// Values outside 1..0x80 give `MaybeStopSignal(None)`
    pub fn new_sig(sig: i32) -> MaybeStopSignal {
        if !(1..0x80).contains(&sig) {
            MaybeStopSignal(None)
        } else {
            MaybeStopSignal(NonZeroU8::new(sig as u8))
        }
    }
}

impl PartialEq<i32> for MaybeStopSignal {
    fn eq(&self, other: &i32) -> bool {
        self.0.map_or(false, |op| op.get() as i32 == *other)
    }
}

impl Display for MaybeStopSignal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.0 {
            None => f.write_str("- Not a signal -"),
            Some(sig) => f.write_str(&signal_name(sig.get() as i32)),
        }
    }
}
