use crate::{
    error::{HarnessError, Result},
    kernel_abi::SupportedArch,
    log::LogLevel::{LogDebug, LogWarn},
    registers::Registers,
    remote_ptr::{RemotePtr, Void},
    scoped_fd::ScopedFd,
    session::Tracee,
    wait_status::{MaybeStopSignal, WaitStatus, WaitType},
    workloads::Workload,
};
use nix::{
    errno::Errno,
    sys::{
        ptrace,
        signal::{kill, Signal},
    },
    unistd::{fork, read, ForkResult, Pid},
};
use std::{
    convert::TryFrom,
    fs::{File, OpenOptions},
    mem,
    os::unix::{fs::FileExt, io::RawFd},
    ptr,
};

/// Exit status of a child that could not set itself up for tracing.
const SPAWN_FAILED: i32 = 126;

/// One forked workload under ptrace. The tracer is the thread that called
/// `spawn()`; all other methods must be called from that thread too.
pub struct TracedProcess {
    pid: Pid,
    arch: SupportedArch,
    /// /proc/<pid>/mem, opened once the child is stopped under our control.
    mem: Option<File>,
    stdout: ScopedFd,
    output: Vec<u8>,
    exit_status: Option<WaitStatus>,
}

impl TracedProcess {
    /// Forks `workload` with its stdout on a pipe back to us. Returns with the
    /// child stopped before its first instruction of workload code.
    pub fn spawn(workload: &Workload) -> Result<TracedProcess> {
        let (stdout_read, stdout_write) = ScopedFd::pipe()?;
        let fork_result = unsafe { fork() }?;
        let child = match fork_result {
            ForkResult::Child => unsafe { run_child(workload.entry, stdout_write.as_raw()) },
            ForkResult::Parent { child } => child,
        };
        drop(stdout_write);
        // Reads never block: another fork()ing thread can inherit the write end,
        // so EOF isn't a reliable end-of-output signal.
        stdout_read.set_nonblocking()?;

        let mut t = TracedProcess {
            pid: child,
            arch: SupportedArch::default(),
            mem: None,
            stdout: stdout_read,
            output: Vec::new(),
            exit_status: None,
        };

        let status = t.wait()?;
        if status.maybe_stop_sig() != libc::SIGSTOP {
            return Err(HarnessError::InvalidState(format!(
                "workload `{}' did not stop for tracing: {}",
                workload.name, status
            )));
        }
        ptrace::setoptions(
            child,
            ptrace::Options::PTRACE_O_TRACESYSGOOD | ptrace::Options::PTRACE_O_EXITKILL,
        )?;
        t.mem = Some(
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(format!("/proc/{}/mem", child))?,
        );
        t.arch = t.regs()?.arch();
        log!(
            LogDebug,
            "spawned `{}' as {} ({})",
            workload.name,
            child,
            t.arch
        );
        Ok(t)
    }

    pub fn arch(&self) -> SupportedArch {
        self.arch
    }

    pub fn is_alive(&self) -> bool {
        self.exit_status.is_none()
    }

    pub fn exit_status(&self) -> Option<WaitStatus> {
        self.exit_status
    }

    /// Continue to the next syscall entry/exit stop, delivering `sig` if set.
    pub fn resume_syscall(&mut self, sig: MaybeStopSignal) -> Result<()> {
        let signal = if sig.is_sig() {
            Some(Signal::try_from(sig.unwrap_sig())?)
        } else {
            None
        };
        ptrace::syscall(self.pid, signal)?;
        Ok(())
    }

    /// Resume until the next syscall stop, delivering any signal that stops
    /// the tracee on the way. The returned status is either a syscall stop or
    /// the tracee's exit.
    pub fn resume_to_syscall_stop(&mut self) -> Result<WaitStatus> {
        let mut pending_sig = MaybeStopSignal::new_none();
        loop {
            self.resume_syscall(pending_sig)?;
            let status = self.wait()?;
            pending_sig = match status.wait_type() {
                WaitType::SignalStop => status.maybe_stop_sig(),
                WaitType::PtraceEvent => MaybeStopSignal::new_none(),
                _ => return Ok(status),
            };
        }
    }

    /// Blocks for the next stop or the exit of the tracee.
    pub fn wait(&mut self) -> Result<WaitStatus> {
        if let Some(status) = self.exit_status {
            return Err(HarnessError::InvalidState(format!(
                "wait on tracee {} which already exited: {}",
                self.pid, status
            )));
        }
        let mut raw_status: i32 = 0;
        loop {
            let ret = unsafe { libc::waitpid(self.pid.as_raw(), &mut raw_status, libc::__WALL) };
            if ret == self.pid.as_raw() {
                break;
            }
            match Errno::last() {
                Errno::EINTR => continue,
                e => return Err(e.into()),
            }
        }

        let status = WaitStatus::new(raw_status);
        log!(LogDebug, "tracee {} status {}", self.pid, status);
        self.drain_output()?;
        if let WaitType::Exit | WaitType::FatalSignal = status.wait_type() {
            self.exit_status = Some(status);
            self.mem = None;
        }
        Ok(status)
    }

    pub fn regs(&self) -> Result<Registers> {
        Registers::from_ptrace(ptrace::getregs(self.pid)?)
    }

    pub fn set_regs(&self, regs: &Registers) -> Result<()> {
        ptrace::setregs(self.pid, regs.get_ptrace())?;
        Ok(())
    }

    /// SIGKILL the tracee if it is still alive and reap it.
    pub fn kill(&mut self) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        match kill(self.pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => (),
            Err(e) => return Err(e.into()),
        }
        while self.is_alive() {
            self.wait()?;
        }
        Ok(())
    }

    /// Everything the tracee wrote to its stdout so far.
    pub fn take_output(&mut self) -> Vec<u8> {
        mem::take(&mut self.output)
    }

    fn drain_output(&mut self) -> Result<()> {
        let mut buf = [0u8; 4096];
        loop {
            match read(self.stdout.as_raw(), &mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => self.output.extend_from_slice(&buf[..n]),
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn mem(&self) -> Result<&File> {
        self.mem.as_ref().ok_or_else(|| {
            HarnessError::InvalidState(format!("no memory access to tracee {}", self.pid))
        })
    }
}

impl Tracee for TracedProcess {
    fn read_bytes(&self, addr: RemotePtr<Void>, buf: &mut [u8]) -> Result<()> {
        self.mem()?.read_exact_at(buf, addr.as_u64())?;
        Ok(())
    }

    fn write_bytes(&mut self, addr: RemotePtr<Void>, buf: &[u8]) -> Result<()> {
        self.mem()?.write_all_at(buf, addr.as_u64())?;
        Ok(())
    }
}

impl Drop for TracedProcess {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            log!(LogWarn, "could not reap tracee {}: {}", self.pid, e);
        }
    }
}

/// Runs in the forked child. Only async-signal-safe calls from here on: other
/// threads of the supervisor may have held allocator or stdio locks at fork time.
unsafe fn run_child(entry: fn() -> i32, stdout_fd: RawFd) -> ! {
    if libc::dup2(stdout_fd, libc::STDOUT_FILENO) < 0 {
        libc::_exit(SPAWN_FAILED);
    }
    reset_signal_dispositions();
    if libc::ptrace(
        libc::PTRACE_TRACEME,
        0,
        ptr::null_mut::<libc::c_void>(),
        ptr::null_mut::<libc::c_void>(),
    ) < 0
    {
        libc::_exit(SPAWN_FAILED);
    }
    // Not raise(): glibc wraps it in extra sigprocmask syscalls.
    libc::kill(libc::getpid(), libc::SIGSTOP);
    libc::_exit(entry())
}

/// The supervisor's handlers (std installs SIGSEGV/SIGBUS ones) and mask are
/// inherited across fork(). Drop them so a faulting workload dies of its
/// signal instead of running handler syscalls we would intercept.
unsafe fn reset_signal_dispositions() {
    for sig in 1..=libc::SIGRTMAX() {
        if sig != libc::SIGKILL && sig != libc::SIGSTOP {
            // Fails harmlessly for the signals libc reserves.
            libc::signal(sig, libc::SIG_DFL);
        }
    }
    let mut empty: libc::sigset_t = mem::zeroed();
    libc::sigemptyset(&mut empty);
    libc::sigprocmask(libc::SIG_SETMASK, &empty, ptr::null_mut());
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use super::*;
    use crate::workloads::lookup;

    #[test]
    fn spawn_stops_child_and_kill_reaps_it() {
        let mut t = TracedProcess::spawn(lookup("arch_prctl").unwrap()).unwrap();
        assert!(t.is_alive());
        assert_eq!(t.arch(), SupportedArch::X64);
        t.kill().unwrap();
        assert!(!t.is_alive());
        assert!(matches!(
            t.exit_status().map(|s| s.wait_type()),
            Some(WaitType::FatalSignal)
        ));
    }

    #[test]
    fn runs_to_exit_untouched() {
        let mut t = TracedProcess::spawn(lookup("arch_prctl").unwrap()).unwrap();
        let mut syscall_stops = 0;
        loop {
            t.resume_syscall(MaybeStopSignal::new_none()).unwrap();
            let status = t.wait().unwrap();
            match status.wait_type() {
                WaitType::SyscallStop => syscall_stops += 1,
                WaitType::Exit => break,
                other => panic!("unexpected {:?}", other),
            }
        }
        // arch_prctl and write enter and exit; exit_group only enters.
        assert_eq!(syscall_stops, 5);
        assert_eq!(t.exit_status().and_then(|s| s.exit_code()), Some(0));
        assert_eq!(t.take_output(), b"EXIT-SUCCESS\n".to_vec());
    }

    #[test]
    fn signals_are_forwarded_on_the_way_to_a_syscall_stop() {
        let mut t = TracedProcess::spawn(lookup("arch_prctl").unwrap()).unwrap();
        // Queued while the child sits in its initial stop; reported before its first syscall.
        kill(t.pid, Signal::SIGWINCH).unwrap();
        let status = t.resume_to_syscall_stop().unwrap();
        assert_eq!(status.wait_type(), WaitType::SyscallStop);
        assert_eq!(
            t.regs().unwrap().original_syscallno(),
            crate::kernel_abi::x64::ARCH_PRCTL
        );
        t.kill().unwrap();
    }

    #[test]
    fn faulting_child_dies_without_running_a_handler() {
        // Our own process has std's SIGSEGV handler installed.
        let mut t = TracedProcess::spawn(lookup("segfault").unwrap()).unwrap();
        let mut pending = MaybeStopSignal::new_none();
        loop {
            t.resume_syscall(pending).unwrap();
            pending = MaybeStopSignal::new_none();
            let status = t.wait().unwrap();
            match status.wait_type() {
                WaitType::SignalStop => {
                    assert_eq!(status.maybe_stop_sig(), libc::SIGSEGV);
                    pending = status.maybe_stop_sig();
                }
                WaitType::FatalSignal => break,
                other => panic!("unexpected {:?}: {}", other, status),
            }
        }
        assert_eq!(
            t.exit_status().and_then(|s| s.fatal_sig()),
            Some(libc::SIGSEGV)
        );
    }
}
