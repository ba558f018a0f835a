use crate::{
    consistency_checker::{contract_for, observe, verify, Violation},
    error::Result,
    log::LogLevel::{LogDebug, LogInfo, LogWarn},
    session::{
        payload_word, replay_engine::ReplayEngine, traced_process::TracedProcess,
        ObservedSyscall, SessionReport, Verdict,
    },
    syscall_classifier::Policy,
    syscall_rewriter::{inject, plan, Payload},
    trace::recording_log::RecordingLog,
    wait_status::{MaybeStopSignal, WaitStatus, WaitType},
    workloads::Workload,
};
use std::io::{self, Write};

#[derive(Clone, Debug, Default)]
pub struct ReplayOptions {
    /// Return value forced onto every Rewrite-policy syscall instead of the recorded one.
    pub inject_result: Option<i64>,
    /// Echo suppressed writes to our own stdout/stderr.
    pub redirect_stdio: bool,
}

/// Re-runs a workload against a sealed recording.
pub struct ReplaySession<'a> {
    log: &'a RecordingLog,
    workload: &'static Workload,
    engine: ReplayEngine,
    options: ReplayOptions,
    output: Vec<u8>,
    observed: Vec<ObservedSyscall>,
    intercepted: u64,
}

enum Step {
    Continue,
    Stop(Violation),
    Exited(WaitStatus),
}

impl<'a> ReplaySession<'a> {
    pub fn new(
        log: &'a RecordingLog,
        workload: &'static Workload,
        options: ReplayOptions,
    ) -> ReplaySession<'a> {
        ReplaySession {
            log,
            workload,
            engine: ReplayEngine::new(),
            options,
            output: Vec::new(),
            observed: Vec::new(),
            intercepted: 0,
        }
    }

    pub fn engine(&self) -> &ReplayEngine {
        &self.engine
    }

    /// Divergence and harness failures come back as errors with the tracee
    /// already killed. Everything the workload itself did wrong is a verdict.
    pub fn replay(&mut self) -> Result<SessionReport> {
        let mut process = TracedProcess::spawn(self.workload)?;
        log!(
            LogInfo,
            "replaying `{}' against session {}",
            self.workload.name,
            self.log.session_id()
        );
        let verdict = match self.replay_loop(&mut process) {
            Ok(verdict) => verdict,
            Err(e) => {
                if let Err(kill_err) = process.kill() {
                    log!(LogWarn, "could not kill tracee: {}", kill_err);
                }
                return Err(e);
            }
        };
        log!(
            LogInfo,
            "replay stopped in state {} after {} syscalls: {}",
            self.engine.state(),
            self.intercepted,
            verdict
        );

        Ok(SessionReport {
            session_id: self.log.session_id(),
            verdict,
            observed: std::mem::take(&mut self.observed),
            output: std::mem::take(&mut self.output),
            intercepted: self.intercepted,
        })
    }

    fn replay_loop(&mut self, process: &mut TracedProcess) -> Result<Verdict> {
        self.engine.arm(self.log, process.arch())?;
        let mut pending_sig = MaybeStopSignal::new_none();
        loop {
            process.resume_syscall(pending_sig)?;
            pending_sig = MaybeStopSignal::new_none();
            let status = process.wait()?;
            match status.wait_type() {
                WaitType::Exit | WaitType::FatalSignal => return self.finish(process, status),
                WaitType::SignalStop => pending_sig = status.maybe_stop_sig(),
                WaitType::PtraceEvent => (),
                WaitType::SyscallStop => match self.replay_syscall(process)? {
                    Step::Continue => (),
                    Step::Stop(v) => {
                        log!(LogWarn, "violation during replay: {}", v);
                        process.kill()?;
                        return Ok(Verdict::Violation(v));
                    }
                    Step::Exited(status) => return self.finish(process, status),
                },
            }
        }
    }

    fn finish(&mut self, process: &mut TracedProcess, status: WaitStatus) -> Result<Verdict> {
        self.engine.on_process_exit(self.log)?;
        // Suppressed writes never reached the pipe; whatever is there
        // came from natively replayed calls.
        let mut output = std::mem::take(&mut self.output);
        output.extend(process.take_output());
        let verdict = Verdict::from_exit(status, &output);
        self.output = output;
        Ok(verdict)
    }

    /// The tracee is at a syscall-entry stop.
    fn replay_syscall(&mut self, process: &mut TracedProcess) -> Result<Step> {
        let mut regs = process.regs()?;
        let arch = regs.arch();
        let syscallno = regs.original_syscallno();
        let args = regs.syscall_args();
        let (record, desc) = self
            .engine
            .on_syscall_entry(self.log, arch, syscallno, &args)?;
        self.intercepted += 1;
        if desc.is_exit() {
            return Ok(Step::Continue);
        }

        let rewrite = plan(arch, desc, &args);
        if !rewrite.replay_natively {
            regs.set_original_syscallno(-1);
            process.set_regs(&regs)?;
        }

        let status = process.resume_to_syscall_stop()?;
        if status.wait_type() != WaitType::SyscallStop {
            log!(LogWarn, "tracee died inside `{}': {}", desc.name, status);
            return Ok(Step::Exited(status));
        }

        let mut exit_regs = process.regs()?;
        if rewrite.replay_natively {
            self.engine
                .check_native_result(record, exit_regs.syscall_result_signed())?;
            if rewrite.payload.is_some() {
                inject(process, &mut exit_regs, &rewrite, record, None)?;
                process.set_regs(&exit_regs)?;
            }
        } else {
            let forced = match desc.policy {
                Policy::Rewrite => self.options.inject_result,
                _ => None,
            };
            inject(process, &mut exit_regs, &rewrite, record, forced)?;
            process.set_regs(&exit_regs)?;
        }
        log!(
            LogDebug,
            "#{} `{}' = {}",
            record.sequence_number,
            desc.name,
            exit_regs.syscall_result_signed()
        );

        if let Some(Payload::TraceeWritten { fd, .. }) = rewrite.payload {
            if let Some(bytes) = &record.captured_output {
                self.forward_output(fd, bytes)?;
            }
        }

        if let Some(contract) = contract_for(arch, syscallno, &args) {
            let observed = observe(
                &*process,
                &exit_regs,
                &rewrite,
                &contract,
                record.sequence_number,
                desc.name,
            );
            self.observed.push(ObservedSyscall {
                sequence_number: record.sequence_number,
                syscall_id: syscallno,
                result_code: observed.result_code,
                value: observed.value,
            });
            if let Err(v) = verify(&observed, &contract) {
                return Ok(Step::Stop(v));
            }
        } else if let Some(Payload::KernelWritten { .. }) = rewrite.payload {
            self.observed.push(ObservedSyscall {
                sequence_number: record.sequence_number,
                syscall_id: syscallno,
                result_code: exit_regs.syscall_result_signed(),
                value: record.captured_output.as_deref().and_then(payload_word),
            });
        }
        Ok(Step::Continue)
    }

    fn forward_output(&mut self, fd: i32, bytes: &[u8]) -> Result<()> {
        match fd {
            libc::STDOUT_FILENO => {
                self.output.extend_from_slice(bytes);
                if self.options.redirect_stdio {
                    let mut out = io::stdout();
                    out.write_all(bytes)?;
                    out.flush()?;
                }
            }
            libc::STDERR_FILENO if self.options.redirect_stdio => io::stderr().write_all(bytes)?,
            _ => (),
        }
        Ok(())
    }
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use super::*;
    use crate::{
        error::HarnessError,
        session::{
            record_session::{RecordOptions, RecordSession},
            replay_engine::EngineState,
        },
        workloads::lookup,
    };

    fn record(name: &str) -> RecordingLog {
        let outcome = RecordSession::new(lookup(name).unwrap(), &RecordOptions::default())
            .unwrap()
            .record()
            .unwrap();
        outcome.log
    }

    fn replay(log: &RecordingLog, name: &str, options: ReplayOptions) -> Result<SessionReport> {
        ReplaySession::new(log, lookup(name).unwrap(), options).replay()
    }

    #[test]
    fn exemplar_replays_recorded_value() {
        let log = record("arch_prctl");
        let mut session =
            ReplaySession::new(&log, lookup("arch_prctl").unwrap(), ReplayOptions::default());
        let report = session.replay().unwrap();
        assert_eq!(report.verdict, Verdict::Pass);
        assert_eq!(session.engine().state(), EngineState::Done);
        assert_eq!(report.intercepted, log.len());
        assert_eq!(report.output, b"EXIT-SUCCESS\n".to_vec());

        let recorded = log
            .lookup(0)
            .unwrap()
            .captured_output
            .as_deref()
            .and_then(payload_word);
        assert_eq!(report.observed[0].value, recorded);
        assert_eq!(report.session_id, log.session_id());
    }

    #[test]
    fn replay_is_repeatable() {
        let log = record("arch_prctl");
        let first = replay(&log, "arch_prctl", ReplayOptions::default()).unwrap();
        let second = replay(&log, "arch_prctl", ReplayOptions::default()).unwrap();
        assert_eq!(first.verdict, Verdict::Pass);
        assert_eq!(first.observed, second.observed);
        assert_eq!(first.output, second.output);
    }

    #[test]
    fn different_workload_diverges_at_first_syscall() {
        let log = record("arch_prctl");
        match replay(&log, "output_first", ReplayOptions::default()) {
            Err(HarnessError::ReplayDivergence {
                sequence_number, ..
            }) => assert_eq!(sequence_number, 0),
            other => panic!("expected divergence, got {:?}", other.map(|r| r.verdict)),
        }
    }

    #[test]
    fn forced_failure_is_a_violation() {
        let log = record("arch_prctl");
        let report = replay(
            &log,
            "arch_prctl",
            ReplayOptions {
                inject_result: Some(-1),
                redirect_stdio: false,
            },
        )
        .unwrap();
        match &report.verdict {
            Verdict::Violation(v) => {
                assert_eq!(v.sequence_number, 0);
                assert_eq!(v.syscall, "arch_prctl");
            }
            other => panic!("expected a violation, got {}", other),
        }
        assert!(report.output.is_empty());
    }

    #[test]
    fn gs_roundtrip_replays_natively() {
        let log = record("gs_roundtrip");
        let report = replay(&log, "gs_roundtrip", ReplayOptions::default()).unwrap();
        assert_eq!(report.verdict, Verdict::Pass);
        assert_eq!(report.intercepted, log.len());
    }

    #[test]
    fn failing_workloads_keep_their_verdicts() {
        let log = record("no_marker");
        assert_eq!(
            replay(&log, "no_marker", ReplayOptions::default())
                .unwrap()
                .verdict,
            Verdict::MissingMarker
        );

        let log = record("segfault");
        assert!(log.is_empty());
        assert_eq!(
            replay(&log, "segfault", ReplayOptions::default())
                .unwrap()
                .verdict,
            Verdict::Crash {
                signal: libc::SIGSEGV
            }
        );
    }

    #[test]
    fn unsealed_log_is_refused() {
        let log = RecordingLog::new(crate::kernel_abi::SupportedArch::X64);
        assert!(matches!(
            replay(&log, "arch_prctl", ReplayOptions::default()),
            Err(HarnessError::NotSealed)
        ));
    }
}
