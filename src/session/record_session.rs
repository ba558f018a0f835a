use crate::{
    consistency_checker::{contract_for, observe, verify, Violation},
    error::{HarnessError, Result},
    kernel_metadata::{arch_prctl_code_name, syscall_name},
    log::LogLevel::{LogDebug, LogInfo, LogWarn},
    session::{
        payload_word, traced_process::TracedProcess, ObservedSyscall, SessionReport, Verdict,
    },
    syscall_classifier::classify,
    syscall_rewriter::{capture, plan, Payload},
    trace::{
        recording_log::RecordingLog,
        syscall_record::SyscallRecord,
        trace_writer::{CloseStatus, TraceWriter},
    },
    wait_status::{MaybeStopSignal, WaitType},
    workloads::Workload,
};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default)]
pub struct RecordOptions {
    /// Persist the recording as a trace directory.
    pub save_trace: bool,
    /// Exact trace directory to create. Otherwise a fresh one under the save dir.
    pub output_trace_dir: Option<PathBuf>,
}

pub struct RecordOutcome {
    pub report: SessionReport,
    /// Sealed, whatever the verdict.
    pub log: RecordingLog,
    pub trace_dir: Option<PathBuf>,
}

/// Drives one workload from fork to exit, logging every syscall it makes.
pub struct RecordSession {
    workload: &'static Workload,
    log: RecordingLog,
    process: Option<TracedProcess>,
    trace_writer: Option<TraceWriter>,
    observed: Vec<ObservedSyscall>,
    violation: Option<Violation>,
}

impl RecordSession {
    pub fn new(workload: &'static Workload, options: &RecordOptions) -> Result<RecordSession> {
        let process = TracedProcess::spawn(workload)?;
        let log = RecordingLog::new(process.arch());
        let trace_writer = if options.save_trace {
            let w = TraceWriter::new(
                workload.name,
                options.output_trace_dir.as_deref(),
                log.session_id(),
                log.arch(),
            )?;
            if options.output_trace_dir.is_none() {
                w.make_latest_trace()?;
            }
            Some(w)
        } else {
            None
        };
        log!(
            LogInfo,
            "recording `{}' as session {}",
            workload.name,
            log.session_id()
        );

        Ok(RecordSession {
            workload,
            log,
            process: Some(process),
            trace_writer,
            observed: Vec::new(),
            violation: None,
        })
    }

    pub fn trace_dir(&self) -> Option<&Path> {
        self.trace_writer.as_ref().map(|w| w.dir())
    }

    /// Run the workload to completion. On a harness error the tracee is killed
    /// and the log sealed with what was appended so far before the error is returned.
    pub fn record(mut self) -> Result<RecordOutcome> {
        if let Err(e) = self.record_loop() {
            self.cancel();
            return Err(e);
        }

        let mut process = match self.process.take() {
            Some(p) => p,
            None => return Err(HarnessError::InvalidState("no tracee to record".into())),
        };
        let output = process.take_output();
        let verdict = match self.violation.take() {
            Some(v) => Verdict::Violation(v),
            None => match process.exit_status() {
                Some(status) => Verdict::from_exit(status, &output),
                None => {
                    return Err(HarnessError::InvalidState(
                        "recording ended with a live tracee".into(),
                    ))
                }
            },
        };

        self.log.seal();
        let close_status = if verdict.is_pass() {
            CloseStatus::CloseOk
        } else {
            CloseStatus::CloseError
        };
        let trace_dir = self.trace_dir().map(|d| d.to_owned());
        if let Some(w) = self.trace_writer.as_mut() {
            w.close(close_status)?;
        }
        log!(
            LogInfo,
            "recorded {} syscalls of `{}': {}",
            self.log.len(),
            self.workload().name,
            verdict
        );

        Ok(RecordOutcome {
            report: SessionReport {
                session_id: self.log.session_id(),
                verdict,
                observed: std::mem::take(&mut self.observed),
                output,
                intercepted: self.log.len(),
            },
            log: self.log,
            trace_dir,
        })
    }

    /// Kill the tracee at whatever stop it is in and seal the partial log.
    pub fn cancel(&mut self) {
        if let Some(mut p) = self.process.take() {
            if let Err(e) = p.kill() {
                log!(LogWarn, "could not kill tracee: {}", e);
            }
        }
        self.log.seal();
        if let Some(w) = self.trace_writer.as_mut() {
            if let Err(e) = w.close(CloseStatus::CloseError) {
                log!(LogWarn, "could not close trace: {}", e);
            }
        }
    }

    fn record_loop(&mut self) -> Result<()> {
        let mut pending_sig = MaybeStopSignal::new_none();
        loop {
            let process = self.process_mut()?;
            process.resume_syscall(pending_sig)?;
            pending_sig = MaybeStopSignal::new_none();
            let status = process.wait()?;
            match status.wait_type() {
                WaitType::Exit | WaitType::FatalSignal => return Ok(()),
                WaitType::SignalStop => {
                    // Forwarded untouched.
                    pending_sig = status.maybe_stop_sig();
                }
                WaitType::PtraceEvent => (),
                WaitType::SyscallStop => {
                    if !self.record_syscall()? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// The tracee is at a syscall-entry stop. Returns false when recording must stop.
    fn record_syscall(&mut self) -> Result<bool> {
        let seq = self.log.next_sequence_number();
        let process = self.process_mut()?;
        let regs = process.regs()?;
        let arch = regs.arch();
        let desc = classify(arch, regs.original_syscallno())?;
        let args = regs.syscall_args();
        let rewrite = plan(arch, desc, &args);

        if desc.is_exit() {
            // Never returns to a syscall-exit stop.
            log!(LogDebug, "#{} `{}'({})", seq, desc.name, args[0] as i32);
            let record = SyscallRecord::new(seq, desc, &args, 0, None);
            self.append(record)?;
            return Ok(true);
        }

        let status = process.resume_to_syscall_stop()?;
        if status.wait_type() != WaitType::SyscallStop {
            log!(LogWarn, "tracee died inside `{}': {}", desc.name, status);
            return Ok(false);
        }

        let exit_regs = process.regs()?;
        let result = exit_regs.syscall_result_signed();
        let captured = capture(&*process, &rewrite, result)?;
        if is_logging!(LogDebug) {
            let code = if desc.name == "arch_prctl" {
                format!("({})", arch_prctl_code_name(args[0]))
            } else {
                String::new()
            };
            log!(
                LogDebug,
                "#{} `{}'{} = {}{}",
                seq,
                syscall_name(desc.number, arch),
                code,
                result,
                captured
                    .as_ref()
                    .map_or(String::new(), |c| format!(" ({} bytes captured)", c.len()))
            );
        }

        let mut violation = None;
        if let Some(contract) = contract_for(arch, desc.number, &args) {
            let observed = observe(&*process, &exit_regs, &rewrite, &contract, seq, desc.name);
            self.observed.push(ObservedSyscall {
                sequence_number: seq,
                syscall_id: desc.number,
                result_code: result,
                value: observed.value,
            });
            violation = verify(&observed, &contract).err();
        } else if let Some(Payload::KernelWritten { .. }) = rewrite.payload {
            self.observed.push(ObservedSyscall {
                sequence_number: seq,
                syscall_id: desc.number,
                result_code: result,
                value: captured.as_deref().and_then(payload_word),
            });
        }

        self.append(SyscallRecord::new(seq, desc, &args, result, captured))?;

        if let Some(v) = violation {
            log!(LogWarn, "violation during recording: {}", v);
            self.violation = Some(v);
            self.process_mut()?.kill()?;
            return Ok(false);
        }
        Ok(true)
    }

    fn append(&mut self, record: SyscallRecord) -> Result<()> {
        if let Some(w) = self.trace_writer.as_mut() {
            w.write_record(&record)?;
        }
        self.log.append(record)
    }

    fn process_mut(&mut self) -> Result<&mut TracedProcess> {
        self.process
            .as_mut()
            .ok_or_else(|| HarnessError::InvalidState("no tracee".into()))
    }

    pub fn workload(&self) -> &'static Workload {
        self.workload
    }
}
