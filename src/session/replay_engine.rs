use crate::{
    error::{HarnessError, Result},
    kernel_abi::SupportedArch,
    kernel_metadata::syscall_name,
    log::LogLevel::LogDebug,
    syscall_classifier::{classify, SyscallDesc},
    trace::{
        recording_log::{RecordingLog, SessionId},
        syscall_record::{args_digest, SyscallRecord},
    },
};
use std::fmt::{self, Display, Formatter};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EngineState {
    Idle,
    Armed,
    Intercepting,
    Done,
    Diverged,
}

impl Display for EngineState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Idle => "IDLE",
            EngineState::Armed => "ARMED",
            EngineState::Intercepting => "INTERCEPTING",
            EngineState::Done => "DONE",
            EngineState::Diverged => "DIVERGED",
        };
        f.write_str(s)
    }
}

/// Matches the syscalls of a replayed execution against a sealed recording,
/// one at a time. Holds only the id of the log it was armed with and a cursor;
/// the log itself is borrowed at each step. Divergence is terminal.
#[derive(Debug)]
pub struct ReplayEngine {
    state: EngineState,
    session_id: Option<SessionId>,
    cursor: u64,
}

impl Default for ReplayEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayEngine {
    pub fn new() -> ReplayEngine {
        ReplayEngine {
            state: EngineState::Idle,
            session_id: None,
            cursor: 0,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn arm(&mut self, log: &RecordingLog, arch: SupportedArch) -> Result<()> {
        self.expect_state(&[EngineState::Idle], "arm")?;
        if !log.is_sealed() {
            return Err(HarnessError::NotSealed);
        }
        self.session_id = Some(log.session_id());
        if log.arch() != arch {
            return Err(self.diverge(
                0,
                format!("recorded on {} but replaying on {}", log.arch(), arch),
            ));
        }
        self.state = EngineState::Armed;
        log!(
            LogDebug,
            "armed with session {} ({} records)",
            log.session_id(),
            log.len()
        );
        Ok(())
    }

    /// The tracee is at a syscall-entry stop for `syscallno`. Returns the matching
    /// record and advances the cursor past it.
    pub fn on_syscall_entry<'a>(
        &mut self,
        log: &'a RecordingLog,
        arch: SupportedArch,
        syscallno: i32,
        args: &[u64],
    ) -> Result<(&'a SyscallRecord, &'static SyscallDesc)> {
        self.expect_state(
            &[EngineState::Armed, EngineState::Intercepting],
            "on_syscall_entry",
        )?;
        self.expect_log(log)?;
        self.state = EngineState::Intercepting;

        let desc = match classify(arch, syscallno) {
            Ok(desc) => desc,
            Err(e) => {
                self.state = EngineState::Diverged;
                return Err(e);
            }
        };

        let seq = self.cursor;
        let record = match log.lookup(seq) {
            Ok(record) => record,
            Err(_) => {
                return Err(self.diverge(
                    seq,
                    format!(
                        "`{}' issued after the end of the recording ({} records)",
                        desc.name,
                        log.len()
                    ),
                ))
            }
        };

        if record.syscall_id != syscallno {
            return Err(self.diverge(
                seq,
                format!(
                    "expected `{}', got `{}'",
                    syscall_name(record.syscall_id, arch),
                    desc.name
                ),
            ));
        }
        if args_digest(desc, &record.arguments) != args_digest(desc, args) {
            return Err(self.diverge(
                seq,
                format!(
                    "`{}' arguments differ: recorded {:x?}, got {:x?}",
                    desc.name,
                    record.arguments,
                    &args[..desc.nargs().min(args.len())]
                ),
            ));
        }

        self.cursor += 1;
        log!(LogDebug, "matched #{} `{}'", seq, desc.name);
        Ok((record, desc))
    }

    /// A natively replayed syscall must come back with what it returned during recording.
    pub fn check_native_result(&mut self, record: &SyscallRecord, live_result: i64) -> Result<()> {
        self.expect_state(&[EngineState::Intercepting], "check_native_result")?;
        if record.result_code != live_result {
            return Err(self.diverge(
                record.sequence_number,
                format!(
                    "natively replayed syscall returned {}, recorded {}",
                    live_result, record.result_code
                ),
            ));
        }
        Ok(())
    }

    pub fn on_process_exit(&mut self, log: &RecordingLog) -> Result<()> {
        self.expect_state(
            &[EngineState::Armed, EngineState::Intercepting],
            "on_process_exit",
        )?;
        self.expect_log(log)?;
        if self.cursor != log.len() {
            let seq = self.cursor;
            return Err(self.diverge(
                seq,
                format!(
                    "tracee exited after {} of {} recorded syscalls",
                    seq,
                    log.len()
                ),
            ));
        }
        self.state = EngineState::Done;
        Ok(())
    }

    fn diverge(&mut self, sequence_number: u64, detail: String) -> HarnessError {
        self.state = EngineState::Diverged;
        HarnessError::ReplayDivergence {
            sequence_number,
            detail,
        }
    }

    fn expect_state(&self, allowed: &[EngineState], op: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(HarnessError::InvalidState(format!(
                "{} called in state {}",
                op, self.state
            )))
        }
    }

    fn expect_log(&self, log: &RecordingLog) -> Result<()> {
        if self.session_id != Some(log.session_id()) {
            return Err(HarnessError::InvalidState(format!(
                "engine armed for a different session than {}",
                log.session_id()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel_abi::{x64, ARCH_GET_FS, ARCH_GET_GS};

    fn exemplar_log() -> RecordingLog {
        let mut log = RecordingLog::new(SupportedArch::X64);
        let fs = 0x7fff_f7d8_a740u64;
        log.append(SyscallRecord {
            syscall_id: x64::ARCH_PRCTL,
            arguments: vec![ARCH_GET_FS, 0x7fff_ffff_e000],
            captured_output: Some(fs.to_le_bytes().to_vec()),
            result_code: 0,
            sequence_number: 0,
        })
        .unwrap();
        log.append(SyscallRecord {
            syscall_id: x64::WRITE,
            arguments: vec![1, 0x5555_0000, 13],
            captured_output: Some(b"EXIT-SUCCESS\n".to_vec()),
            result_code: 13,
            sequence_number: 1,
        })
        .unwrap();
        log.append(SyscallRecord {
            syscall_id: x64::EXIT_GROUP,
            arguments: vec![0],
            captured_output: None,
            result_code: 0,
            sequence_number: 2,
        })
        .unwrap();
        log.seal();
        log
    }

    #[test]
    fn full_match_reaches_done() {
        let log = exemplar_log();
        let mut e = ReplayEngine::new();
        assert_eq!(e.state(), EngineState::Idle);
        e.arm(&log, SupportedArch::X64).unwrap();
        assert_eq!(e.state(), EngineState::Armed);

        // Pointer argument moved: still a match.
        let (r, desc) = e
            .on_syscall_entry(&log, SupportedArch::X64, x64::ARCH_PRCTL, &[ARCH_GET_FS, 0x1234, 0, 0, 0, 0])
            .unwrap();
        assert_eq!(r.sequence_number, 0);
        assert_eq!(desc.name, "arch_prctl");
        assert_eq!(e.state(), EngineState::Intercepting);

        let (r, _) = e
            .on_syscall_entry(&log, SupportedArch::X64, x64::WRITE, &[1, 0x9999, 13])
            .unwrap();
        e.check_native_result(r, 13).unwrap();
        e.on_syscall_entry(&log, SupportedArch::X64, x64::EXIT_GROUP, &[0]).unwrap();
        e.on_process_exit(&log).unwrap();
        assert_eq!(e.state(), EngineState::Done);

        assert!(matches!(
            e.on_syscall_entry(&log, SupportedArch::X64, x64::EXIT_GROUP, &[0]),
            Err(HarnessError::InvalidState(_))
        ));
    }

    #[test]
    fn arm_requires_sealed_log() {
        let mut log = RecordingLog::new(SupportedArch::X64);
        let mut e = ReplayEngine::new();
        assert!(matches!(e.arm(&log, SupportedArch::X64), Err(HarnessError::NotSealed)));
        assert_eq!(e.state(), EngineState::Idle);
        log.seal();
        e.arm(&log, SupportedArch::X64).unwrap();
        assert!(matches!(e.arm(&log, SupportedArch::X64), Err(HarnessError::InvalidState(_))));
    }

    #[test]
    fn arch_mismatch_diverges_at_zero() {
        let log = exemplar_log();
        let mut e = ReplayEngine::new();
        match e.arm(&log, SupportedArch::X86) {
            Err(HarnessError::ReplayDivergence { sequence_number, .. }) => {
                assert_eq!(sequence_number, 0)
            }
            _ => panic!("expected divergence"),
        }
        assert_eq!(e.state(), EngineState::Diverged);
    }

    #[test]
    fn different_syscall_diverges() {
        let log = exemplar_log();
        let mut e = ReplayEngine::new();
        e.arm(&log, SupportedArch::X64).unwrap();
        match e.on_syscall_entry(&log, SupportedArch::X64, x64::WRITE, &[1, 0, 5]) {
            Err(HarnessError::ReplayDivergence {
                sequence_number,
                detail,
            }) => {
                assert_eq!(sequence_number, 0);
                assert!(detail.contains("arch_prctl"));
            }
            _ => panic!("expected divergence"),
        }
        assert_eq!(e.state(), EngineState::Diverged);
        assert!(matches!(
            e.on_process_exit(&log),
            Err(HarnessError::InvalidState(_))
        ));
    }

    #[test]
    fn different_value_argument_diverges() {
        let log = exemplar_log();
        let mut e = ReplayEngine::new();
        e.arm(&log, SupportedArch::X64).unwrap();
        assert!(matches!(
            e.on_syscall_entry(&log, SupportedArch::X64, x64::ARCH_PRCTL, &[ARCH_GET_GS, 0x1234]),
            Err(HarnessError::ReplayDivergence { sequence_number: 0, .. })
        ));
    }

    #[test]
    fn unsupported_syscall_is_fatal() {
        let log = exemplar_log();
        let mut e = ReplayEngine::new();
        e.arm(&log, SupportedArch::X64).unwrap();
        assert!(matches!(
            e.on_syscall_entry(&log, SupportedArch::X64, 257, &[]),
            Err(HarnessError::UnsupportedSyscall { syscallno: 257, .. })
        ));
        assert_eq!(e.state(), EngineState::Diverged);
    }

    #[test]
    fn syscall_past_end_diverges() {
        let mut log = RecordingLog::new(SupportedArch::X64);
        log.seal();
        let mut e = ReplayEngine::new();
        e.arm(&log, SupportedArch::X64).unwrap();
        assert!(matches!(
            e.on_syscall_entry(&log, SupportedArch::X64, x64::EXIT_GROUP, &[0]),
            Err(HarnessError::ReplayDivergence { sequence_number: 0, .. })
        ));
    }

    #[test]
    fn early_exit_diverges() {
        let log = exemplar_log();
        let mut e = ReplayEngine::new();
        e.arm(&log, SupportedArch::X64).unwrap();
        e.on_syscall_entry(&log, SupportedArch::X64, x64::ARCH_PRCTL, &[ARCH_GET_FS, 0])
            .unwrap();
        assert!(matches!(
            e.on_process_exit(&log),
            Err(HarnessError::ReplayDivergence { sequence_number: 1, .. })
        ));
    }

    #[test]
    fn native_result_mismatch_diverges() {
        let log = exemplar_log();
        let mut e = ReplayEngine::new();
        e.arm(&log, SupportedArch::X64).unwrap();
        let (r, _) = e
            .on_syscall_entry(&log, SupportedArch::X64, x64::ARCH_PRCTL, &[ARCH_GET_FS, 0])
            .unwrap();
        assert!(matches!(
            e.check_native_result(r, -22),
            Err(HarnessError::ReplayDivergence { sequence_number: 0, .. })
        ));
    }

    #[test]
    fn other_session_is_rejected() {
        let log = exemplar_log();
        let other = exemplar_log();
        let mut e = ReplayEngine::new();
        e.arm(&log, SupportedArch::X64).unwrap();
        assert!(matches!(
            e.on_syscall_entry(&other, SupportedArch::X64, x64::ARCH_PRCTL, &[ARCH_GET_FS, 0]),
            Err(HarnessError::InvalidState(_))
        ));
    }
}
