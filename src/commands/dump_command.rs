use super::exit_result::ExitResult;
use crate::{
    commands::{
        sysreplay_options::{SysreplayOptions, SysreplaySubCommand},
        SysreplayCommand,
    },
    error::Result,
    trace::trace_reader::TraceReader,
};
use std::{
    io::{stdout, Write},
    path::PathBuf,
};

pub struct DumpCommand {
    raw_dump: bool,
    trace_dir: Option<PathBuf>,
    event_spec: Option<(u64, Option<u64>)>,
}

impl DumpCommand {
    pub fn new(options: &SysreplayOptions) -> DumpCommand {
        match options.cmd.clone() {
            SysreplaySubCommand::Dump {
                raw_dump,
                trace_dir,
                event_spec,
            } => DumpCommand {
                raw_dump,
                trace_dir,
                event_spec,
            },
            _ => panic!("Unexpected SysreplaySubCommand variant. Not a Dump variant!"),
        }
    }

    fn dump(&self, f: &mut dyn Write) -> Result<()> {
        let trace = TraceReader::new(self.trace_dir.as_deref())?;

        if self.raw_dump {
            writeln!(f, "seq syscall_id result args... captured_len")?;
        }

        let (start, end) = match self.event_spec {
            None => (0, u64::MAX),
            Some((s, None)) => (s, s),
            Some((s, Some(e))) => (s, e),
        };
        let arch = trace.log().arch();
        for r in trace
            .log()
            .records()
            .iter()
            .filter(|r| r.sequence_number >= start && r.sequence_number <= end)
        {
            if self.raw_dump {
                r.dump_raw(Some(&mut *f))?;
            } else {
                r.dump(arch, Some(&mut *f))?;
            }
        }
        Ok(())
    }
}

impl SysreplayCommand for DumpCommand {
    fn run(&mut self) -> ExitResult<()> {
        self.dump(&mut stdout()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        kernel_abi::{x64, SupportedArch, ARCH_GET_FS},
        trace::{
            recording_log::SessionId,
            syscall_record::SyscallRecord,
            trace_writer::{CloseStatus, TraceWriter},
        },
    };
    use std::path::Path;

    fn write_trace(dir: &Path) {
        let mut w =
            TraceWriter::new("arch_prctl", Some(dir), SessionId::from_raw(1), SupportedArch::X64)
                .unwrap();
        let records = [
            SyscallRecord {
                syscall_id: x64::ARCH_PRCTL,
                arguments: vec![ARCH_GET_FS, 0x7ffe_0000],
                captured_output: Some(0x7fff_f7d8_a740u64.to_le_bytes().to_vec()),
                result_code: 0,
                sequence_number: 0,
            },
            SyscallRecord {
                syscall_id: x64::WRITE,
                arguments: vec![1, 0x5555_0000, 13],
                captured_output: Some(b"EXIT-SUCCESS\n".to_vec()),
                result_code: 13,
                sequence_number: 1,
            },
            SyscallRecord {
                syscall_id: x64::EXIT_GROUP,
                arguments: vec![0],
                captured_output: None,
                result_code: 0,
                sequence_number: 2,
            },
        ];
        for r in &records {
            w.write_record(r).unwrap();
        }
        w.close(CloseStatus::CloseOk).unwrap();
    }

    fn dump(dir: &Path, raw_dump: bool, event_spec: Option<(u64, Option<u64>)>) -> String {
        let cmd = DumpCommand {
            raw_dump,
            trace_dir: Some(dir.to_owned()),
            event_spec,
        };
        let mut out = Vec::new();
        cmd.dump(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn raw_dump_of_a_range() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("t");
        write_trace(&dir);

        let out = dump(&dir, true, Some((1, Some(2))));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], " 1 1 13 0x1 0x55550000 0xd 13");
        assert_eq!(lines[2], " 2 231 0 0x0 -1");
    }

    #[test]
    fn pretty_dump_names_syscalls() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("t");
        write_trace(&dir);

        let out = dump(&dir, false, Some((0, None)));
        assert!(out.contains("`arch_prctl'"));
        assert!(out.contains("captured:8 bytes"));
        assert!(!out.contains("exit_group"));
    }
}
