use super::exit_result::ExitResult;
use crate::{
    commands::{
        sysreplay_options::{SysreplayOptions, SysreplaySubCommand},
        SysreplayCommand,
    },
    error::Result,
    session::{
        record_session::{RecordOptions, RecordSession},
        Verdict,
    },
    util::{assert_prerequisites, ensure_aslr_disabled},
    workloads::lookup,
};
use std::{
    io::{stdout, Write},
    path::PathBuf,
};

pub struct RecordCommand {
    workload: String,
    output_trace_dir: Option<PathBuf>,
}

impl RecordCommand {
    pub fn new(options: &SysreplayOptions) -> RecordCommand {
        match options.cmd.clone() {
            SysreplaySubCommand::Record {
                workload,
                output_trace_dir,
            } => RecordCommand {
                workload,
                output_trace_dir,
            },
            _ => panic!("Unexpected SysreplaySubCommand variant. Not a `Record` variant!"),
        }
    }

    fn record(&self) -> Result<Verdict> {
        assert_prerequisites()?;
        ensure_aslr_disabled()?;
        let workload = lookup(&self.workload)?;
        let options = RecordOptions {
            save_trace: true,
            output_trace_dir: self.output_trace_dir.clone(),
        };
        let outcome = RecordSession::new(workload, &options)?.record()?;

        let mut out = stdout();
        out.write_all(&outcome.report.output)?;
        if let Some(dir) = &outcome.trace_dir {
            eprintln!(
                "sysreplay: saved {} syscalls to {}",
                outcome.log.len(),
                dir.display()
            );
        }
        writeln!(out, "{}", outcome.report.verdict)?;
        Ok(outcome.report.verdict)
    }
}

impl SysreplayCommand for RecordCommand {
    fn run(&mut self) -> ExitResult<()> {
        ExitResult::from_verdict(self.record())
    }
}
