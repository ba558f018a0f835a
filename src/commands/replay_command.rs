use super::exit_result::ExitResult;
use crate::{
    commands::{
        sysreplay_options::{SysreplayOptions, SysreplaySubCommand},
        SysreplayCommand,
    },
    error::Result,
    log::LogLevel::LogWarn,
    session::{
        replay_session::{ReplayOptions, ReplaySession},
        Verdict,
    },
    trace::trace_reader::TraceReader,
    util::{assert_prerequisites, ensure_aslr_disabled},
    workloads::lookup,
};
use std::path::PathBuf;

pub struct ReplayCommand {
    workload: Option<String>,
    inject_result: Option<i64>,
    redirect_stdio: bool,
    trace_dir: Option<PathBuf>,
}

impl ReplayCommand {
    pub fn new(options: &SysreplayOptions) -> ReplayCommand {
        match options.cmd.clone() {
            SysreplaySubCommand::Replay {
                workload,
                inject_result,
                no_redirect_output,
                trace_dir,
            } => ReplayCommand {
                workload,
                inject_result,
                redirect_stdio: !no_redirect_output,
                trace_dir,
            },
            _ => panic!("Unexpected SysreplaySubCommand variant. Not a `Replay` variant!"),
        }
    }

    fn replay(&self) -> Result<Verdict> {
        assert_prerequisites()?;
        ensure_aslr_disabled()?;
        let trace = TraceReader::new(self.trace_dir.as_deref())?;
        if !trace.header().ok {
            log!(
                LogWarn,
                "trace {:?} is from a recording that did not pass",
                trace.dir()
            );
        }
        let name = self
            .workload
            .as_deref()
            .unwrap_or_else(|| trace.header().workload.as_str());
        let workload = lookup(name)?;

        let options = ReplayOptions {
            inject_result: self.inject_result,
            redirect_stdio: self.redirect_stdio,
        };
        let report = ReplaySession::new(trace.log(), workload, options).replay()?;
        println!("{}", report.verdict);
        Ok(report.verdict)
    }
}

impl SysreplayCommand for ReplayCommand {
    fn run(&mut self) -> ExitResult<()> {
        ExitResult::from_verdict(self.replay())
    }
}
