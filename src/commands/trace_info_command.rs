use super::exit_result::ExitResult;
use crate::{
    commands::{
        sysreplay_options::{SysreplayOptions, SysreplaySubCommand},
        SysreplayCommand,
    },
    error::{HarnessError, Result},
    trace::trace_reader::TraceReader,
};
use std::{io::Write, path::PathBuf};

pub struct TraceInfoCommand {
    trace_dir: Option<PathBuf>,
}

impl TraceInfoCommand {
    pub fn new(options: &SysreplayOptions) -> TraceInfoCommand {
        match options.cmd.clone() {
            SysreplaySubCommand::TraceInfo { trace_dir } => TraceInfoCommand { trace_dir },
            _ => panic!("Unexpected SysreplaySubCommand variant. Not a `TraceInfo` variant!"),
        }
    }

    fn trace_info(&self, f: &mut dyn Write) -> Result<()> {
        let trace = TraceReader::new(self.trace_dir.as_deref())?;
        let json = serde_json::to_string_pretty(trace.header())
            .map_err(|e| HarnessError::TraceFormat(e.to_string()))?;
        writeln!(f, "{}", json)?;
        Ok(())
    }
}

impl SysreplayCommand for TraceInfoCommand {
    fn run(&mut self) -> ExitResult<()> {
        self.trace_info(&mut std::io::stdout()).into()
    }
}
