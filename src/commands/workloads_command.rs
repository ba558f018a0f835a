use super::exit_result::ExitResult;
use crate::{commands::SysreplayCommand, workloads::WORKLOADS};
use std::io::{self, Write};

pub struct WorkloadsCommand;

impl WorkloadsCommand {
    fn list(&self, f: &mut dyn Write) -> io::Result<()> {
        let width = WORKLOADS.iter().map(|w| w.name.len()).max().unwrap_or(0);
        for w in WORKLOADS {
            writeln!(f, "{:width$}  {}", w.name, w.description, width = width)?;
        }
        Ok(())
    }
}

impl SysreplayCommand for WorkloadsCommand {
    fn run(&mut self) -> ExitResult<()> {
        match self.list(&mut io::stdout()) {
            Ok(()) => ExitResult::Ok(()),
            Err(e) => ExitResult::err_from(e, super::exit_result::EXIT_HARNESS_ERROR),
        }
    }
}
