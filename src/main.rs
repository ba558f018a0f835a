#[macro_use]
extern crate lazy_static;

#[macro_use]
mod log;
mod commands;
mod consistency_checker;
mod error;
mod kernel_abi;
mod kernel_metadata;
mod registers;
mod remote_ptr;
mod scoped_fd;
mod session;
mod syscall_classifier;
mod syscall_rewriter;
mod trace;
mod util;
mod wait_status;
mod workloads;

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
compile_error!("sysreplay traces x86_64 Linux processes only");

use crate::commands::{
    dump_command::DumpCommand,
    exit_result::ExitResult,
    record_command::RecordCommand,
    replay_command::ReplayCommand,
    sysreplay_options::{SysreplayOptions, SysreplaySubCommand},
    trace_info_command::TraceInfoCommand,
    workloads_command::WorkloadsCommand,
    SysreplayCommand,
};
use structopt::StructOpt;

fn main() -> ExitResult<()> {
    let options = SysreplayOptions::from_args();

    match &options.cmd {
        SysreplaySubCommand::Record { .. } => RecordCommand::new(&options).run(),
        SysreplaySubCommand::Replay { .. } => ReplayCommand::new(&options).run(),
        SysreplaySubCommand::Dump { .. } => DumpCommand::new(&options).run(),
        SysreplaySubCommand::TraceInfo { .. } => TraceInfoCommand::new(&options).run(),
        SysreplaySubCommand::Workloads => WorkloadsCommand.run(),
    }
}
