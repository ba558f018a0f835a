use exit_result::ExitResult;

pub mod dump_command;
pub mod exit_result;
pub mod record_command;
pub mod replay_command;
pub mod sysreplay_options;
pub mod trace_info_command;
pub mod workloads_command;

pub trait SysreplayCommand {
    fn run(&mut self) -> ExitResult<()>;
}
