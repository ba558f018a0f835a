use std::{num::ParseIntError, path::PathBuf};
use structopt::{clap::AppSettings, StructOpt};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "sysreplay",
    about = "Record a workload's syscalls and check that replaying them is consistent",
    after_help = "Use SYSREPLAY_LOG to control logging; e.g. SYSREPLAY_LOG=all:warn,replay_engine:debug"
)]
#[structopt(global_settings =
&[AppSettings::AllowNegativeNumbers, AppSettings::UnifiedHelpMessage])]
pub struct SysreplayOptions {
    #[structopt(subcommand)]
    pub cmd: SysreplaySubCommand,
}

#[derive(StructOpt, Debug, Clone)]
pub enum SysreplaySubCommand {
    /// Run a built-in workload under ptrace and save its syscalls as a trace
    #[structopt(name = "record")]
    Record {
        /// Directory to store the trace in. It must not exist yet.
        /// Default is a fresh `<workload>-N` under the trace save dir
        #[structopt(short = "o", long = "output-trace-dir")]
        output_trace_dir: Option<PathBuf>,

        /// See `sysreplay workloads`
        #[structopt(default_value = "arch_prctl")]
        workload: String,
    },

    /// Replay a previously recorded trace and check the workload against it
    #[structopt(name = "replay")]
    Replay {
        /// Workload to replay. Default is the one the trace was recorded from
        #[structopt(short = "w", long)]
        workload: Option<String>,

        /// Force every rewritten syscall to return <inject-result> instead of
        /// the recorded result, e.g. -1 to simulate failure
        #[structopt(long = "inject-result")]
        inject_result: Option<i64>,

        /// Don't replay writes to stdout/stderr
        #[structopt(short = "q", long = "no-redirect-output")]
        no_redirect_output: bool,

        /// Which directory is the trace data in? If omitted the latest trace dir is used
        trace_dir: Option<PathBuf>,
    },

    /// Dump the syscall records of a trace
    #[structopt(name = "dump")]
    Dump {
        /// Dump one record per line in a more easily machine-parseable
        /// format instead of the default human-readable format
        #[structopt(short = "r", long = "raw")]
        raw_dump: bool,

        /// Which directory is the trace data in? If omitted the latest trace dir is used
        trace_dir: Option<PathBuf>,

        /// Record specs can be either a sequence number like `3`, or a range
        /// like `0-2`. By default, all records are dumped
        #[structopt(parse(try_from_str = parse_range))]
        event_spec: Option<(u64, Option<u64>)>,
    },

    /// Print the header of a trace as JSON
    #[structopt(name = "traceinfo")]
    TraceInfo {
        /// Which directory is the trace data in? If omitted the latest trace dir is used
        trace_dir: Option<PathBuf>,
    },

    /// List the built-in workloads
    #[structopt(name = "workloads")]
    Workloads,
}

fn parse_range(range_or_single: &str) -> Result<(u64, Option<u64>), ParseIntError> {
    let args: Vec<&str> = range_or_single.splitn(2, '-').collect();
    let low = args[0].parse::<u64>()?;
    let mut high: Option<u64> = None;
    if args.len() == 2 {
        high = Some(args[1].parse::<u64>()?);
    }
    Ok((low, high))
}
