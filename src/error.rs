use crate::kernel_abi::SupportedArch;
use nix::errno::Errno;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("unsupported syscall {syscallno} on {arch}")]
    UnsupportedSyscall { arch: SupportedArch, syscallno: i32 },

    #[error("unsupported architecture: code segment selector {cs:#x}")]
    UnsupportedArch { cs: u64 },

    #[error("replay diverged at sequence number {sequence_number}: {detail}")]
    ReplayDivergence { sequence_number: u64, detail: String },

    #[error("no record {sequence_number} in log of length {len}")]
    RecordNotFound { sequence_number: u64, len: u64 },

    #[error("recording log is not sealed")]
    NotSealed,

    #[error("recording log is sealed")]
    LogSealed,

    #[error("record out of order: expected sequence number {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("malformed trace: {0}")]
    TraceFormat(String),

    #[error("unknown workload `{0}'")]
    UnknownWorkload(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Sys(#[from] Errno),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
