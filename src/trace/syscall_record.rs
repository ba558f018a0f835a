use crate::{
    kernel_abi::SupportedArch,
    kernel_metadata::syscall_name,
    syscall_classifier::{ArgKind, SyscallDesc},
};
use crc32fast::Hasher;
use std::io::{self, stdout, Write};

/// One intercepted syscall as observed during recording.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyscallRecord {
    pub syscall_id: i32,
    /// Exactly `desc.nargs()` words for this syscall.
    pub arguments: Vec<u64>,
    pub captured_output: Option<Vec<u8>>,
    pub result_code: i64,
    pub sequence_number: u64,
}

impl SyscallRecord {
    pub fn new(
        sequence_number: u64,
        desc: &SyscallDesc,
        args: &[u64],
        result_code: i64,
        captured_output: Option<Vec<u8>>,
    ) -> SyscallRecord {
        SyscallRecord {
            syscall_id: desc.number,
            arguments: args.iter().copied().take(desc.nargs()).collect(),
            captured_output,
            result_code,
            sequence_number,
        }
    }

    /// Log a human-readable representation of this to `out`
    /// (defaulting to stdout), including a newline character.
    pub fn dump(&self, arch: SupportedArch, maybe_out: Option<&mut dyn Write>) -> io::Result<()> {
        let sout = &mut stdout();
        let out = maybe_out.unwrap_or(sout);
        write!(
            out,
            "{{\n  seq:{} syscall:`{}' ({}) result:{}\n  args:[",
            self.sequence_number,
            syscall_name(self.syscall_id, arch),
            self.syscall_id,
            self.result_code
        )?;
        for (i, a) in self.arguments.iter().enumerate() {
            if i > 0 {
                write!(out, ", ")?;
            }
            write!(out, "{:#x}", a)?;
        }
        write!(out, "]\n")?;
        match &self.captured_output {
            Some(bytes) => {
                write!(out, "  captured:{} bytes [", bytes.len())?;
                for b in bytes.iter().take(32) {
                    write!(out, "{:02x}", b)?;
                }
                if bytes.len() > 32 {
                    write!(out, "...")?;
                }
                write!(out, "]\n}}\n")
            }
            None => write!(out, "}}\n"),
        }
    }

    /// One line per record, easily machine-parseable.
    pub fn dump_raw(&self, maybe_out: Option<&mut dyn Write>) -> io::Result<()> {
        let sout = &mut stdout();
        let out = maybe_out.unwrap_or(sout);
        write!(
            out,
            " {} {} {}",
            self.sequence_number, self.syscall_id, self.result_code
        )?;
        for a in &self.arguments {
            write!(out, " {:#x}", a)?;
        }
        let captured_len = self.captured_output.as_ref().map_or(-1, |c| c.len() as i64);
        write!(out, " {}\n", captured_len)
    }
}

/// Digest of the syscall number and its `ArgKind::Value` arguments. Pointer
/// arguments are left out: tracee addresses may legitimately move between runs.
pub fn args_digest(desc: &SyscallDesc, args: &[u64]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&desc.number.to_le_bytes());
    for (kind, arg) in desc.args.iter().zip(args) {
        if *kind == ArgKind::Value {
            hasher.update(&arg.to_le_bytes());
        }
    }
    hasher.finalize()
}
