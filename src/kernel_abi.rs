#![allow(non_upper_case_globals)]

use serde::{Deserialize, Serialize};
use static_assertions::{assert_eq_size, const_assert_eq};
use std::fmt::{Display, Formatter, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportedArch {
    X86,
    X64,
}

impl Default for SupportedArch {
    fn default() -> Self {
        Self::X64
    }
}

impl Display for SupportedArch {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            SupportedArch::X86 => write!(f, "x86"),
            SupportedArch::X64 => write!(f, "x86_64"),
        }
    }
}

/// `%cs` of a 64-bit user mode task.
pub const USER64_CS: u64 = 0x33;
/// `%cs` of a 32-bit compat task running on an x86_64 kernel.
pub const USER32_CS: u64 = 0x23;

impl SupportedArch {
    /// The architecture a stopped tracee executes in, as told by its code segment selector.
    pub fn from_cs(cs: u64) -> Option<SupportedArch> {
        match cs {
            USER64_CS => Some(SupportedArch::X64),
            USER32_CS => Some(SupportedArch::X86),
            _ => None,
        }
    }

    /// Byte used for this arch in the `syscalls` file header.
    pub fn as_u8(self) -> u8 {
        match self {
            SupportedArch::X86 => 0,
            SupportedArch::X64 => 1,
        }
    }

    pub fn from_u8(b: u8) -> Option<SupportedArch> {
        match b {
            0 => Some(SupportedArch::X86),
            1 => Some(SupportedArch::X64),
            _ => None,
        }
    }
}

/// `arch_prctl` codes from `<asm/prctl.h>`.
pub const ARCH_SET_GS: u64 = 0x1001;
pub const ARCH_SET_FS: u64 = 0x1002;
pub const ARCH_GET_FS: u64 = 0x1003;
pub const ARCH_GET_GS: u64 = 0x1004;

/// Size of `struct user_desc` as passed to `{get,set}_thread_area`.
pub const USER_DESC_SIZE: usize = 16;

pub mod x64 {
    pub const WRITE: i32 = 1;
    pub const EXIT: i32 = 60;
    pub const ARCH_PRCTL: i32 = 158;
    pub const SET_THREAD_AREA: i32 = 205;
    pub const GET_THREAD_AREA: i32 = 211;
    pub const EXIT_GROUP: i32 = 231;
}

pub mod x86 {
    pub const EXIT: i32 = 1;
    pub const WRITE: i32 = 4;
    pub const SET_THREAD_AREA: i32 = 243;
    pub const GET_THREAD_AREA: i32 = 244;
    pub const EXIT_GROUP: i32 = 252;
    pub const ARCH_PRCTL: i32 = 384;
}

// Tracee addresses travel around as u64 and are cast to usize for /proc/pid/mem offsets.
assert_eq_size!(usize, u64);
const_assert_eq!(libc::SYS_arch_prctl as i32, x64::ARCH_PRCTL);
const_assert_eq!(libc::SYS_write as i32, x64::WRITE);
const_assert_eq!(libc::SYS_exit_group as i32, x64::EXIT_GROUP);
