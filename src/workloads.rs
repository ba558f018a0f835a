//! Programs the harness runs under ptrace. Each entry point runs in a freshly
//! forked child of a possibly multi-threaded supervisor, so workloads stick to
//! raw syscalls: no allocation, no locks, no stdio buffers.

use crate::{
    error::{HarnessError, Result},
    kernel_abi::{ARCH_GET_FS, ARCH_GET_GS, ARCH_SET_GS},
};
use std::ptr;

/// Emits a machine-checkable marker on stdout in a single write.
macro_rules! atomic_puts {
    ($s:literal) => {{
        let msg = concat!($s, "\n");
        unsafe { libc::write(libc::STDOUT_FILENO, msg.as_ptr().cast(), msg.len()) };
    }};
}

/// Aborts the workload with a diagnostic on stderr and exit status 1.
macro_rules! test_assert {
    ($cond:expr) => {
        if !($cond) {
            let msg = concat!(
                "FAILED: ",
                stringify!($cond),
                " at ",
                file!(),
                ":",
                line!(),
                "\n"
            );
            unsafe {
                libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len());
                libc::_exit(1);
            }
        }
    };
}

pub struct Workload {
    pub name: &'static str,
    pub description: &'static str,
    /// Return value becomes the exit status.
    pub entry: fn() -> i32,
}

pub static WORKLOADS: &[Workload] = &[
    Workload {
        name: "arch_prctl",
        description: "arch_prctl(ARCH_GET_FS) returns 0, then EXIT-SUCCESS",
        entry: arch_prctl_main,
    },
    Workload {
        name: "arch_prctl_gs",
        description: "arch_prctl(ARCH_GET_GS) returns 0, then EXIT-SUCCESS",
        entry: arch_prctl_gs_main,
    },
    Workload {
        name: "gs_roundtrip",
        description: "ARCH_SET_GS to a static, ARCH_GET_GS reads it back",
        entry: gs_roundtrip_main,
    },
    Workload {
        name: "output_first",
        description: "writes a line before arch_prctl(ARCH_GET_FS)",
        entry: output_first_main,
    },
    Workload {
        name: "assert_failure",
        description: "arch_prctl(ARCH_GET_FS) then a failing test_assert!",
        entry: assert_failure_main,
    },
    Workload {
        name: "no_marker",
        description: "arch_prctl(ARCH_GET_FS) then exit 0 without a marker",
        entry: no_marker_main,
    },
    Workload {
        name: "segfault",
        description: "dies from SIGSEGV before any syscall",
        entry: segfault_main,
    },
];

pub fn lookup(name: &str) -> Result<&'static Workload> {
    WORKLOADS
        .iter()
        .find(|w| w.name == name)
        .ok_or_else(|| HarnessError::UnknownWorkload(name.to_owned()))
}

fn arch_prctl(code: u64, addr: u64) -> i64 {
    unsafe { libc::syscall(libc::SYS_arch_prctl, code, addr) }
}

fn get_fs() -> (i64, u64) {
    let mut addr: u64 = 0;
    let ret = arch_prctl(ARCH_GET_FS, &mut addr as *mut u64 as u64);
    (ret, addr)
}

fn arch_prctl_main() -> i32 {
    let (ret, _) = get_fs();
    test_assert!(ret == 0);
    atomic_puts!("EXIT-SUCCESS");
    0
}

fn arch_prctl_gs_main() -> i32 {
    let mut addr: u64 = 0;
    let ret = arch_prctl(ARCH_GET_GS, &mut addr as *mut u64 as u64);
    test_assert!(ret == 0);
    atomic_puts!("EXIT-SUCCESS");
    0
}

static GS_AREA: [u64; 4] = [0; 4];

fn gs_roundtrip_main() -> i32 {
    let want = GS_AREA.as_ptr() as u64;
    test_assert!(arch_prctl(ARCH_SET_GS, want) == 0);
    let mut got: u64 = 0;
    test_assert!(arch_prctl(ARCH_GET_GS, &mut got as *mut u64 as u64) == 0);
    test_assert!(got == want);
    atomic_puts!("EXIT-SUCCESS");
    0
}

fn output_first_main() -> i32 {
    atomic_puts!("starting");
    arch_prctl_main()
}

fn assert_failure_main() -> i32 {
    let (ret, addr) = get_fs();
    test_assert!(ret == 0);
    test_assert!(addr == 0);
    atomic_puts!("EXIT-SUCCESS");
    0
}

fn no_marker_main() -> i32 {
    let (ret, _) = get_fs();
    test_assert!(ret == 0);
    0
}

fn segfault_main() -> i32 {
    // Page zero is never mapped.
    unsafe { ptr::write_volatile(8 as *mut u8, 1) };
    0
}
