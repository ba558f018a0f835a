use crate::{
    error::{HarnessError, Result},
    log::LogLevel::LogDebug,
};
use nix::{
    sys::{
        personality::{self, Persona},
        utsname::uname,
    },
    unistd::execv,
};
use std::{env, ffi::CString, os::unix::ffi::OsStringExt};

/// Set in the environment of the re-exec'd harness.
const ASLR_DISABLED_VAR: &str = "SYSREPLAY_ASLR_DISABLED";

pub fn running_without_aslr() -> bool {
    env::var_os(ASLR_DISABLED_VAR).is_some()
        || personality::get().map_or(false, |p| p.contains(Persona::ADDR_NO_RANDOMIZE))
}

/// Re-exec ourselves once with address-space randomization off, so the
/// thread pointer of a workload lands at the same address on every run.
/// Returns only if randomization is already off.
pub fn ensure_aslr_disabled() -> Result<()> {
    if running_without_aslr() {
        return Ok(());
    }
    let persona = personality::get()?;
    personality::set(persona | Persona::ADDR_NO_RANDOMIZE)?;
    env::set_var(ASLR_DISABLED_VAR, "1");

    let argv = env::args_os()
        .map(|a| CString::new(a.into_vec()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| HarnessError::InvalidState(format!("unusable argument: {}", e)))?;
    let exe = CString::new("/proc/self/exe")
        .map_err(|e| HarnessError::InvalidState(e.to_string()))?;
    log!(LogDebug, "re-exec with ADDR_NO_RANDOMIZE");
    match execv(&exe, &argv)? {}
}

/// `(major, minor)` of the running kernel.
pub fn kernel_version() -> Result<(u32, u32)> {
    let unm = uname();
    let release = unm.release();
    parse_kernel_release(release).ok_or_else(|| {
        HarnessError::InvalidState(format!(
            "Could not parse kernel version string. Got: `{}`",
            release
        ))
    })
}

fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.parse::<u32>().ok()?;
    let minor = parts
        .next()?
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse::<u32>()
        .ok()?;
    Some((major, minor))
}

/// PTRACE_O_EXITKILL needs 3.8.
pub fn assert_prerequisites() -> Result<()> {
    let (major, minor) = kernel_version()?;
    if (major, minor) < (3, 8) {
        return Err(HarnessError::InvalidState(format!(
            "Kernel doesn't support necessary ptrace functionality; need 3.8.0 or better, got {}.{}",
            major, minor
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kernel_releases() {
        assert_eq!(parse_kernel_release("5.15.0-91-generic"), Some((5, 15)));
        assert_eq!(parse_kernel_release("6.1"), Some((6, 1)));
        assert_eq!(parse_kernel_release("4.19rc1"), Some((4, 19)));
        assert_eq!(parse_kernel_release("linux"), None);
        assert_eq!(parse_kernel_release("6"), None);
    }

    #[test]
    fn running_kernel_is_new_enough() {
        assert!(assert_prerequisites().is_ok());
    }
}
