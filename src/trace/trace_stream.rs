use crate::{
    kernel_abi::SupportedArch,
    trace::recording_log::SessionId,
};
use serde::{Deserialize, Serialize};
use std::{
    env,
    ffi::OsString,
    fs, io,
    os::unix::fs::DirBuilderExt,
    path::{Path, PathBuf},
};

/// Update this when the layout of a trace directory changes.
pub const TRACE_VERSION: u32 = 1;

pub const SYSCALLS_FILE: &str = "syscalls";
pub const VERSION_FILE: &str = "version";
pub const INCOMPLETE_VERSION_FILE: &str = "incomplete";
pub const LATEST_TRACE: &str = "latest-trace";

/// Written after the version line once the recording is closed.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceHeader {
    pub version: u32,
    pub session_id: SessionId,
    pub arch: SupportedArch,
    pub workload: String,
    pub record_count: u64,
    /// False when the recording was cut short by an error or a violation.
    pub ok: bool,
    pub kernel_release: String,
}

/// TraceStream stores the data common to both recording and replay:
/// where the trace lives and what its files are called.
#[derive(Clone, Debug)]
pub struct TraceStream {
    /// Directory into which we're saving the trace files.
    trace_dir: PathBuf,
}

impl TraceStream {
    pub fn new(trace_dir: &Path) -> TraceStream {
        TraceStream {
            trace_dir: trace_dir.to_owned(),
        }
    }

    /// Return the directory storing this trace's files.
    pub fn dir(&self) -> &Path {
        &self.trace_dir
    }

    pub fn syscalls_path(&self) -> PathBuf {
        self.trace_dir.join(SYSCALLS_FILE)
    }

    /// Return the path of "version" file, which holds the trace format version
    /// and the trace header.
    pub fn version_path(&self) -> PathBuf {
        self.trace_dir.join(VERSION_FILE)
    }

    /// While the trace is being built, the version file is stored under this name.
    /// When the trace is closed we rename it to the correct name. This lets us
    /// detect incomplete traces.
    pub fn incomplete_version_path(&self) -> PathBuf {
        self.trace_dir.join(INCOMPLETE_VERSION_FILE)
    }
}

/// `$_SYSREPLAY_TRACE_DIR`, else `$XDG_DATA_HOME/sysreplay`, else `$HOME/.local/share/sysreplay`.
pub fn trace_save_dir() -> PathBuf {
    trace_save_dir_from(|k| env::var_os(k))
}

fn trace_save_dir_from<F: Fn(&str) -> Option<OsString>>(var: F) -> PathBuf {
    let non_empty = |k: &str| var(k).filter(|v| !v.is_empty());
    if let Some(dir) = non_empty("_SYSREPLAY_TRACE_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(xdg) = non_empty("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join("sysreplay");
    }
    let home = non_empty("HOME").unwrap_or_else(|| OsString::from("/tmp"));
    PathBuf::from(home).join(".local/share/sysreplay")
}

pub fn latest_trace_symlink() -> PathBuf {
    trace_save_dir().join(LATEST_TRACE)
}

/// Creates the directory a new trace is written to. With `output_trace_dir`
/// that exact directory is created and must not exist yet. Otherwise the
/// first free `<save_dir>/<workload>-<n>` is taken.
pub fn make_trace_dir(workload: &str, output_trace_dir: Option<&Path>) -> io::Result<PathBuf> {
    match output_trace_dir {
        Some(dir) => {
            fs::DirBuilder::new().mode(0o770).create(dir)?;
            Ok(dir.to_owned())
        }
        None => make_numbered_dir(&trace_save_dir(), workload),
    }
}

fn make_numbered_dir(save_dir: &Path, workload: &str) -> io::Result<PathBuf> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(save_dir)?;
    let mut nonce = 0u32;
    loop {
        let dir = save_dir.join(format!("{}-{}", workload, nonce));
        match fs::DirBuilder::new().mode(0o770).create(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => nonce += 1,
            Err(e) => return Err(e),
        }
    }
}

/// No name means `latest-trace`. Single-component names are looked up first in
/// the current directory, next in the default trace dir.
pub fn resolve_trace_name(maybe_trace_name: Option<&Path>) -> PathBuf {
    let trace_name = match maybe_trace_name {
        None => return latest_trace_symlink(),
        Some(name) => name,
    };

    if trace_name.components().count() == 1 && !trace_name.is_dir() {
        let in_save_dir = trace_save_dir().join(trace_name);
        if in_save_dir.is_dir() {
            return in_save_dir;
        }
    }

    trace_name.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let m: HashMap<String, OsString> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |k| m.get(k).cloned()
    }

    #[test]
    fn save_dir_precedence() {
        assert_eq!(
            trace_save_dir_from(env_of(&[
                ("_SYSREPLAY_TRACE_DIR", "/traces"),
                ("XDG_DATA_HOME", "/xdg"),
                ("HOME", "/home/u")
            ])),
            PathBuf::from("/traces")
        );
        assert_eq!(
            trace_save_dir_from(env_of(&[("XDG_DATA_HOME", "/xdg"), ("HOME", "/home/u")])),
            PathBuf::from("/xdg/sysreplay")
        );
        assert_eq!(
            trace_save_dir_from(env_of(&[("XDG_DATA_HOME", ""), ("HOME", "/home/u")])),
            PathBuf::from("/home/u/.local/share/sysreplay")
        );
    }

    #[test]
    fn numbered_dirs_do_not_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let save = tmp.path().join("save");
        let a = make_numbered_dir(&save, "arch_prctl").unwrap();
        let b = make_numbered_dir(&save, "arch_prctl").unwrap();
        assert_eq!(a, save.join("arch_prctl-0"));
        assert_eq!(b, save.join("arch_prctl-1"));
    }

    #[test]
    fn explicit_output_dir_must_be_new() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("out");
        assert_eq!(make_trace_dir("w", Some(&dir)).unwrap(), dir);
        assert!(make_trace_dir("w", Some(&dir)).is_err());
    }

    #[test]
    fn stream_paths() {
        let s = TraceStream::new(Path::new("/t/arch_prctl-0"));
        assert_eq!(s.syscalls_path(), PathBuf::from("/t/arch_prctl-0/syscalls"));
        assert_eq!(s.version_path(), PathBuf::from("/t/arch_prctl-0/version"));
        assert_eq!(
            s.incomplete_version_path(),
            PathBuf::from("/t/arch_prctl-0/incomplete")
        );
    }
}
