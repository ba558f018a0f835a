use crate::{
    error::{HarnessError, Result},
    kernel_abi::SupportedArch,
    log::LogLevel::{LogError, LogInfo},
    scoped_fd::ScopedFd,
    trace::{
        recording_log::{encode_entry, encode_header, encode_trailer, SessionId},
        syscall_record::SyscallRecord,
        trace_stream::{latest_trace_symlink, make_trace_dir, TraceHeader, TraceStream, TRACE_VERSION},
    },
};
use nix::{
    errno::Errno,
    fcntl::{flock, FlockArg, OFlag},
    sys::{stat::Mode, utsname::uname},
    unistd::write,
};
use std::{
    fs::{rename, File},
    io::{self, Write},
    os::unix::fs::symlink,
    path::Path,
};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum CloseStatus {
    /// Trace completed normally and can be replayed.
    CloseOk,
    /// Trace completed abnormally due to an error or a violation.
    CloseError,
}

/// Streams one recording into a trace directory. The `incomplete` file is
/// held under an exclusive flock until `close()` renames it to `version`.
pub struct TraceWriter {
    trace_stream: TraceStream,
    syscalls: File,
    version_fd: ScopedFd,
    session_id: SessionId,
    arch: SupportedArch,
    workload: String,
    record_count: u64,
    closed: bool,
}

impl TraceWriter {
    /// The trace name is determined by `workload` and _SYSREPLAY_TRACE_DIR (if set)
    /// or by setting -o=<OUTPUT_TRACE_DIR>.
    pub fn new(
        workload: &str,
        output_trace_dir: Option<&Path>,
        session_id: SessionId,
        arch: SupportedArch,
    ) -> Result<TraceWriter> {
        let trace_stream = TraceStream::new(&make_trace_dir(workload, output_trace_dir)?);

        let ver_path = trace_stream.incomplete_version_path();
        let version_fd = ScopedFd::open_path_with_mode(
            ver_path.as_path(),
            OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_CLOEXEC,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )?;

        // Take an exclusive lock and hold it until we rename the file at
        // the end of recording and then close our file descriptor.
        flock(version_fd.as_raw(), FlockArg::LockExclusiveNonblock)?;
        write_all(&version_fd, format!("{}\n", TRACE_VERSION).as_bytes())?;

        let mut syscalls = File::create(trace_stream.syscalls_path())?;
        let mut header = Vec::new();
        encode_header(session_id, arch, &mut header);
        syscalls.write_all(&header)?;

        log!(
            LogInfo,
            "Saving execution to trace directory {:?}",
            trace_stream.dir()
        );

        Ok(TraceWriter {
            trace_stream,
            syscalls,
            version_fd,
            session_id,
            arch,
            workload: workload.to_owned(),
            record_count: 0,
            closed: false,
        })
    }

    pub fn dir(&self) -> &Path {
        self.trace_stream.dir()
    }

    pub fn write_record(&mut self, record: &SyscallRecord) -> Result<()> {
        if self.closed {
            return Err(HarnessError::LogSealed);
        }
        let mut buf = Vec::new();
        encode_entry(record, &mut buf);
        self.syscalls.write_all(&buf)?;
        self.record_count += 1;
        Ok(())
    }

    /// Seal the `syscalls` file, write the header and publish the trace by
    /// renaming `incomplete` to `version`. Closing twice is a no-op.
    pub fn close(&mut self, status: CloseStatus) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut trailer = Vec::new();
        encode_trailer(self.record_count, &mut trailer);
        self.syscalls.write_all(&trailer)?;
        self.syscalls.sync_all()?;

        let header = TraceHeader {
            version: TRACE_VERSION,
            session_id: self.session_id,
            arch: self.arch,
            workload: self.workload.clone(),
            record_count: self.record_count,
            ok: status == CloseStatus::CloseOk,
            kernel_release: uname().release().to_owned(),
        };
        let json = serde_json::to_string_pretty(&header)
            .map_err(|e| HarnessError::TraceFormat(e.to_string()))?;
        write_all(&self.version_fd, json.as_bytes())?;
        write_all(&self.version_fd, b"\n")?;

        let incomplete_path = self.trace_stream.incomplete_version_path();
        rename(&incomplete_path, self.trace_stream.version_path())?;
        self.version_fd.close();
        Ok(())
    }

    /// We got far enough into recording that we should set this as the latest
    /// trace.
    pub fn make_latest_trace(&self) -> Result<()> {
        let link_name = latest_trace_symlink();
        match std::fs::remove_file(&link_name) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::NotFound => (),
            Err(e) => return Err(e.into()),
        }

        // Link only the trace name, not the full path, so moving a directory full
        // of traces around doesn't break the latest-trace link.
        let trace_name = self
            .dir()
            .file_name()
            .ok_or_else(|| HarnessError::InvalidState(format!("bad trace dir {:?}", self.dir())))?;
        match symlink(trace_name, &link_name) {
            // Another sysreplay raced us to it; its trace is recent enough.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            r => Ok(r?),
        }
    }
}

impl Drop for TraceWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close(CloseStatus::CloseError) {
                log!(LogError, "Unable to close trace {:?}: {}", self.dir(), e);
            }
        }
    }
}

fn write_all(fd: &ScopedFd, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        match write(fd.as_raw(), buf) {
            Ok(0) => return Err(HarnessError::Sys(Errno::EIO)),
            Ok(n) => buf = &buf[n..],
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::recording_log::RecordingLog;
    use std::fs;

    fn record(seq: u64) -> SyscallRecord {
        SyscallRecord {
            syscall_id: 158,
            arguments: vec![0x1003, 0x7ffd_0000],
            captured_output: Some(vec![7; 8]),
            result_code: 0,
            sequence_number: seq,
        }
    }

    #[test]
    fn lifecycle_incomplete_then_version() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("trace");
        let sid = SessionId::from_raw(42);
        let mut w = TraceWriter::new("arch_prctl", Some(&dir), sid, SupportedArch::X64).unwrap();
        let stream = TraceStream::new(&dir);
        assert!(stream.incomplete_version_path().exists());
        assert!(!stream.version_path().exists());

        // Someone else can't take the lock while we record.
        let other = File::open(stream.incomplete_version_path()).unwrap();
        assert!(flock(
            std::os::unix::io::AsRawFd::as_raw_fd(&other),
            FlockArg::LockExclusiveNonblock
        )
        .is_err());

        w.write_record(&record(0)).unwrap();
        w.write_record(&record(1)).unwrap();
        w.close(CloseStatus::CloseOk).unwrap();
        w.close(CloseStatus::CloseOk).unwrap();

        assert!(!stream.incomplete_version_path().exists());
        let version = fs::read_to_string(stream.version_path()).unwrap();
        let mut lines = version.splitn(2, '\n');
        assert_eq!(lines.next(), Some("1"));
        let header: TraceHeader = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(header.record_count, 2);
        assert_eq!(header.session_id, sid);
        assert!(header.ok);

        let log = RecordingLog::decode(&fs::read(stream.syscalls_path()).unwrap()).unwrap();
        assert!(log.is_sealed());
        assert_eq!(log.len(), 2);
        assert_eq!(log.lookup(1).unwrap(), &record(1));
    }

    #[test]
    fn dropped_writer_closes_with_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("trace");
        {
            let mut w =
                TraceWriter::new("arch_prctl", Some(&dir), SessionId::from_raw(1), SupportedArch::X64)
                    .unwrap();
            w.write_record(&record(0)).unwrap();
        }
        let version = fs::read_to_string(TraceStream::new(&dir).version_path()).unwrap();
        let header: TraceHeader = serde_json::from_str(version.splitn(2, '\n').nth(1).unwrap()).unwrap();
        assert!(!header.ok);
        assert_eq!(header.record_count, 1);
    }
}
