use crate::{
    error::{HarnessError, Result},
    trace::{
        recording_log::RecordingLog,
        trace_stream::{resolve_trace_name, TraceHeader, TraceStream, TRACE_VERSION},
    },
};
use std::{fs, io, path::Path};

/// A finished trace directory, loaded whole.
pub struct TraceReader {
    trace_stream: TraceStream,
    header: TraceHeader,
    log: RecordingLog,
}

impl TraceReader {
    /// `None` means the `latest-trace` symlink.
    pub fn new(maybe_dir: Option<&Path>) -> Result<TraceReader> {
        let trace_stream = TraceStream::new(&resolve_trace_name(maybe_dir));

        let path = trace_stream.version_path();
        let version_file = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let incomplete_path = trace_stream.incomplete_version_path();
                return Err(HarnessError::TraceFormat(if incomplete_path.exists() {
                    format!(
                        "trace file {:?} found: recording terminated abnormally and the trace is incomplete",
                        incomplete_path
                    )
                } else {
                    format!("trace file {:?} not found: there is no trace there", path)
                }));
            }
            Err(e) => return Err(e.into()),
        };

        let mut parts = version_file.splitn(2, '\n');
        let version = parts
            .next()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .ok_or_else(|| {
                HarnessError::TraceFormat(format!("could not parse version file {:?}", path))
            })?;
        if version != TRACE_VERSION {
            return Err(HarnessError::TraceFormat(format!(
                "trace version {} is not supported; this sysreplay understands version {}",
                version, TRACE_VERSION
            )));
        }
        let header: TraceHeader = serde_json::from_str(parts.next().unwrap_or(""))
            .map_err(|e| HarnessError::TraceFormat(format!("bad trace header: {}", e)))?;

        let log = RecordingLog::decode(&fs::read(trace_stream.syscalls_path())?)?;
        if !log.is_sealed() {
            return Err(HarnessError::NotSealed);
        }
        if log.session_id() != header.session_id || log.len() != header.record_count {
            return Err(HarnessError::TraceFormat(format!(
                "header (session {}, {} records) does not match syscalls file (session {}, {} records)",
                header.session_id,
                header.record_count,
                log.session_id(),
                log.len()
            )));
        }

        Ok(TraceReader {
            trace_stream,
            header,
            log,
        })
    }

    pub fn dir(&self) -> &Path {
        self.trace_stream.dir()
    }

    pub fn header(&self) -> &TraceHeader {
        &self.header
    }

    pub fn log(&self) -> &RecordingLog {
        &self.log
    }
}
