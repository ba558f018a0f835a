pub mod recording_log;
pub mod syscall_record;
pub mod trace_reader;
pub mod trace_stream;
pub mod trace_writer;
