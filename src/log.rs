use crate::kernel_metadata::errno_name;
use backtrace::Backtrace;
use nix::errno::errno;
use std::{
    collections::HashMap,
    env,
    env::var_os,
    fs::{File, OpenOptions},
    io::{self, BufWriter, Result, Write},
    path::Path,
    sync::{Mutex, MutexGuard},
};

#[derive(Clone)]
struct LogModule {
    name: String,
    level: LogLevel,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub enum LogLevel {
    LogFatal,
    LogError,
    LogWarn,
    LogInfo,
    LogDebug,
}

pub use LogLevel::*;

struct LogGlobals {
    level_map: HashMap<String, LogLevel>,
    log_modules_cache: HashMap<String, LogModule>,
    /// Possibly buffered
    log_file: Box<dyn Write + Send>,
    default_level: LogLevel,
}

extern "C" fn flush_log_buffer() {
    // A poisoned lock means some thread panicked mid-log. Flush what we can anyway.
    let mut lock = match LOG_GLOBALS.lock() {
        Ok(lock) => lock,
        Err(poisoned) => poisoned.into_inner(),
    };
    lock.log_file.flush().unwrap_or(());
}

lazy_static! {
    static ref LOG_GLOBALS: Mutex<LogGlobals> = {
        let mut f: Box<dyn Write + Send> = open_log_file();

        if let Ok(buf_size) = env::var("SYSREPLAY_LOG_BUFFER") {
            match buf_size.parse::<usize>() {
                Ok(log_buffer_size) => f = Box::new(BufWriter::with_capacity(log_buffer_size, f)),
                Err(_) => eprintln!(
                    "sysreplay: ignoring `{}' in SYSREPLAY_LOG_BUFFER, not a number",
                    buf_size
                ),
            }
        }

        let ret = unsafe { libc::atexit(flush_log_buffer) };
        debug_assert_eq!(ret, 0);

        let (default_level, level_map) = match env::var("SYSREPLAY_LOG") {
            Ok(sysreplay_log) => init_log_levels(&sysreplay_log),
            Err(_) => (LogError, HashMap::new()),
        };

        Mutex::new(LogGlobals {
            level_map,
            log_modules_cache: HashMap::new(),
            log_file: f,
            default_level,
        })
    };
}

/// Log to SYSREPLAY_LOG_FILE, or append to SYSREPLAY_APPEND_LOG_FILE, or fall back to stderr.
fn open_log_file() -> Box<dyn Write + Send> {
    if let Some(filename) = var_os("SYSREPLAY_LOG_FILE") {
        match File::create(&filename) {
            Ok(f) => return Box::new(f),
            Err(e) => eprintln!(
                "sysreplay: could not create {:?} (SYSREPLAY_LOG_FILE): {}. Logging to stderr",
                filename, e
            ),
        }
    } else if let Some(append_filename) = var_os("SYSREPLAY_APPEND_LOG_FILE") {
        match OpenOptions::new()
            .append(true)
            .create(true)
            .open(&append_filename)
        {
            Ok(f) => return Box::new(f),
            Err(e) => eprintln!(
                "sysreplay: could not append to {:?} (SYSREPLAY_APPEND_LOG_FILE): {}. Logging to stderr",
                append_filename, e
            ),
        }
    }

    Box::new(io::stderr())
}

fn log_level_string_to_level(log_level_string: &str) -> LogLevel {
    match log_level_string {
        "fatal" => LogFatal,
        "error" => LogError,
        "warn" => LogWarn,
        "info" => LogInfo,
        "debug" => LogDebug,
        _ => LogWarn,
    }
}

/// Parses `all:warn,replay_session:debug` style specs.
fn init_log_levels(sysreplay_log: &str) -> (LogLevel, HashMap<String, LogLevel>) {
    let mut hm: HashMap<String, LogLevel> = HashMap::new();
    let mut default_level = LogDebug;
    for mod_colon_level in sysreplay_log.split(',') {
        let res: Vec<&str> = mod_colon_level.splitn(2, ':').collect();
        if res.len() == 2 {
            let mod_name = res[0].trim();
            let log_level_string = res[1].trim();
            if mod_name == "all" {
                default_level = log_level_string_to_level(log_level_string);
            } else {
                hm.insert(
                    mod_name.to_owned(),
                    log_level_string_to_level(log_level_string),
                );
            }
        }
    }
    (default_level, hm)
}

fn get_log_level(module_name: &str, l: &MutexGuard<LogGlobals>) -> LogLevel {
    // We DONT lowercase here as filenames are usually case sensitive on Linux.
    match l.level_map.get(module_name) {
        Some(log_level) => *log_level,
        None => l.default_level,
    }
}

/// `src/session/replay_session.rs` is the module `replay_session`.
fn filename_to_module_name(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map_or_else(|| filename.to_owned(), |s| s.to_string_lossy().to_string())
}

fn get_log_module(filename: &str, l: &mut MutexGuard<LogGlobals>) -> LogModule {
    if let Some(log_module) = l.log_modules_cache.get(filename) {
        return log_module.to_owned();
    }

    let name = filename_to_module_name(filename);
    let level = get_log_level(&name, l);
    let m = LogModule { level, name };
    l.log_modules_cache.insert(filename.to_owned(), m.clone());
    m
}

fn log_name(level: LogLevel) -> &'static str {
    match level {
        LogFatal => "FATAL",
        LogError => "ERROR",
        LogWarn => "WARN",
        LogInfo => "INFO",
        LogDebug => "DEBUG",
    }
}

fn lock_globals() -> MutexGuard<'static, LogGlobals> {
    match LOG_GLOBALS.lock() {
        Ok(lock) => lock,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Collects one log line and writes it, newline terminated, when dropped.
pub struct NewLineTerminatingOstream {
    message: Vec<u8>,
    lock: MutexGuard<'static, LogGlobals>,
}

impl NewLineTerminatingOstream {
    fn new(
        level: LogLevel,
        filename: &str,
        line: u32,
        always_enabled: bool,
    ) -> Option<NewLineTerminatingOstream> {
        let mut lock = lock_globals();
        let m = get_log_module(filename, &mut lock);
        if !always_enabled && level > m.level {
            return None;
        }

        let mut stream = NewLineTerminatingOstream {
            message: Vec::new(),
            lock,
        };
        if level == LogDebug {
            write!(stream, "[{}] ", m.name).unwrap_or(());
        } else {
            write_prefix(&mut stream, level, filename, line);
        }

        Some(stream)
    }
}

/// Low level. Use is_logging!() macro instead.
pub fn is_logging(level: LogLevel, filename: &str) -> bool {
    let mut lock = lock_globals();
    let m = get_log_module(filename, &mut lock);
    level <= m.level
}

impl Drop for NewLineTerminatingOstream {
    fn drop(&mut self) {
        self.message.push(b'\n');
        // This flushes self.message *to* the log file. It does NOT flush the
        // log file itself; that happens at exit or in notifying_abort().
        self.flush().unwrap_or(());
    }
}

impl Write for NewLineTerminatingOstream {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.message.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.message.is_empty() {
            self.lock.log_file.write_all(&self.message)?;
        }
        self.message.clear();
        Ok(())
    }
}

pub fn write_prefix(stream: &mut dyn Write, level: LogLevel, filename: &str, line: u32) {
    write!(stream, "[{} {}:{}", log_name(level), filename, line).unwrap_or(());

    let err = errno();
    if level <= LogWarn && err != 0 {
        write!(stream, " errno: {}", errno_name(err)).unwrap_or(());
    }
    write!(stream, "] ").unwrap_or(());
}

/// This is almost always not the method you want. Use log!() macro instead
pub fn log(
    log_level: LogLevel,
    filename: &str,
    line: u32,
    always_enabled: bool,
) -> Option<NewLineTerminatingOstream> {
    NewLineTerminatingOstream::new(log_level, filename, line, always_enabled)
}

/// Outputs to (possibly write buffered) log file (or stderr if no log file was specified)
/// After this program continues normally.
macro_rules! log {
    ($log_level:expr, $($args:tt)+) => {
        {
            use std::io::Write;
            if let Some(mut stream) = crate::log::log($log_level, file!(), line!(), false) {
                write!(stream, $($args)+).unwrap_or(());
            }
        }
    };
}

macro_rules! is_logging {
    ($log_level:expr) => {
        crate::log::is_logging($log_level, file!())
    };
}

/// Outputs to (possibly write buffered) log file (or stderr if no log file was specified)
/// Prints out the backtrace to stderr and aborts.
macro_rules! fatal {
    ($($args:tt)+) => {
        {
            {
                use std::io::Write;
                if let Some(mut stream) =
                    crate::log::log(crate::log::LogFatal, file!(), line!(), true)
                {
                    write!(stream, $($args)+).unwrap_or(());
                }
            }
            crate::log::notifying_abort(backtrace::Backtrace::new());
        }
    };
}

/// Dump the stacktrace and abort.
pub fn notifying_abort(bt: Backtrace) -> ! {
    flush_log_buffer();
    eprintln!("=== Start sysreplay backtrace:");
    eprintln!("{:?}", bt);
    eprintln!("=== End sysreplay backtrace");
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_module_levels() {
        let (default_level, levels) = init_log_levels("all:warn, replay_session:debug,bogus");
        assert_eq!(default_level, LogWarn);
        assert_eq!(levels.get("replay_session"), Some(&LogDebug));
        assert_eq!(levels.len(), 1);
    }

    #[test]
    fn unknown_level_means_warn() {
        let (default_level, levels) = init_log_levels("record_session:chatty");
        assert_eq!(default_level, LogDebug);
        assert_eq!(levels.get("record_session"), Some(&LogWarn));
    }

    #[test]
    fn module_name_is_file_stem() {
        assert_eq!(
            filename_to_module_name("src/session/replay_session.rs"),
            "replay_session"
        );
    }
}
