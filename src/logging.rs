/*
================================================================================
                            PhotoStyler Logging
================================================================================

Console logging through `env_logger`, mirrored into an in-memory ring buffer so
the most recent records can be exported on demand or dumped next to a panic
report.

- `setup_logger()`: installs a `CompositeLogger` (console + buffer)
- `setup_panic_hook()`: writes build info, the panic, a backtrace and the
  buffered log to `<data dir>/photostyler/logs/panic.log`
- `export_debug_logs()`: writes the buffered log to `debug.log`

Log levels:
- `RUST_LOG` wins when set
- Debug builds: DEBUG and above for this crate
- Release builds: INFO and above for this crate
- Other crates are silenced unless `RUST_LOG` asks for them

================================================================================
*/

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use backtrace::Backtrace;
use chrono::Utc;
use env_logger::fmt::{Color, Formatter};
use log::{Level, LevelFilter, Metadata, Record};

use crate::build_info::BuildInfo;

pub const APP_NAME: &str = "photostyler";
const MAX_LOG_LINES: usize = 1000;

pub type LogBuffer = Arc<Mutex<VecDeque<String>>>;

struct BufferLogger {
    log_buffer: LogBuffer,
}

impl BufferLogger {
    fn new() -> Self {
        Self {
            log_buffer: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_LOG_LINES))),
        }
    }

    fn log_to_buffer(&self, message: &str, target: &str, line: Option<u32>) {
        if !target.starts_with(APP_NAME) {
            return;
        }
        let Ok(mut buffer) = self.log_buffer.lock() else {
            return;
        };
        if buffer.len() == MAX_LOG_LINES {
            buffer.pop_front();
        }

        let timestamp = Utc::now().format("%H:%M:%S%.3f");
        let formatted_message = match line {
            Some(line_num) => format!("{timestamp} {target}:{line_num} {message}"),
            None => format!("{timestamp} {target} {message}"),
        };
        buffer.push_back(formatted_message);
    }

    fn get_shared_buffer(&self) -> LogBuffer {
        Arc::clone(&self.log_buffer)
    }
}

impl log::Log for BufferLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.target().starts_with(APP_NAME) && metadata.level() <= LevelFilter::Debug
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let message = format!("{:<5} {}", record.level(), record.args());
            self.log_to_buffer(&message, record.target(), record.line());
        }
    }

    fn flush(&self) {}
}

struct CompositeLogger {
    console_logger: env_logger::Logger,
    buffer_logger: BufferLogger,
}

impl log::Log for CompositeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console_logger.enabled(metadata) || self.buffer_logger.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.console_logger.enabled(record.metadata()) {
            self.console_logger.log(record);
        }
        if self.buffer_logger.enabled(record.metadata()) {
            self.buffer_logger.log(record);
        }
    }

    fn flush(&self) {
        self.console_logger.flush();
        self.buffer_logger.flush();
    }
}

/// Installs the console + buffer logger and returns the shared buffer.
///
/// Calling this twice is harmless: the second logger is dropped and a fresh,
/// unattached buffer is returned.
pub fn setup_logger() -> LogBuffer {
    let buffer_logger = BufferLogger::new();
    let shared_buffer = buffer_logger.get_shared_buffer();

    let mut builder = env_logger::Builder::new();

    if std::env::var("RUST_LOG").is_ok() {
        builder.parse_env("RUST_LOG");
    } else {
        builder.filter(None, LevelFilter::Off);
        if cfg!(debug_assertions) {
            builder.filter(Some(APP_NAME), LevelFilter::Debug);
        } else {
            builder.filter(Some(APP_NAME), LevelFilter::Info);
        }
    }

    builder.format(|buf: &mut Formatter, record: &Record| {
        let mut level_style = buf.style();
        match record.level() {
            Level::Error => level_style.set_color(Color::Red).set_bold(true),
            Level::Warn => level_style.set_color(Color::Yellow).set_bold(true),
            Level::Info => level_style.set_color(Color::Green),
            Level::Debug => level_style.set_color(Color::Cyan),
            Level::Trace => level_style.set_color(Color::White),
        };
        let mut dim = buf.style();
        dim.set_dimmed(true);

        let location = format!(
            "{}:{}",
            record.module_path().unwrap_or("?"),
            record.line().unwrap_or(0)
        );
        writeln!(
            buf,
            "{} {:<5} {} {}",
            dim.value(Utc::now().format("%H:%M:%S%.3f")),
            level_style.value(record.level()),
            dim.value(location),
            record.args()
        )
    });

    let console_logger = builder.build();
    let composite_logger = CompositeLogger {
        console_logger,
        buffer_logger,
    };

    if log::set_boxed_logger(Box::new(composite_logger)).is_ok() {
        // Filtering happens in the loggers themselves
        log::set_max_level(LevelFilter::Trace);
    }

    shared_buffer
}

pub fn get_log_directory() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("logs")
}

/// Writes the buffered log lines to `debug.log` in the log directory.
///
/// Uses `eprintln!` for its own diagnostics so the export does not append to
/// the buffer it is draining.
pub fn export_debug_logs(log_buffer: &LogBuffer) -> Result<PathBuf, std::io::Error> {
    export_debug_logs_to(&get_log_directory(), log_buffer)
}

fn export_debug_logs_to(log_dir: &Path, log_buffer: &LogBuffer) -> Result<PathBuf, std::io::Error> {
    std::fs::create_dir_all(log_dir)?;
    let debug_log_path = log_dir.join("debug.log");

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&debug_log_path)?;

    writeln!(file, "{} debug log exported {}", APP_NAME, Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))?;
    writeln!(file, "{}", "=".repeat(80))?;

    let lines: Vec<String> = match log_buffer.lock() {
        Ok(buffer) => buffer.iter().cloned().collect(),
        Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
    };
    if lines.is_empty() {
        writeln!(file, "(no log entries captured)")?;
    }
    for line in &lines {
        writeln!(file, "{}", line)?;
    }
    file.flush()?;

    eprintln!("Exported {} log lines to {}", lines.len(), debug_log_path.display());
    Ok(debug_log_path)
}

/// Replaces the panic hook with one that also writes `panic.log`.
pub fn setup_panic_hook(log_buffer: LogBuffer) {
    let log_dir = get_log_directory();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory {}: {}", log_dir.display(), e);
        return;
    }
    let report_path = log_dir.join("panic.log");

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let report = panic_report(&info.to_string(), &Backtrace::new(), &log_buffer);
        if let Err(e) = std::fs::write(&report_path, report) {
            eprintln!("Failed to write {}: {}", report_path.display(), e);
        } else {
            eprintln!("Panic report written to {}", report_path.display());
        }
        default_hook(info);
    }));
}

fn panic_report(message: &str, backtrace: &Backtrace, log_buffer: &LogBuffer) -> String {
    let mut report = format!(
        "{} {} panicked at {}\n{}\n\n{}\n\nBacktrace:\n{:?}\n\nLast log entries:\n",
        APP_NAME,
        BuildInfo::display_version(),
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        BuildInfo::detailed_info(),
        message,
        backtrace
    );
    // The panic may have happened while the buffer was locked
    let lines = match log_buffer.lock() {
        Ok(buffer) => buffer.iter().cloned().collect::<Vec<_>>(),
        Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
    };
    for line in lines {
        report.push_str(&line);
        report.push('\n');
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_keeps_only_recent_lines_from_this_crate() {
        let logger = BufferLogger::new();
        for i in 0..(MAX_LOG_LINES + 5) {
            logger.log_to_buffer(&format!("line {i}"), "photostyler::app", Some(1));
        }
        logger.log_to_buffer("noise", "reqwest::connect", None);

        let buffer = logger.get_shared_buffer();
        let buffer = buffer.lock().unwrap();
        assert_eq!(buffer.len(), MAX_LOG_LINES);
        assert!(buffer.front().unwrap().ends_with("photostyler::app:1 line 5"));
        assert!(buffer.iter().all(|l| !l.contains("noise")));
    }

    #[test]
    fn panic_report_carries_message_and_log() {
        let buffer: LogBuffer = Arc::new(Mutex::new(VecDeque::from(vec!["12:00:00.000 last words".to_string()])));
        let report = panic_report("index out of bounds", &Backtrace::new_unresolved(), &buffer);
        assert!(report.starts_with("photostyler "));
        assert!(report.contains("index out of bounds"));
        assert!(report.contains("Commit: "));
        assert!(report.ends_with("12:00:00.000 last words\n"));
    }

    #[test]
    fn export_writes_buffered_lines() {
        let dir = tempfile::tempdir().unwrap();
        let buffer: LogBuffer = Arc::new(Mutex::new(VecDeque::new()));
        buffer.lock().unwrap().push_back("first".to_string());
        buffer.lock().unwrap().push_back("second".to_string());

        let path = export_debug_logs_to(dir.path(), &buffer).unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.contains("first\nsecond\n"));
    }
}
