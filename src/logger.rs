//! Session logger: routes the `log` facade into a single file in the OS data
//! directory.
//!
//! The file is **truncated at each launch**, so it only ever holds output from
//! the most recent run.
//!
//! Log location:
//!   Windows:  `%APPDATA%\PaintFE\preview.log`
//!   Linux:    `~/.local/share/PaintFE/preview.log`
//!   macOS:    `~/Library/Application Support/PaintFE/preview.log`
//!
//! Worker threads log through the same facade; a panic hook mirrors panic
//! messages into the file before the previous hook runs.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{LevelFilter, Log, Metadata, Record};

static LOGGER: OnceLock<SessionLogger> = OnceLock::new();

struct SessionLogger {
    file: Mutex<File>,
    path: PathBuf,
    /// Also echo warnings and errors to stderr.
    echo: bool,
}

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{}] [{}] [{}] {}",
            timestamp(),
            record.level(),
            thread_label(),
            record.args()
        );
        if self.echo && record.level() <= log::Level::Warn {
            eprintln!("{}", line);
        }
        write_line(&line);
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static Path> {
    LOGGER.get().map(|l| l.path.as_path())
}

/// Write a raw line to the session log. I/O errors are ignored so that
/// logging never takes the process down.
pub fn write_line(line: &str) {
    if let Some(logger) = LOGGER.get()
        && let Ok(mut file) = logger.file.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

/// Initialise the session logger at the default location.
pub fn init(level: LevelFilter, echo: bool) {
    init_at(log_file_path(), level, echo);
}

/// Initialise the session logger writing to `path`. Only the first call in a
/// process takes effect.
///
/// * Creates (or truncates) the log file.
/// * Installs a panic hook that writes the panic message to the log before
///   propagating to the previous handler.
pub fn init_at(path: PathBuf, level: LevelFilter, echo: bool) {
    if LOGGER.get().is_some() {
        return;
    }
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = match OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
    {
        Ok(f) => f,
        Err(e) => {
            // Not fatal, the run just goes unlogged
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            return;
        }
    };

    let logger = SessionLogger {
        file: Mutex::new(file),
        path: path.clone(),
        echo,
    };
    if LOGGER.set(logger).is_err() {
        return;
    }
    let Some(logger) = LOGGER.get() else { return };
    if log::set_logger(logger).is_err() {
        // Someone else owns the facade; keep the file for write_line only.
        eprintln!("[logger] another logger is already installed");
    }
    log::set_max_level(level);

    write_line(&format!(
        "=== paintfe-preview session started {} ===",
        human_timestamp()
    ));
    write_line(&format!("Log file: {}", path.display()));
    write_line("");

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_line(&format!("[{}] [PANIC] [{}] {}", timestamp(), thread_label(), info));
        prev(info);
    }));
}

fn log_file_path() -> PathBuf {
    data_dir().join("PaintFE").join("preview.log")
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

fn thread_label() -> String {
    let current = std::thread::current();
    current.name().unwrap_or("unnamed").to_string()
}

/// HH:MM:SS within the current UTC day.
fn timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => {
            let secs = d.as_secs();
            let h = (secs % 86400) / 3600;
            let m = (secs % 3600) / 60;
            let s = secs % 60;
            format!("{:02}:{:02}:{:02}.{:03}", h, m, s, d.subsec_millis())
        }
        Err(_) => "??:??:??".to_string(),
    }
}

fn human_timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => format!("(unix {})", d.as_secs()),
        Err(_) => "(unknown time)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_has_clock_shape() {
        let ts = timestamp();
        assert_eq!(ts.len(), 12);
        assert_eq!(&ts[2..3], ":");
        assert_eq!(&ts[8..9], ".");
    }

    #[test]
    fn log_lines_reach_the_file() {
        let path = std::env::temp_dir().join(format!("paintfe-preview-{}.log", uuid::Uuid::new_v4()));
        init_at(path.clone(), LevelFilter::Debug, false);
        // Another test may have installed the logger first.
        let Some(active) = log_path() else { return };
        if active != path.as_path() {
            return;
        }
        log::info!("hello from the test");
        log::logger().flush();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("session started"));
        assert!(content.contains("[INFO]"));
        assert!(content.contains("hello from the test"));
        let _ = fs::remove_file(&path);
    }
}
