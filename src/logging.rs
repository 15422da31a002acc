use std::{
    collections::VecDeque,
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use time::{macros::format_description, OffsetDateTime};

const LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Leveled log sink shared by every component.
///
/// Each line goes to the session log file (when one is open), to the `log`
/// facade, to the optional callback, and into a bounded in-memory tail.
#[derive(Default)]
pub struct Logger {
    path: Option<PathBuf>,
    callback: Option<LogCallback>,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl Logger {
    pub fn new(path: Option<PathBuf>, callback: Option<LogCallback>) -> Self {
        Self {
            path,
            callback,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Logger writing to `logs_dir/civsmith_<stamp>.log`.
    pub fn for_session(logs_dir: &Path, callback: Option<LogCallback>) -> Self {
        Self::new(Some(logs_dir.join(session_log_name())), callback)
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    fn push(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => log::info!("{message}"),
            LogLevel::Warn => log::warn!("{message}"),
            LogLevel::Error => log::error!("{message}"),
        }

        if let Some(path) = &self.path {
            let _ = append_log_file(path, level, &message);
        }
        if let Some(callback) = &self.callback {
            callback(level, &message);
        }

        if let Ok(mut entries) = self.entries.lock() {
            entries.push_back(LogEntry { level, message });
            while entries.len() > LOG_CAPACITY {
                entries.pop_front();
            }
        }
    }
}

fn session_log_name() -> String {
    let now = OffsetDateTime::now_utc();
    let stamp = now
        .format(format_description!(
            "[year][month][day]_[hour][minute][second]"
        ))
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    format!("civsmith_{stamp}.log")
}

fn line_stamp() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_default()
}

fn append_log_file(path: &Path, level: LogLevel, message: &str) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{} [{}] {message}", line_stamp(), level.label())
}
