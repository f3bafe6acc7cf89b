//! Device-local log.
//!
//! Each agent keeps a log inside its device's virtual file store, next to
//! the `tracing` events the rest of the process emits. Lines look like
//! `\nInfo| Initializing` or, for service errors,
//! `\nFATAL|0x0003 | UnauthorizedAPI: bad key`.

use invsim_core::{FileStore, Settings};
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::protocol::ApiErrorEntry;

/// Default `loglevel` when the bootstrap config has none.
pub const DEFAULT_LOGLEVEL: i64 = 3;

/// Journal severity. Lower is more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Fatal = 0,
    Error = 1,
    Warning = 2,
    Notice = 3,
    Info = 4,
}

impl Level {
    pub fn label(&self) -> &'static str {
        match self {
            Level::Fatal => "FATAL",
            Level::Error => "ERROR",
            Level::Warning => "WARNING",
            Level::Notice => "Notice",
            Level::Info => "Info",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Writer for one device's log file.
#[derive(Debug, Clone)]
pub struct Journal {
    serial: String,
    logfile: Option<String>,
    loglevel: i64,
}

impl Journal {
    /// Journal that only emits `tracing` events.
    pub fn detached(serial: impl Into<String>) -> Self {
        Journal {
            serial: serial.into(),
            logfile: None,
            loglevel: DEFAULT_LOGLEVEL,
        }
    }

    /// Journal configured from `logfile`/`loglevel`. Creates an empty log
    /// file when one is configured but missing.
    pub fn open(serial: impl Into<String>, settings: &Settings, files: &mut FileStore) -> Self {
        let logfile = settings.logfile().filter(|f| !f.is_empty()).map(str::to_string);
        if let Some(name) = &logfile {
            if !files.exists(name) {
                files.put(name.clone(), "");
            }
        }

        Journal {
            serial: serial.into(),
            logfile,
            loglevel: settings.loglevel().unwrap_or(DEFAULT_LOGLEVEL),
        }
    }

    pub fn log(&self, files: &mut FileStore, level: Level, message: &str) {
        self.emit(level, message);
        self.write(files, level, &format!(" {message}"));
    }

    /// Logs a structured service error as `code | type: message`.
    pub fn log_api_error(&self, files: &mut FileStore, level: Level, entry: &ApiErrorEntry) {
        let rendered = entry.to_string();
        self.emit(level, &rendered);
        self.write(files, level, &rendered);
    }

    fn write(&self, files: &mut FileStore, level: Level, text: &str) {
        if (level as i64) > self.loglevel {
            return;
        }
        if let Some(name) = &self.logfile {
            files.append(name, &format!("\n{}|{}", level.label(), text));
        }
    }

    fn emit(&self, level: Level, message: &str) {
        let serial = self.serial.as_str();
        match level {
            Level::Fatal | Level::Error => error!(serial, "{message}"),
            Level::Warning => warn!(serial, "{message}"),
            Level::Notice => info!(serial, "{message}"),
            Level::Info => debug!(serial, "{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(level: i64) -> Settings {
        let mut s = Settings::new();
        s.set("logfile", json!("inv.log"));
        s.set("loglevel", json!(level));
        s
    }

    #[test]
    fn test_creates_missing_logfile() {
        let mut files = FileStore::new();
        Journal::open("ABC123", &settings(3), &mut files);
        assert_eq!(files.get("inv.log"), Some(""));
    }

    #[test]
    fn test_level_filter_and_format() {
        let mut files = FileStore::new();
        let journal = Journal::open("ABC123", &settings(3), &mut files);

        journal.log(&mut files, Level::Notice, "Initializing");
        journal.log(&mut files, Level::Info, "too chatty");
        journal.log_api_error(
            &mut files,
            Level::Fatal,
            &ApiErrorEntry {
                code: "0x0009".into(),
                kind: "BadThing".into(),
                message: "broken".into(),
            },
        );

        assert_eq!(
            files.get("inv.log"),
            Some("\nNotice| Initializing\nFATAL|0x0009 | BadThing: broken")
        );
    }

    #[test]
    fn test_detached_writes_nothing() {
        let mut files = FileStore::new();
        Journal::detached("ABC123").log(&mut files, Level::Fatal, "CRASHED");
        assert!(files.is_empty());
    }
}
