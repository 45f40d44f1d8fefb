use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::paths::ktc_log_dir;

static SESSION_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Per-session logger. Info and above go to `<app>.log`, debug and trace
/// to `<app>.dbg.log`; everything allowed by the level is mirrored to stderr.
pub struct FileLogger {
    main_file: Mutex<File>,
    debug_file: Mutex<File>,
    level: LevelFilter,
}

impl FileLogger {
    pub fn init(app_name: &str, level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
        let log_dir = ktc_log_dir();
        fs::create_dir_all(&log_dir)?;

        let session_num = Self::next_session_number(&log_dir);
        let session_dir = log_dir.join(format!("session-{}", session_num));
        fs::create_dir_all(&session_dir)?;

        if let Ok(mut guard) = SESSION_DIR.lock() {
            *guard = Some(session_dir.clone());
        }

        let main_file = Self::open_log_file(&session_dir, &format!("{}.log", app_name))?;
        let debug_file = Self::open_log_file(&session_dir, &format!("{}.dbg.log", app_name))?;

        let logger = FileLogger {
            main_file: Mutex::new(main_file),
            debug_file: Mutex::new(debug_file),
            level,
        };

        log::set_max_level(level);
        log::set_logger(Box::leak(Box::new(logger)))
            .map_err(|e| format!("Failed to set logger: {}", e))?;

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        log::info!("=== {} session {} ===", app_name, session_num);
        log::info!("Log directory: {}", session_dir.display());
        log::info!("Started at: {}", timestamp);

        Ok(())
    }

    fn open_log_file(dir: &Path, name: &str) -> Result<File, Box<dyn std::error::Error>> {
        let path = dir.join(name);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(file)
    }

    fn next_session_number(log_dir: &Path) -> u32 {
        let mut max_num = 0u32;

        if let Ok(entries) = fs::read_dir(log_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name_str = name.to_string_lossy();

                if let Some(rest) = name_str.strip_prefix("session-") {
                    if let Ok(num) = rest.parse::<u32>() {
                        max_num = max_num.max(num);
                    }
                }
            }
        }

        max_num + 1
    }
}

impl log::Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Local::now().format("%H:%M:%S%.3f");
        let level_char = match record.level() {
            Level::Error => 'E',
            Level::Warn => 'W',
            Level::Info => 'I',
            Level::Debug => 'D',
            Level::Trace => 'T',
        };

        let log_line = format!("{} {} {}\n", timestamp, record.target(), record.args());

        let file_mutex = if record.level() == Level::Debug || record.level() == Level::Trace {
            &self.debug_file
        } else {
            &self.main_file
        };

        if let Ok(mut file) = file_mutex.lock() {
            let _ = file.write_all(log_line.as_bytes());
            let _ = file.flush();
        }

        eprint!("{} {} {}", timestamp, level_char, log_line);
    }

    fn flush(&self) {
        let _ = self.main_file.lock().map(|mut f| f.flush());
        let _ = self.debug_file.lock().map(|mut f| f.flush());
    }
}

pub fn current_session_dir() -> Option<PathBuf> {
    SESSION_DIR.lock().ok()?.clone()
}

/// Parses a level name from config, falling back to debug.
pub fn parse_level(s: &str) -> LevelFilter {
    match s.trim().to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Debug,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_session_number() {
        let dir = std::env::temp_dir().join(format!("ktc-log-test-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        assert_eq!(FileLogger::next_session_number(&dir), 1);

        fs::create_dir_all(dir.join("session-3")).unwrap();
        fs::create_dir_all(dir.join("session-7")).unwrap();
        fs::create_dir_all(dir.join("unrelated")).unwrap();
        assert_eq!(FileLogger::next_session_number(&dir), 8);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("warn"), LevelFilter::Warn);
        assert_eq!(parse_level(" INFO "), LevelFilter::Info);
        assert_eq!(parse_level("bogus"), LevelFilter::Debug);
    }
}
