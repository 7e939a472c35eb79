// src/logging.rs
//
// `tlog!` writes one timestamped line per message to stderr and, while file
// logging is on, to a log file in the reports directory. Each session gets
// its own file; older session files beyond MAX_LOG_FILES are removed.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Session log file. `None` while file logging is off.
static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Symlink to the current session's file (Unix only)
const LATEST_LOG_NAME: &str = "echoplant.log";
const LOG_SUFFIX: &str = "-echoplant.log";
/// Session files kept in the reports directory, current one included
const MAX_LOG_FILES: usize = 20;

fn timestamp() -> impl fmt::Display {
    chrono::Local::now().format("%H:%M:%S%.3f")
}

/// Sink behind `tlog!`. Never fails; a broken log file is ignored.
pub(crate) fn write_line(args: fmt::Arguments<'_>) {
    let line = format!("{} {}", timestamp(), args);
    eprintln!("{}", line);
    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(file) = guard.as_mut() {
            let _ = writeln!(file, "{}", line);
        }
    }
}

/// Start mirroring `tlog!` output to a new session file in `reports_dir`.
/// Returns the file's path.
pub fn init_file_logging(reports_dir: &Path) -> Result<PathBuf, String> {
    std::fs::create_dir_all(reports_dir)
        .map_err(|e| format!("Failed to create reports dir: {}", e))?;

    let file_name = format!("{}{}", chrono::Local::now().format("%Y%m%d-%H%M%S"), LOG_SUFFIX);
    let log_path = reports_dir.join(&file_name);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;

    #[cfg(unix)]
    {
        let link = reports_dir.join(LATEST_LOG_NAME);
        let _ = std::fs::remove_file(&link);
        if let Err(e) = std::os::unix::fs::symlink(&file_name, &link) {
            write_line(format_args!("[logging] Could not link {}: {}", LATEST_LOG_NAME, e));
        }
    }

    match prune_old_logs(reports_dir, MAX_LOG_FILES) {
        Ok(0) => {}
        Ok(n) => write_line(format_args!("[logging] Removed {} old log file(s)", n)),
        Err(e) => write_line(format_args!("[logging] {}", e)),
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }
    write_line(format_args!("[logging] File logging started: {}", log_path.display()));
    Ok(log_path)
}

/// Stop mirroring to the log file.
pub fn stop_file_logging() {
    let was_on = LOG_FILE
        .lock()
        .map(|mut guard| guard.take().is_some())
        .unwrap_or(false);
    if was_on {
        write_line(format_args!("[logging] File logging stopped"));
    }
}

/// Delete the oldest session files so at most `keep` remain. Names start
/// with the session time, so name order is age order.
fn prune_old_logs(dir: &Path, keep: usize) -> Result<usize, String> {
    let mut sessions: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| format!("Failed to list reports dir: {}", e))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(LOG_SUFFIX))
        })
        .collect();
    if sessions.len() <= keep {
        return Ok(0);
    }

    sessions.sort();
    let excess = sessions.len() - keep;
    let mut removed = 0;
    for path in sessions.into_iter().take(excess) {
        if std::fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

/// `eprintln!`-style logging with a `HH:MM:SS.mmm` local time prefix.
/// Lines also go to the session log file while file logging is on.
macro_rules! tlog {
    ($($arg:tt)*) => {
        $crate::logging::write_line(format_args!($($arg)*))
    };
}
