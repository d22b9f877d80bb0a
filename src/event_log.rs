//! Human-readable audit trail of watchdog events.
//!
//! Events are mirrored to the `log` facade and appended to a per-day file
//! (`<dir>/YYYY-MM-DD.log`) by a background writer thread. Callers never
//! wait on disk I/O and never see a write error.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;

use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

/// Pending lines before new events are dropped.
const QUEUE_BOUND: usize = 256;

/// Fire-and-forget sink for audit events.
pub trait EventLog: Send + Sync {
    fn log(&self, event: &str);
}

struct Entry {
    at: DateTime<Local>,
    message: String,
}

/// Date-rotated file log written from a dedicated thread.
pub struct DailyFileLog {
    tx: Mutex<Option<Sender<Entry>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl DailyFileLog {
    pub fn start(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        let (tx, rx) = bounded::<Entry>(QUEUE_BOUND);
        let writer = std::thread::Builder::new()
            .name("event-log".into())
            .spawn(move || write_loop(&dir, rx))?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Write out everything queued so far and stop the writer.
    ///
    /// Later events still reach the `log` facade but not the file. Safe to
    /// call while other owners hold the log.
    pub fn close(&self) {
        // Closing the channel lets the writer drain and exit.
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = writer
            && handle.join().is_err()
        {
            log::warn!("event log writer panicked");
        }
    }

    /// Path of the file an entry stamped `at` lands in.
    pub fn file_for(dir: &Path, at: &DateTime<Local>) -> PathBuf {
        dir.join(format!("{}.log", at.format("%Y-%m-%d")))
    }
}

impl EventLog for DailyFileLog {
    fn log(&self, event: &str) {
        log::info!("{event}");
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = tx.as_ref() else { return };
        let entry = Entry {
            at: Local::now(),
            message: event.to_string(),
        };
        match tx.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::debug!("event log queue full, dropping entry"),
            Err(TrySendError::Disconnected(_)) => log::debug!("event log writer is gone"),
        }
    }
}

impl Drop for DailyFileLog {
    fn drop(&mut self) {
        self.close();
    }
}

fn write_loop(dir: &Path, rx: Receiver<Entry>) {
    for entry in rx {
        if let Err(e) = append(dir, &entry) {
            log::warn!("Failed to write event log in {}: {e}", dir.display());
        }
    }
}

fn append(dir: &Path, entry: &Entry) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(DailyFileLog::file_for(dir, &entry.at))?;
    writeln!(file, "[{}] {}", entry.at.format("%H:%M:%S"), entry.message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_land_in_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("log");
        {
            let log = DailyFileLog::start(&log_dir).unwrap();
            log.log("service started");
            log.log("connection lost: 10.0.0.1");
        }

        let file = DailyFileLog::file_for(&log_dir, &Local::now());
        let text = fs::read_to_string(file).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] service started"));
        assert!(lines[1].ends_with("connection lost: 10.0.0.1"));
    }

    #[test]
    fn close_flushes_while_other_owners_remain() {
        let dir = tempfile::tempdir().unwrap();
        let log = std::sync::Arc::new(DailyFileLog::start(dir.path()).unwrap());
        let held_elsewhere: std::sync::Arc<dyn EventLog> = log.clone();

        held_elsewhere.log("action completed");
        log.log("linkwatchd exiting");
        log.close();

        let file = DailyFileLog::file_for(dir.path(), &Local::now());
        let text = fs::read_to_string(&file).unwrap();
        assert!(text.lines().last().unwrap().ends_with("] linkwatchd exiting"));

        held_elsewhere.log("after close");
        log.close();
        assert_eq!(fs::read_to_string(&file).unwrap(), text);
    }
}
