//! Append-only detection log.
//!
//! On-disk format (version 1): a CSV-like file with header
//! `timestamp,label,alert_triggered`, one row per detection event,
//! timestamps as `YYYY-MM-DD HH:MM:SS`, alert flag serialized `Yes`/`No`.
//! Rows are only ever appended; nothing is updated or deleted.
//!
//! Every append goes through a single buffered `write_all` (header
//! included on the very first write), so concurrent readers of the file
//! see either the pre- or post-append state, never a torn row. The event
//! list is also kept in memory: a failed disk write keeps the event and
//! the row is retried on the next append.

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use sentinel_core::UNKNOWN_LABEL;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const HEADER: &str = "timestamp,label,alert_triggered";

#[derive(Error, Debug)]
pub enum EventLogError {
    #[error("log write failed: {0}")]
    Write(#[from] std::io::Error),
}

/// One sighting, created exactly once per new (identity, descriptor)
/// pair per monitoring session. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEvent {
    pub timestamp: NaiveDateTime,
    pub label: String,
    pub alert_triggered: bool,
}

impl DetectionEvent {
    /// Event for a sighting happening now. The alert flag is derived from
    /// the label: unknown faces are intrusions, by definition.
    pub fn record(label: &str) -> Self {
        Self {
            timestamp: Local::now().naive_local(),
            label: label.to_string(),
            alert_triggered: label == UNKNOWN_LABEL,
        }
    }

    fn to_row(&self) -> String {
        format!(
            "{},{},{}\n",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.label,
            if self.alert_triggered { "Yes" } else { "No" }
        )
    }

    fn parse_row(line: &str) -> Option<Self> {
        let mut parts = line.splitn(3, ',');
        let ts = parts.next()?;
        let label = parts.next()?;
        let alert = parts.next()?;

        let timestamp = NaiveDateTime::parse_from_str(ts.trim(), TIMESTAMP_FORMAT).ok()?;
        let alert_triggered = match alert.trim() {
            "Yes" => true,
            "No" => false,
            _ => return None,
        };
        Some(Self {
            timestamp,
            label: label.trim().to_string(),
            alert_triggered,
        })
    }
}

/// Today's aggregate as exposed to dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayStats {
    pub total: usize,
    pub intrusions: usize,
}

/// The detection log: in-memory event list backed by the append-only file.
///
/// The pipeline is the only writer; callers wanting concurrent reads wrap
/// the log in a shared lock.
pub struct EventLog {
    path: PathBuf,
    events: Vec<DetectionEvent>,
    /// Rows appended in memory whose disk write failed; flushed with the
    /// next append so a transient write error loses nothing.
    pending_rows: Vec<String>,
    header_present: bool,
}

impl EventLog {
    /// Open (or start) the log at `path`, reading back any existing rows.
    ///
    /// Corrupt rows are skipped with a warning; they never poison the
    /// rest of the log.
    pub fn open(path: &Path) -> Result<Self, EventLogError> {
        let mut events = Vec::new();
        let mut header_present = false;

        match std::fs::read_to_string(path) {
            Ok(contents) => {
                header_present = !contents.is_empty();
                for (i, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() || line.trim() == HEADER {
                        continue;
                    }
                    match DetectionEvent::parse_row(line) {
                        Some(event) => events.push(event),
                        None => {
                            tracing::warn!(path = %path.display(), line = i + 1, "skipping corrupt detection row");
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(path = %path.display(), events = events.len(), "detection log opened");
        Ok(Self {
            path: path.to_path_buf(),
            events,
            pending_rows: Vec::new(),
            header_present,
        })
    }

    /// Append one event.
    ///
    /// The in-memory list always grows; the returned error only signals
    /// that the disk write failed and will be retried later.
    pub fn append(&mut self, event: DetectionEvent) -> Result<(), EventLogError> {
        let row = event.to_row();
        self.events.push(event);
        self.pending_rows.push(row);
        self.flush_pending()
    }

    fn flush_pending(&mut self) -> Result<(), EventLogError> {
        if self.pending_rows.is_empty() {
            return Ok(());
        }

        // Header plus all outstanding rows in one write: either the file
        // gains complete rows or it stays as it was.
        let mut buf = String::new();
        if !self.header_present {
            buf.push_str(HEADER);
            buf.push('\n');
        }
        for row in &self.pending_rows {
            buf.push_str(row);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(buf.as_bytes())?;
        file.flush()?;

        self.header_present = true;
        self.pending_rows.clear();
        Ok(())
    }

    /// Count of events on the local calendar day, plus how many of them
    /// were intrusions.
    pub fn query_today(&self) -> DayStats {
        let today = Local::now().date_naive();
        let total_today = self
            .events
            .iter()
            .filter(|e| e.timestamp.date() == today);

        let mut total = 0;
        let mut intrusions = 0;
        for event in total_today {
            total += 1;
            if event.label == UNKNOWN_LABEL {
                intrusions += 1;
            }
        }
        DayStats { total, intrusions }
    }

    /// Timestamp of the most recent alert, if any alert was ever logged.
    pub fn last_alert_time(&self) -> Option<NaiveDateTime> {
        self.events
            .iter()
            .rev()
            .find(|e| e.alert_triggered)
            .map(|e| e.timestamp)
    }

    /// The last `n` events in append order.
    pub fn tail(&self, n: usize) -> Vec<DetectionEvent> {
        let start = self.events.len().saturating_sub(n);
        self.events[start..].to_vec()
    }

    pub fn all(&self) -> Vec<DetectionEvent> {
        self.events.clone()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Timelike};

    fn event_at(timestamp: NaiveDateTime, label: &str) -> DetectionEvent {
        DetectionEvent {
            timestamp,
            label: label.to_string(),
            alert_triggered: label == UNKNOWN_LABEL,
        }
    }

    fn log_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("detections.csv")
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(&dir);

        let mut log = EventLog::open(&path).unwrap();
        log.append(DetectionEvent::record("alice")).unwrap();
        log.append(DetectionEvent::record(UNKNOWN_LABEL)).unwrap();

        let reopened = EventLog::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.all()[0].label, "alice");
        assert!(!reopened.all()[0].alert_triggered);
        assert!(reopened.all()[1].alert_triggered);
    }

    #[test]
    fn test_header_written_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(&dir);

        let mut log = EventLog::open(&path).unwrap();
        log.append(DetectionEvent::record("alice")).unwrap();
        drop(log);
        let mut log = EventLog::open(&path).unwrap();
        log.append(DetectionEvent::record("bob")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let headers = contents.lines().filter(|l| *l == HEADER).count();
        assert_eq!(headers, 1);
        assert!(contents.starts_with(HEADER));
    }

    #[test]
    fn test_row_serialization_format() {
        let ts = NaiveDateTime::parse_from_str("2026-08-30 09:15:00", TIMESTAMP_FORMAT).unwrap();
        let row = event_at(ts, UNKNOWN_LABEL).to_row();
        assert_eq!(row, "2026-08-30 09:15:00,Unknown,Yes\n");
        let row = event_at(ts, "alice").to_row();
        assert_eq!(row, "2026-08-30 09:15:00,alice,No\n");
    }

    #[test]
    fn test_tail_returns_last_n_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = EventLog::open(&log_path(&dir)).unwrap();
        for name in ["a", "b", "c", "d"] {
            log.append(DetectionEvent::record(name)).unwrap();
        }

        let tail = log.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].label, "c");
        assert_eq!(tail[1].label, "d");
        assert_eq!(log.tail(100).len(), 4);
    }

    #[test]
    fn test_all_is_prefix_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = EventLog::open(&log_path(&dir)).unwrap();
        log.append(DetectionEvent::record("a")).unwrap();
        let before = log.all();
        log.append(DetectionEvent::record("b")).unwrap();
        let after = log.all();
        assert_eq!(&after[..before.len()], &before[..]);
    }

    #[test]
    fn test_query_today_ignores_yesterday() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = EventLog::open(&log_path(&dir)).unwrap();

        let now = Local::now().naive_local().with_nanosecond(0).unwrap();
        let yesterday = now - Duration::days(1);
        log.append(event_at(yesterday, "alice")).unwrap();
        log.append(event_at(yesterday, UNKNOWN_LABEL)).unwrap();
        log.append(event_at(now, "alice")).unwrap();
        log.append(event_at(now, "bob")).unwrap();
        log.append(event_at(now, UNKNOWN_LABEL)).unwrap();

        let stats = log.query_today();
        assert_eq!(
            stats,
            DayStats {
                total: 3,
                intrusions: 1
            }
        );
    }

    #[test]
    fn test_last_alert_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = EventLog::open(&log_path(&dir)).unwrap();
        assert!(log.last_alert_time().is_none());

        let t1 = NaiveDateTime::parse_from_str("2026-08-29 08:00:00", TIMESTAMP_FORMAT).unwrap();
        let t2 = NaiveDateTime::parse_from_str("2026-08-30 09:00:00", TIMESTAMP_FORMAT).unwrap();
        log.append(event_at(t1, UNKNOWN_LABEL)).unwrap();
        log.append(event_at(t2, "alice")).unwrap();
        log.append(event_at(t2, UNKNOWN_LABEL)).unwrap();

        assert_eq!(log.last_alert_time(), Some(t2));
    }

    #[test]
    fn test_corrupt_rows_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(&dir);
        std::fs::write(
            &path,
            "timestamp,label,alert_triggered\n\
             2026-08-30 09:15:00,alice,No\n\
             not a row at all\n\
             2026-08-30 09:16:00,bob,Maybe\n\
             2026-08-30 09:17:00,Unknown,Yes\n\
             2026-08-30 09:1",
        )
        .unwrap();

        let log = EventLog::open(&path).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.all()[0].label, "alice");
        assert_eq!(log.all()[1].label, "Unknown");
    }

    #[test]
    fn test_missing_file_is_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(&log_path(&dir)).unwrap();
        assert!(log.is_empty());
        assert_eq!(log.query_today(), DayStats { total: 0, intrusions: 0 });
    }

    #[test]
    fn test_failed_write_is_retried_on_next_append() {
        let dir = tempfile::tempdir().unwrap();
        // A log pointed at a directory path cannot write its file.
        let blocked = dir.path().join("blocked");
        std::fs::create_dir(&blocked).unwrap();

        let mut log = EventLog::open(&log_path(&dir)).unwrap();
        log.path = blocked.clone();
        assert!(log.append(DetectionEvent::record("alice")).is_err());
        // Event is retained in memory despite the failed write.
        assert_eq!(log.len(), 1);

        // Point back at a writable path: the next append flushes both rows.
        log.path = log_path(&dir);
        log.append(DetectionEvent::record("bob")).unwrap();

        let reopened = EventLog::open(&log.path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.all()[0].label, "alice");
    }
}
