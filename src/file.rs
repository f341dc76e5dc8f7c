use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::clock::{Clock, SystemClock};
use crate::error::{SetupError, SinkError};
use crate::rollover::RolloverSchedule;
use crate::sink::LogSink;

/// File sink that switches to a fresh file at every rollover boundary.
///
/// The live file always sits at `path`. When a boundary passes, the live
/// file is renamed to `<path>.<suffix>` (suffix = start of the period it
/// covered), a new file is opened at `path`, and the next boundary is
/// computed from the [`RolloverSchedule`]. The period start is tracked
/// rather than derived from the deadline, since calendar days are not all
/// 24 hours long.
///
/// All of this state is owned by whoever owns the sink, which for a
/// configured destination is the emitter's writer thread.
pub struct TimedRotatingFile<C: Clock = SystemClock> {
    path: PathBuf,
    file: Option<File>,
    schedule: RolloverSchedule,
    rollover_at: DateTime<Utc>,
    period_start: DateTime<Utc>,
    backup_count: usize,
    clock: C,
    line: Vec<u8>,
}

impl TimedRotatingFile<SystemClock> {
    pub fn open(
        path: impl Into<PathBuf>,
        schedule: RolloverSchedule,
        backup_count: usize,
    ) -> Result<Self, SetupError> {
        Self::with_clock(path, schedule, backup_count, SystemClock)
    }
}

impl<C: Clock> TimedRotatingFile<C> {
    /// Open (append) the live file. If it already exists, the first
    /// boundary is computed from its modification time, so a file left over
    /// from an earlier period is rotated on the first write.
    pub fn with_clock(
        path: impl Into<PathBuf>,
        schedule: RolloverSchedule,
        backup_count: usize,
        clock: C,
    ) -> Result<Self, SetupError> {
        let path = path.into();
        let base_time = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| clock.now());
        let file = open_append(&path).map_err(|source| SetupError::OpenFile {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            rollover_at: schedule.next_rollover(base_time),
            period_start: schedule.period_start(base_time),
            path,
            file: Some(file),
            schedule,
            backup_count,
            clock,
            line: Vec::with_capacity(256),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rollover_at(&self) -> DateTime<Utc> {
        self.rollover_at
    }

    /// Start of the period the live file covers; its suffix once rotated.
    pub fn period_start(&self) -> DateTime<Utc> {
        self.period_start
    }

    fn roll_over(&mut self, now: DateTime<Utc>) -> Result<(), SinkError> {
        // Close before renaming.
        self.file = None;

        let target = rotated_path(&self.path, &self.schedule.suffix(self.period_start));
        if self.path.exists() {
            if target.exists() {
                if let Err(e) = fs::remove_file(&target) {
                    tracing::warn!(path = %target.display(), error = %e, "failed to replace rotated log file");
                }
            }
            if let Err(e) = fs::rename(&self.path, &target) {
                tracing::warn!(
                    from = %self.path.display(),
                    to = %target.display(),
                    error = %e,
                    "failed to rename log file on rollover, continuing in place"
                );
            }
        }

        if self.backup_count > 0 {
            for expired in self.expired_backups() {
                if let Err(e) = fs::remove_file(&expired) {
                    tracing::warn!(path = %expired.display(), error = %e, "failed to remove old log file");
                }
            }
        }

        let file = open_append(&self.path).map_err(|source| SinkError::Rollover {
            path: self.path.clone(),
            source,
        })?;
        self.file = Some(file);
        self.period_start = self.schedule.period_start(now);
        self.rollover_at = self.schedule.next_rollover(now);
        tracing::debug!(path = %self.path.display(), next = %self.rollover_at, "log file rolled over");
        Ok(())
    }

    /// Rotated siblings beyond `backup_count`, oldest first.
    fn expired_backups(&self) -> Vec<PathBuf> {
        let Some(base) = self.path.file_name().and_then(|n| n.to_str()) else {
            return Vec::new();
        };
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let prefix = format!("{base}.");

        let mut rotated: Vec<(String, PathBuf)> = fs::read_dir(dir)
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let suffix = name.strip_prefix(&prefix)?;
                self.schedule
                    .is_suffix(suffix)
                    .then(|| (suffix.to_string(), entry.path()))
            })
            .collect();

        if rotated.len() <= self.backup_count {
            return Vec::new();
        }
        // Suffixes are zero-padded timestamps, so lexical order is chronological.
        rotated.sort();
        let excess = rotated.len() - self.backup_count;
        rotated.into_iter().take(excess).map(|(_, p)| p).collect()
    }
}

impl<C: Clock> LogSink for TimedRotatingFile<C> {
    fn write(&mut self, record: &[u8]) -> Result<(), SinkError> {
        let now = self.clock.now();
        if now >= self.rollover_at {
            self.roll_over(now)?;
        }

        let file = self.file.as_mut().ok_or_else(|| SinkError::Rollover {
            path: self.path.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "log file is not open"),
        })?;

        self.line.clear();
        self.line.extend_from_slice(record);
        self.line.push(b'\n');
        file.write_all(&self.line)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn rotated_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
