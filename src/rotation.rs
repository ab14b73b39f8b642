//! Size and time based rollover for a single log file.
//!
//! Backups are numbered: `<file>.1` is the most recent, `<file>.N` the
//! oldest kept. Rollover is checked after every write, never before, so a
//! file may exceed its size limit by at most one record until the check
//! runs. With `max_backups == 0` a file never rolls over and keeps
//! growing.

use crate::error::Error;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Unit for time based rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RotationWhen {
    Seconds,
    Minutes,
    Hours,
    Days,
    /// Next UTC midnight.
    Midnight,
}

impl FromStr for RotationWhen {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S" => Ok(RotationWhen::Seconds),
            "M" => Ok(RotationWhen::Minutes),
            "H" => Ok(RotationWhen::Hours),
            "D" => Ok(RotationWhen::Days),
            "MIDNIGHT" => Ok(RotationWhen::Midnight),
            other => Err(Error::invalid(
                "rotation_when",
                format!("'{}' is not one of S, M, H, D, midnight", other),
            )),
        }
    }
}

impl TryFrom<String> for RotationWhen {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RotationWhen> for String {
    fn from(when: RotationWhen) -> Self {
        match when {
            RotationWhen::Seconds => "S",
            RotationWhen::Minutes => "M",
            RotationWhen::Hours => "H",
            RotationWhen::Days => "D",
            RotationWhen::Midnight => "midnight",
        }
        .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationPolicy {
    /// Roll once the file grows past `max_bytes`.
    Size { max_bytes: u64, max_backups: u32 },
    /// Roll every `interval` units of `when`, regardless of size.
    Time {
        when: RotationWhen,
        interval: u32,
        max_backups: u32,
    },
}

impl RotationPolicy {
    pub fn max_backups(&self) -> u32 {
        match self {
            RotationPolicy::Size { max_backups, .. } | RotationPolicy::Time { max_backups, .. } => *max_backups,
        }
    }

    fn max_bytes(&self) -> Option<u64> {
        match self {
            RotationPolicy::Size { max_bytes, .. } => Some(*max_bytes),
            RotationPolicy::Time { .. } => None,
        }
    }

    /// Next instant at which a time policy rolls, `None` for size policies.
    pub fn next_rollover(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let RotationPolicy::Time { when, interval, .. } = self else {
            return None;
        };
        let interval = i64::from((*interval).max(1));
        let next = match when {
            RotationWhen::Seconds => now + ChronoDuration::seconds(interval),
            RotationWhen::Minutes => now + ChronoDuration::minutes(interval),
            RotationWhen::Hours => now + ChronoDuration::hours(interval),
            RotationWhen::Days => now + ChronoDuration::days(interval),
            RotationWhen::Midnight => {
                let today = now.date_naive().and_hms_opt(0, 0, 0)?.and_utc();
                today + ChronoDuration::days(interval)
            }
        };
        Some(next)
    }
}

/// Book-keeping for the active file, owned by the sink worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationState {
    pub current_path: PathBuf,
    pub current_size_bytes: u64,
    /// Number of numbered backups currently on disk, at most `max_backups`.
    pub backup_index: u32,
    pub max_bytes: Option<u64>,
    pub max_backups: u32,
}

/// What happened after a record was appended.
#[derive(Debug)]
pub enum Rollover {
    NotDue,
    Rotated,
    /// The record was written but rolling over failed. The size and time
    /// triggers restart, so the next attempt comes one full threshold later.
    Failed(io::Error),
}

impl Rollover {
    pub fn rotated(&self) -> bool {
        matches!(self, Rollover::Rotated)
    }
}

/// An append-only file that rolls itself over according to a policy.
pub struct RollingFile {
    file: Option<File>,
    policy: RotationPolicy,
    state: RotationState,
    next_rollover: Option<DateTime<Utc>>,
}

impl RollingFile {
    /// Open (or create) `path` for appending.
    pub fn open(path: &Path, policy: RotationPolicy) -> io::Result<Self> {
        Self::open_at(path, policy, Utc::now())
    }

    /// Testable constructor that allows injecting the current time.
    pub(crate) fn open_at(path: &Path, policy: RotationPolicy, now: DateTime<Utc>) -> io::Result<Self> {
        let file = open_append(path)?;
        let current_size_bytes = file.metadata()?.len();
        let max_backups = policy.max_backups();
        let backup_index = (1..=max_backups)
            .take_while(|n| backup_path(path, *n).exists())
            .count() as u32;

        Ok(RollingFile {
            file: Some(file),
            next_rollover: policy.next_rollover(now),
            state: RotationState {
                current_path: path.to_path_buf(),
                current_size_bytes,
                backup_index,
                max_bytes: policy.max_bytes(),
                max_backups,
            },
            policy,
        })
    }

    pub fn state(&self) -> &RotationState {
        &self.state
    }

    pub fn backup_path(&self, n: u32) -> PathBuf {
        backup_path(&self.state.current_path, n)
    }

    /// Append one record and roll over if the policy says so.
    ///
    /// **Errors**
    /// - Only when the record itself could not be written. A failed
    ///   rollover after a successful write is [`Rollover::Failed`].
    pub fn write_record(&mut self, buf: &[u8]) -> io::Result<Rollover> {
        self.write_at(buf, Utc::now())
    }

    /// Testable write method that allows injecting the current time.
    pub(crate) fn write_at(&mut self, buf: &[u8], now: DateTime<Utc>) -> io::Result<Rollover> {
        let file = match self.file.take() {
            Some(file) => file,
            None => open_append(&self.state.current_path)?,
        };
        let file = self.file.insert(file);
        file.write_all(buf)?;
        self.state.current_size_bytes += buf.len() as u64;

        if !self.should_rotate(now) {
            return Ok(Rollover::NotDue);
        }
        match self.rotate(now) {
            Ok(()) => Ok(Rollover::Rotated),
            Err(err) => {
                self.state.current_size_bytes = 0;
                self.next_rollover = self.policy.next_rollover(now);
                Ok(Rollover::Failed(err))
            }
        }
    }

    fn should_rotate(&self, now: DateTime<Utc>) -> bool {
        if self.state.max_backups == 0 {
            return false;
        }
        match (&self.policy, self.next_rollover) {
            (RotationPolicy::Size { max_bytes, .. }, _) => self.state.current_size_bytes > *max_bytes,
            (RotationPolicy::Time { .. }, Some(next)) => now >= next,
            (RotationPolicy::Time { .. }, None) => false,
        }
    }

    fn rotate(&mut self, now: DateTime<Utc>) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }

        let path = self.state.current_path.clone();
        let max_backups = self.state.max_backups;

        let oldest = backup_path(&path, max_backups);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..max_backups).rev() {
            let from = backup_path(&path, n);
            if from.exists() {
                fs::rename(&from, backup_path(&path, n + 1))?;
            }
        }
        if path.exists() {
            fs::rename(&path, backup_path(&path, 1))?;
        }
        self.file = Some(open_append(&path)?);
        self.state.backup_index = (self.state.backup_index + 1).min(max_backups);

        self.state.current_size_bytes = 0;
        self.next_rollover = self.policy.next_rollover(now);
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// `<path>.<n>`
pub fn backup_path(path: &Path, n: u32) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}", n));
    PathBuf::from(name)
}
