use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::SinkError;
use crate::sink::LogSink;

const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";
const COMPRESS_SUFFIX: &str = ".gz";

/// Configuration for [`RotatingFileSink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkConfig {
    /// Active log file. Backups are written next to it.
    pub path: PathBuf,
    /// Rotate before a write would grow the active file past this size.
    pub max_size_bytes: u64,
    /// Backups kept after rotation, newest first. `0` keeps all.
    pub max_backups: usize,
    /// Backups older than this many days are removed. `0` disables the age limit.
    pub max_age_days: u64,
    /// Gzip backups right after rotation.
    pub compress_backups: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./app.log"),
            max_size_bytes: 5 * 1024 * 1024,
            max_backups: 3,
            max_age_days: 28,
            compress_backups: true,
        }
    }
}

/// A rotated-out log file, possibly present in both plain and gzip form
/// when an earlier compression was interrupted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backup {
    pub rotated_at: DateTime<Utc>,
    pub plain: Option<PathBuf>,
    pub compressed: Option<PathBuf>,
}

impl Backup {
    pub fn is_compressed(&self) -> bool {
        self.compressed.is_some() && self.plain.is_none()
    }

    fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.plain.iter().chain(self.compressed.iter())
    }
}

struct Active {
    file: Option<File>,
    size: u64,
}

/// Append-only file sink that rotates by size and prunes old backups.
///
/// Rotation happens lazily inside `write`: when the incoming payload would
/// push the active file past `max_size_bytes`, the file is renamed to
/// `<stem>-<UTC timestamp>.<ext>`, optionally gzipped, a fresh file is
/// opened at the configured path and only then is the payload appended.
/// Every write, rotation included, runs under one mutex.
pub struct RotatingFileSink {
    config: SinkConfig,
    state: Mutex<Active>,
}

impl RotatingFileSink {
    /// Open (or create) the active file, appending to what a previous
    /// process left behind.
    ///
    /// **Returns**
    /// - `Err(..)` if the directory cannot be created or the file cannot
    ///   be opened; callers treat this as a startup failure.
    pub fn open(config: SinkConfig) -> Result<Self, SinkError> {
        let sink = Self {
            config,
            state: Mutex::new(Active {
                file: None,
                size: 0,
            }),
        };
        let rotated = {
            let mut state = sink.lock();
            sink.open_existing_or_new(&mut state, 0)?
        };
        if rotated {
            sink.apply_retention(Utc::now())?;
        }
        Ok(sink)
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Current size of the active file as tracked by the sink.
    pub fn size(&self) -> u64 {
        self.lock().size
    }

    /// Force a rotation regardless of size.
    pub fn rotate(&self) -> Result<(), SinkError> {
        let mut state = self.lock();
        self.rotate_locked(&mut state)?;
        self.apply_retention(Utc::now())
    }

    /// Backups currently on disk, newest first.
    pub fn backups(&self) -> Result<Vec<Backup>, SinkError> {
        let dir = self.dir();
        let entries = fs::read_dir(&dir).map_err(|source| SinkError::Io {
            op: "list",
            path: dir.clone(),
            source,
        })?;

        let (prefix, ext) = self.name_parts();
        let gz_ext = format!("{}{}", ext, COMPRESS_SUFFIX);
        let mut by_time: BTreeMap<DateTime<Utc>, Backup> = BTreeMap::new();

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            let (stamp, compressed) = match rest.strip_suffix(&gz_ext) {
                Some(stamp) => (stamp, true),
                None => match rest.strip_suffix(&ext) {
                    Some(stamp) => (stamp, false),
                    None => continue,
                },
            };
            let Ok(naive) = NaiveDateTime::parse_from_str(stamp, BACKUP_TIME_FORMAT) else {
                continue;
            };
            let rotated_at = naive.and_utc();
            let backup = by_time.entry(rotated_at).or_insert(Backup {
                rotated_at,
                plain: None,
                compressed: None,
            });
            if compressed {
                backup.compressed = Some(entry.path());
            } else {
                backup.plain = Some(entry.path());
            }
        }

        Ok(by_time.into_values().rev().collect())
    }

    fn lock(&self) -> MutexGuard<'_, Active> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dir(&self) -> PathBuf {
        match self.config.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// `("<stem>-", ".<ext>")` for the configured file name.
    fn name_parts(&self) -> (String, String) {
        let stem = self
            .config
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = self
            .config
            .path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        (format!("{}-", stem), ext)
    }

    /// Backup name for a rotation at `now`, kept strictly newer than any
    /// existing backup so name order matches rotation order.
    fn backup_path(&self, now: DateTime<Utc>) -> Result<PathBuf, SinkError> {
        let (prefix, ext) = self.name_parts();
        let dir = self.dir();
        let mut at = now;
        if let Some(latest) = self.backups()?.first() {
            if at <= latest.rotated_at {
                at = latest.rotated_at + ChronoDuration::milliseconds(1);
            }
        }
        loop {
            let name = format!("{}{}{}", prefix, at.format(BACKUP_TIME_FORMAT), ext);
            let candidate = dir.join(&name);
            let gz = dir.join(format!("{}{}", name, COMPRESS_SUFFIX));
            if !candidate.exists() && !gz.exists() {
                return Ok(candidate);
            }
            at += ChronoDuration::milliseconds(1);
        }
    }

    /// Returns whether opening required a rotation.
    fn open_existing_or_new(&self, state: &mut Active, incoming: u64) -> Result<bool, SinkError> {
        let path = &self.config.path;
        match fs::metadata(path) {
            Ok(meta) if meta.len() + incoming <= self.config.max_size_bytes => {
                let file = OpenOptions::new()
                    .append(true)
                    .open(path)
                    .map_err(|source| SinkError::Io {
                        op: "open",
                        path: path.clone(),
                        source,
                    })?;
                state.file = Some(file);
                state.size = meta.len();
                Ok(false)
            }
            Ok(_) => self.rotate_locked(state).map(|_| true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.open_new(state).map(|_| false),
            Err(source) => Err(SinkError::Io {
                op: "stat",
                path: path.clone(),
                source,
            }),
        }
    }

    /// Move the current file aside (if any) and start an empty one.
    fn open_new(&self, state: &mut Active) -> Result<Option<PathBuf>, SinkError> {
        let path = &self.config.path;
        let dir = self.dir();
        fs::create_dir_all(&dir).map_err(|source| SinkError::Io {
            op: "create directory",
            path: dir.clone(),
            source,
        })?;

        state.file = None;
        let mut backup = None;
        if path.exists() {
            let target = self.backup_path(Utc::now())?;
            fs::rename(path, &target).map_err(|source| SinkError::Rotate {
                path: path.clone(),
                source,
            })?;
            backup = Some(target);
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|source| SinkError::Rotate {
                path: path.clone(),
                source,
            })?;
        state.file = Some(file);
        state.size = 0;
        Ok(backup)
    }

    fn rotate_locked(&self, state: &mut Active) -> Result<(), SinkError> {
        if let Some(file) = state.file.take() {
            // Flush what the old handle holds before it is renamed.
            file.sync_all().map_err(|source| SinkError::Rotate {
                path: self.config.path.clone(),
                source,
            })?;
        }
        self.open_new(state).map(|_| ())
    }

    /// Remove backups beyond the count and age limits, then compress
    /// the survivors that are still plain.
    fn apply_retention(&self, now: DateTime<Utc>) -> Result<(), SinkError> {
        let backups = self.backups()?;
        let cutoff = age_cutoff(now, self.config.max_age_days);

        let mut first_err = None;
        for (idx, backup) in backups.iter().enumerate() {
            let over_count = self.config.max_backups > 0 && idx >= self.config.max_backups;
            let too_old = cutoff.is_some_and(|cutoff| backup.rotated_at < cutoff);

            if over_count || too_old {
                for path in backup.paths() {
                    if let Err(source) = fs::remove_file(path) {
                        first_err.get_or_insert(SinkError::Io {
                            op: "remove backup",
                            path: path.clone(),
                            source,
                        });
                    }
                }
                continue;
            }

            if self.config.compress_backups {
                if let Some(plain) = &backup.plain {
                    if let Err(e) = compress_file(plain) {
                        first_err.get_or_insert(e);
                    }
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn write_locked(&self, state: &mut Active, buf: &[u8]) -> Result<(), SinkError> {
        let len = buf.len() as u64;
        if len > self.config.max_size_bytes {
            return Err(SinkError::PayloadTooLarge {
                len: buf.len(),
                max: self.config.max_size_bytes,
            });
        }

        let rotated = if state.file.is_none() {
            self.open_existing_or_new(state, len)?
        } else if state.size + len > self.config.max_size_bytes {
            self.rotate_locked(state)?;
            true
        } else {
            false
        };

        let path = &self.config.path;
        let file = state.file.as_mut().ok_or_else(|| SinkError::Io {
            op: "write",
            path: path.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "log file is not open"),
        })?;
        file.write_all(buf).map_err(|source| SinkError::Io {
            op: "write",
            path: path.clone(),
            source,
        })?;
        state.size += len;

        // The payload is already in the new file; a retention failure is
        // still reported so the degradation is visible.
        if rotated {
            self.apply_retention(Utc::now())?;
        }
        Ok(())
    }
}

impl LogSink for RotatingFileSink {
    fn write(&self, buf: &[u8]) -> Result<(), SinkError> {
        let mut state = self.lock();
        self.write_locked(&mut state, buf)
    }

    fn flush(&self) -> Result<(), SinkError> {
        let state = self.lock();
        match &state.file {
            Some(file) => file.sync_all().map_err(|source| SinkError::Io {
                op: "sync",
                path: self.config.path.clone(),
                source,
            }),
            None => Ok(()),
        }
    }
}

/// Oldest rotation time a backup may have, or `None` when there is no
/// age limit. A limit too large to represent behaves like no limit.
fn age_cutoff(now: DateTime<Utc>, max_age_days: u64) -> Option<DateTime<Utc>> {
    if max_age_days == 0 {
        return None;
    }
    let days = i64::try_from(max_age_days).ok()?;
    now.checked_sub_signed(ChronoDuration::try_days(days)?)
}

/// Gzip `plain` into `plain.gz` and remove the original once the
/// compressed copy is durable.
fn compress_file(plain: &Path) -> Result<(), SinkError> {
    let mut target = plain.as_os_str().to_owned();
    target.push(COMPRESS_SUFFIX);
    let target = PathBuf::from(target);

    let result = (|| -> io::Result<()> {
        let mut input = File::open(plain)?;
        let output = File::create(&target)?;
        let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
        io::copy(&mut input, &mut encoder)?;
        let writer = encoder.finish()?;
        let output = writer.into_inner().map_err(|e| e.into_error())?;
        output.sync_all()?;
        fs::remove_file(plain)
    })();

    result.map_err(|source| {
        let _ = fs::remove_file(&target);
        SinkError::Compress {
            path: plain.to_path_buf(),
            source,
        }
    })
}
