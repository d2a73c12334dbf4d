//! Size-bounded rotating file sink
//!
//! Size rotation, backup count and gzip compression are delegated to
//! `logroller`. This module adds what it does not cover: the active file name
//! comes from a strftime pattern (e.g. `logs/app-%Y-%m-%d.log`) evaluated in a
//! fixed UTC offset, a new roller is started whenever that name changes, and
//! files left behind by earlier names are pruned by count and age.
//!
//! `RotatingFileWriter` is not synchronized itself; it is driven by a single
//! writer thread (see [`super::logger::StructuredLogger`]).

use super::InitError;
use crate::config::LogConfig;
use chrono::format::{self, Item, Parsed, StrftimeItems};
use chrono::{DateTime, FixedOffset, Utc};
use logroller::{Compression, LogRoller, LogRollerBuilder, Rotation, RotationSize};
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Used when `max_size` is configured as 0
const DEFAULT_MAX_SIZE_MB: u64 = 100;

const COMPRESSED_SUFFIX: &str = ".gz";
const SECONDS_PER_DAY: u64 = 86_400;

/// How often retention runs while the active name stays the same
const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

/// Unit of the configured max file size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    K,
    M,
    G,
    T,
}

impl SizeUnit {
    /// Unknown units are treated as megabytes
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "K" | "KB" => SizeUnit::K,
            "G" | "GB" => SizeUnit::G,
            "T" | "TB" => SizeUnit::T,
            _ => SizeUnit::M,
        }
    }

    pub fn multiplier(self) -> u64 {
        match self {
            SizeUnit::K => 1 << 10,
            SizeUnit::M => 1 << 20,
            SizeUnit::G => 1 << 30,
            SizeUnit::T => 1 << 40,
        }
    }

    /// Normalize `size` in this unit to bytes
    pub fn to_bytes(self, size: u64) -> u64 {
        size.saturating_mul(self.multiplier())
    }

    /// The roller threshold for `size` in this unit
    pub fn rotation_size(self, size: u64) -> RotationSize {
        match self {
            SizeUnit::K => RotationSize::KB(size),
            SizeUnit::M => RotationSize::MB(size),
            SizeUnit::G => RotationSize::GB(size),
            SizeUnit::T => RotationSize::GB(size.saturating_mul(1024)),
        }
    }
}

/// When and how the active log file is replaced
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    pub filename_pattern: String,
    pub max_size: u64,
    pub size_unit: SizeUnit,
    /// 0 keeps every backup
    pub max_backups: usize,
    pub max_age: Option<Duration>,
    pub compress: bool,
    pub utc_offset: FixedOffset,
}

impl RotationPolicy {
    pub fn from_config(config: &LogConfig) -> Result<Self, InitError> {
        let utc_offset = config
            .utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or(InitError::InvalidUtcOffset(config.utc_offset_hours))?;

        let (max_size, size_unit) = if config.max_size == 0 {
            (DEFAULT_MAX_SIZE_MB, SizeUnit::M)
        } else {
            (config.max_size, SizeUnit::parse(&config.max_size_unit))
        };

        let policy = Self {
            filename_pattern: config.filename.clone(),
            max_size,
            size_unit,
            max_backups: config.max_backups,
            max_age: (config.max_age > 0)
                .then(|| Duration::from_secs(config.max_age.saturating_mul(SECONDS_PER_DAY))),
            compress: config.compress,
            utc_offset,
        };
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<(), InitError> {
        let pattern = self.filename_pattern.trim();
        if pattern.is_empty() {
            return Err(InitError::InvalidPattern {
                pattern: self.filename_pattern.clone(),
                reason: "log filename is empty".to_string(),
            });
        }
        if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
            return Err(InitError::InvalidPattern {
                pattern: self.filename_pattern.clone(),
                reason: "invalid time format specifier".to_string(),
            });
        }
        if self.file_path_at(self.now()).file_name().is_none() {
            return Err(InitError::InvalidPattern {
                pattern: self.filename_pattern.clone(),
                reason: "pattern does not name a file".to_string(),
            });
        }
        Ok(())
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.size_unit.to_bytes(self.max_size)
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.utc_offset)
    }

    /// Evaluate the filename pattern at `at`
    pub fn file_path_at(&self, at: DateTime<FixedOffset>) -> PathBuf {
        let mut rendered = String::new();
        if write!(rendered, "{}", at.format(&self.filename_pattern)).is_err() {
            rendered = self.filename_pattern.clone();
        }
        PathBuf::from(rendered)
    }

    fn is_dated(&self) -> bool {
        self.filename_pattern.contains('%')
    }

    /// Whether `file_name` is a file this policy produced
    ///
    /// That is an active name for some point in time, optionally followed by
    /// a numeric roller suffix (`.1`, `.2024-03-01`), optionally gzipped.
    /// Anything else in the directory belongs to someone else.
    pub fn owns(&self, file_name: &str) -> bool {
        let name = file_name.strip_suffix(COMPRESSED_SUFFIX).unwrap_or(file_name);
        if self.matches_pattern(name) {
            return true;
        }
        match name.rsplit_once('.') {
            Some((head, suffix)) => is_roller_suffix(suffix) && self.matches_pattern(head),
            None => false,
        }
    }

    fn matches_pattern(&self, name: &str) -> bool {
        let Some(file_pattern) = Path::new(&self.filename_pattern).file_name() else {
            return false;
        };
        let file_pattern = file_pattern.to_string_lossy();
        let mut parsed = Parsed::new();
        format::parse(&mut parsed, name, StrftimeItems::new(&file_pattern)).is_ok()
    }
}

fn is_roller_suffix(suffix: &str) -> bool {
    suffix.starts_with(|c: char| c.is_ascii_digit())
        && suffix
            .chars()
            .all(|c| c.is_ascii_digit() || c == '-' || c == '_')
}

#[derive(Debug)]
struct Backup {
    path: PathBuf,
    name: String,
    modified: SystemTime,
}

/// `io::Write` implementation enforcing a [`RotationPolicy`]
pub struct RotatingFileWriter {
    policy: RotationPolicy,
    path: PathBuf,
    roller: LogRoller,
    last_prune: Instant,
}

impl RotatingFileWriter {
    /// Create the parent directory if needed, start the roller and apply retention
    pub fn open(policy: RotationPolicy) -> Result<Self, InitError> {
        let path = policy.file_path_at(policy.now());
        let roller = build_roller(&policy, &path)?;

        let writer = Self {
            policy,
            path,
            roller,
            last_prune: Instant::now(),
        };
        writer.prune();
        Ok(writer)
    }

    pub fn current_path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Switch to a new roller when the pattern renders a different name
    fn follow_pattern(&mut self) -> io::Result<()> {
        if !self.policy.is_dated() {
            return Ok(());
        }
        let path = self.policy.file_path_at(self.policy.now());
        if path == self.path {
            return Ok(());
        }

        self.roller.flush()?;
        self.roller = build_roller(&self.policy, &path).map_err(io::Error::other)?;
        self.path = path;
        self.prune();
        self.last_prune = Instant::now();
        Ok(())
    }

    /// Files of this sink other than the active one, newest first
    fn list_backups(&self) -> io::Result<Vec<Backup>> {
        let dir = match non_empty_parent(&self.path) {
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from("."),
        };
        let active_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut backups = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == active_name || !self.policy.owns(&name) {
                continue;
            }
            backups.push(Backup {
                path: entry.path(),
                name,
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        backups.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(backups)
    }

    /// Delete backups beyond the count limit or older than the age limit
    ///
    /// Failures are reported on stderr; they must not stop logging.
    pub fn prune(&self) {
        if self.policy.max_backups == 0 && self.policy.max_age.is_none() {
            return;
        }
        let backups = match self.list_backups() {
            Ok(backups) => backups,
            Err(err) => {
                eprintln!("log rotation: failed to list backups: {}", err);
                return;
            }
        };

        let now = SystemTime::now();
        for (index, backup) in backups.iter().enumerate() {
            let over_count = self.policy.max_backups > 0 && index >= self.policy.max_backups;
            let expired = self.policy.max_age.is_some_and(|max_age| {
                now.duration_since(backup.modified)
                    .is_ok_and(|age| age > max_age)
            });
            if over_count || expired {
                if let Err(err) = fs::remove_file(&backup.path) {
                    eprintln!(
                        "log rotation: failed to remove {}: {}",
                        backup.path.display(),
                        err
                    );
                }
            }
        }
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.follow_pattern()?;
        if self.last_prune.elapsed() >= PRUNE_INTERVAL {
            self.prune();
            self.last_prune = Instant::now();
        }
        self.roller.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.roller.flush()
    }
}

impl std::fmt::Debug for RotatingFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingFileWriter")
            .field("policy", &self.policy)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn non_empty_parent(path: &Path) -> Option<&Path> {
    path.parent().filter(|parent| !parent.as_os_str().is_empty())
}

/// Size-based roller for the active file at `path`
fn build_roller(policy: &RotationPolicy, path: &Path) -> Result<LogRoller, InitError> {
    let parent = non_empty_parent(path).unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|source| InitError::CreateDir {
        path: parent.to_path_buf(),
        source,
    })?;

    let file_name = path.file_name().map(Path::new).ok_or_else(|| InitError::InvalidPattern {
        pattern: policy.filename_pattern.clone(),
        reason: "pattern does not name a file".to_string(),
    })?;

    let mut builder = LogRollerBuilder::new(parent, file_name).rotation(Rotation::SizeBased(
        policy.size_unit.rotation_size(policy.max_size),
    ));
    if policy.max_backups > 0 {
        builder = builder.max_keep_files(policy.max_backups as u64);
    }
    if policy.compress {
        builder = builder.compression(Compression::Gzip);
    }

    builder.build().map_err(|err| InitError::OpenFile {
        path: path.to_path_buf(),
        source: io::Error::other(err.to_string()),
    })
}
