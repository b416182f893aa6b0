use {
    chrono::{FixedOffset, Local, Utc},
    std::{path::PathBuf, time::Duration},
};

use crate::{
    error::{Error, Result},
    pattern::ArchivePattern,
};

/// Size thresholds for rotating the active file, in various units.
///
/// When the active file would exceed the configured size, it is rotated and a
/// fresh file is opened in its place. The value can be expressed in bytes,
/// kilobytes, megabytes, gigabytes, or terabytes.
#[derive(Debug, Clone)]
pub enum RotationSize {
    /// Raw byte count
    Bytes(u64),
    /// Kilobytes (1 KB = 1024 bytes)
    KB(u64),
    /// Megabytes (1 MB = 1024 KB)
    MB(u64),
    /// Gigabytes (1 GB = 1024 MB)
    GB(u64),
    /// Terabytes (1 TB = 1024 GB)
    TB(u64),
}

impl RotationSize {
    /// The threshold in bytes.
    pub fn bytes(&self) -> u64 {
        match self {
            RotationSize::Bytes(b) => *b,
            RotationSize::KB(kb) => kb * 1024,
            RotationSize::MB(mb) => mb * 1024 * 1024,
            RotationSize::GB(gb) => gb * 1024 * 1024 * 1024,
            RotationSize::TB(tb) => tb * 1024 * 1024 * 1024 * 1024,
        }
    }
}

/// The time zone used for calendar-boundary computation and archive naming.
///
/// This affects when time-based rotation occurs and how the date placeholder
/// in the archive pattern is rendered, so that logs align consistently with a
/// chosen regional or user-defined time standard regardless of where the
/// process runs.
#[derive(Debug, Clone)]
pub enum TimeZone {
    /// Use UTC. The default; best for distributed deployments.
    UTC,
    /// Use the system's local time zone, captured at construction.
    Local,
    /// Use a fixed offset (e.g. UTC+8).
    Fix(FixedOffset),
}

impl TimeZone {
    pub(crate) fn fixed_offset(&self) -> FixedOffset {
        match self {
            TimeZone::UTC => Utc::now().fixed_offset().offset().to_owned(),
            TimeZone::Local => Local::now().offset().to_owned(),
            TimeZone::Fix(offset) => *offset,
        }
    }
}

/// Immutable engine configuration, fixed for the lifetime of the engine.
/// Reconfiguration requires constructing a new engine.
#[derive(Debug, Clone)]
pub(crate) struct RotationConfig {
    /// Path of the currently-active log file.
    pub active_path: PathBuf,
    /// Whether rotated files are archived. When false, rotation acts as a
    /// truncation: the sealed file is deleted once a fresh one is open.
    pub archive: bool,
    /// Archive naming template; present whenever `archive` is true.
    pub pattern: Option<ArchivePattern>,
    /// Number of archives to keep; oldest beyond this are pruned.
    pub max_archive_count: usize,
    /// Size threshold in bytes; unlimited when absent.
    pub max_active_size: Option<u64>,
    pub time_zone: FixedOffset,
    /// Unix file mode applied to created files; ignored elsewhere.
    pub file_mode: Option<u32>,
    /// When set, a background ticker evaluates the time trigger at this
    /// interval so idle processes still rotate promptly.
    pub tick_interval: Option<Duration>,
}

impl RotationConfig {
    /// Cross-field validation, run at construction before any file I/O.
    pub fn validate(&self) -> Result<()> {
        if self.active_path.file_name().is_none() {
            return Err(Error::Config(format!(
                "active path '{}' has no file name",
                self.active_path.display()
            )));
        }
        if self.archive {
            let pattern = self
                .pattern
                .as_ref()
                .ok_or_else(|| Error::Config("archiving requires an archive pattern".into()))?;
            if self.max_archive_count == 0 {
                return Err(Error::Config(
                    "max_archive_count must be greater than 0 when archiving".into(),
                ));
            }
            if self.max_active_size.is_some() && !pattern.has_sequence() {
                return Err(Error::Config(
                    "when max_active_size is set, the archive pattern must contain %i".into(),
                ));
            }
        }
        Ok(())
    }
}
