//! # logvault
//!
//! logvault is a log-file rotation and archival engine for long-running
//! services. It appends a continuous stream of encoded log records to an
//! active file and, under configurable triggers, seals that file, renames or
//! compresses it into an archive named from a pattern template, and prunes
//! old archives so disk usage stays bounded indefinitely. Rotation decisions
//! combine a size threshold with calendar-boundary crossings in a configured
//! time zone, so recent logs stay immediately readable under a fixed path
//! while history is organized chronologically. Compression and retention
//! pruning run in the background and never block the write path.
//!
//! Record formatting is the caller's concern: the engine consumes opaque
//! bytes, so it plugs in below any encoder and works directly as a writer
//! for the `tracing` ecosystem.
//!
//! ## Example
//!
//! ```rust no_run
//! use logvault::{RollingEngineBuilder, RotationSize, TimeZone};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = RollingEngineBuilder::new("./logs/app.log")
//!         // %d is the rotation date, %i disambiguates size-based rotations
//!         // within the same day; .gz compresses archives with gzip.
//!         .archive_pattern("app-%d.%i.log.gz")
//!         .max_active_size(RotationSize::MB(100))
//!         .max_archive_count(5)
//!         .time_zone(TimeZone::UTC)
//!         .build()?;
//!
//!     engine.write_record(b"one encoded log record\n")?;
//!     engine.flush()?;
//!
//!     // Let in-flight compression finish before the process exits.
//!     engine.shutdown(std::time::Duration::from_secs(5));
//!     Ok(())
//! }
//! ```

mod compress;
mod config;
mod engine;
mod error;
mod namer;
mod pattern;
mod retention;
mod trigger;
mod writer;

pub use {
    config::{RotationSize, TimeZone},
    engine::{RollingEngine, RotationEvent},
    error::{Error, Result},
    pattern::{CompressionFormat, Granularity},
    trigger::TriggerCause,
};

use std::{path::PathBuf, time::Duration};

use crate::{config::RotationConfig, pattern::ArchivePattern};

/// Fluent configuration for a [`RollingEngine`].
///
/// Defaults: archiving on (a pattern must then be supplied), 5 archives
/// kept, no size limit, UTC, no background ticker. All validation happens in
/// [`build`](RollingEngineBuilder::build), before any file I/O; an invalid
/// combination is rejected with [`Error::Config`] and the engine refuses to
/// start.
pub struct RollingEngineBuilder {
    active_path: PathBuf,
    archive: bool,
    pattern: Option<String>,
    max_archive_count: usize,
    max_active_size: Option<RotationSize>,
    time_zone: TimeZone,
    file_mode: Option<u32>,
    tick_interval: Option<Duration>,
}

impl RollingEngineBuilder {
    /// `active_path` is where current records are written, e.g.
    /// `./logs/app.log`.
    pub fn new(active_path: impl Into<PathBuf>) -> Self {
        RollingEngineBuilder {
            active_path: active_path.into(),
            archive: true,
            pattern: None,
            max_archive_count: 5,
            max_active_size: None,
            time_zone: TimeZone::UTC,
            file_mode: None,
            tick_interval: None,
        }
    }

    /// Whether rotated files are kept as archives. When disabled, rotation
    /// simply truncates: the sealed file is deleted once a fresh one is
    /// open, and only the size trigger (or [`RollingEngine::rotate_now`])
    /// applies.
    pub fn archive(mut self, archive: bool) -> Self {
        self.archive = archive;
        self
    }

    /// Archive naming template. Must contain a `%d` date placeholder
    /// (optionally `%d{%Y-%m-%d-%H}` and the like for finer granularity) and,
    /// when a size limit is set, a `%i` sequence placeholder. A trailing
    /// `.gz` or `.zip` selects the compression format; neither means rotated
    /// files are only renamed. A literal directory prefix such as
    /// `archive/app-%d.%i.log.gz` is resolved next to the active file.
    pub fn archive_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// How many archives to keep; the oldest beyond this are deleted after
    /// each rotation. Must be greater than 0 when archiving.
    pub fn max_archive_count(mut self, count: usize) -> Self {
        self.max_archive_count = count;
        self
    }

    /// Rotate before the active file would exceed this size.
    pub fn max_active_size(mut self, size: RotationSize) -> Self {
        self.max_active_size = Some(size);
        self
    }

    /// Time zone for calendar-boundary computation and archive naming.
    pub fn time_zone(mut self, time_zone: TimeZone) -> Self {
        self.time_zone = time_zone;
        self
    }

    /// Unix permissions for created files, in octal notation (e.g. 0o640).
    pub fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = Some(mode);
        self
    }

    /// Spawn a background ticker that evaluates the time trigger at this
    /// interval, so a fully idle process still rotates promptly at the
    /// boundary instead of waiting for the next log line.
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    /// Validate the configuration and open the active file.
    pub fn build(self) -> Result<RollingEngine> {
        let pattern = match &self.pattern {
            Some(raw) => Some(ArchivePattern::parse(raw)?),
            None => None,
        };
        RollingEngine::new(RotationConfig {
            active_path: self.active_path,
            archive: self.archive,
            pattern,
            max_archive_count: self.max_archive_count,
            max_active_size: self.max_active_size.as_ref().map(RotationSize::bytes),
            time_zone: self.time_zone.fixed_offset(),
            file_mode: self.file_mode,
            tick_interval: self.tick_interval,
        })
    }
}
