use std::path::{Path, PathBuf};

use crate::{
    error::{Error, Result},
    pattern::ArchivePattern,
};

/// Retry budget when an externally-created file collides with a candidate
/// archive name.
const MAX_NAMING_ATTEMPTS: u32 = 64;

/// A resolved archive destination: the staging path the rotated file is
/// renamed to, and the final path it ends up at after compression. The two
/// are identical for uncompressed patterns.
#[derive(Debug, Clone)]
pub(crate) struct NamedArchive {
    pub staging_path: PathBuf,
    pub final_path: PathBuf,
    /// The sequence index actually used.
    pub seq: u64,
}

/// Derives collision-free archive file names from the pattern template.
#[derive(Debug, Clone)]
pub(crate) struct ArchiveNamer {
    pattern: ArchivePattern,
    archive_dir: PathBuf,
}

impl ArchiveNamer {
    pub fn new(pattern: ArchivePattern, base_dir: &Path) -> Self {
        let archive_dir = pattern.archive_dir(base_dir);
        ArchiveNamer {
            pattern,
            archive_dir,
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Compute the next archive name for `bucket`, starting from `seq`. If a
    /// candidate already exists on disk (e.g. an externally created file),
    /// the sequence is incremented and the probe repeated up to a bounded
    /// number of attempts. Patterns without a sequence placeholder cannot
    /// disambiguate, so a single collision fails immediately.
    pub fn next_archive_name(&self, bucket: &str, seq: u64) -> Result<NamedArchive> {
        let mut seq = seq;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let staging_path = self.archive_dir.join(self.pattern.staging_name(bucket, seq));
            let final_path = self.archive_dir.join(self.pattern.final_name(bucket, seq));
            if !staging_path.exists() && !final_path.exists() {
                return Ok(NamedArchive {
                    staging_path,
                    final_path,
                    seq,
                });
            }
            if !self.pattern.has_sequence() || attempts >= MAX_NAMING_ATTEMPTS {
                return Err(Error::NamingConflict {
                    pattern: self.pattern.raw().to_string(),
                    attempts,
                });
            }
            seq += 1;
        }
    }
}
