use {
    std::{
        fs,
        path::{Path, PathBuf},
    },
    tracing::warn,
};

use crate::pattern::{ArchiveKey, ArchivePattern};

/// One discovered archive file with its extracted sort key.
#[derive(Debug, Clone)]
pub(crate) struct ArchiveEntry {
    pub path: PathBuf,
    pub key: ArchiveKey,
}

/// Enumerates archives matching the pattern and deletes the oldest beyond the
/// configured count. Runs after every successful rotation, so retention is
/// enforced incrementally.
///
/// The index is always rebuilt fresh from a directory listing, never cached,
/// so files deleted or created by other processes are tolerated.
#[derive(Debug, Clone)]
pub(crate) struct RetentionSweeper {
    pattern: ArchivePattern,
    archive_dir: PathBuf,
    max_count: usize,
}

impl RetentionSweeper {
    pub fn new(pattern: ArchivePattern, base_dir: &Path, max_count: usize) -> Self {
        let archive_dir = pattern.archive_dir(base_dir);
        RetentionSweeper {
            pattern,
            archive_dir,
            max_count,
        }
    }

    /// All archives matching the pattern (final or uncompressed staging
    /// form), sorted ascending by (bucket, sequence).
    pub fn index(&self) -> Vec<ArchiveEntry> {
        let mut entries = Vec::new();
        let listing = match fs::read_dir(&self.archive_dir) {
            Ok(listing) => listing,
            Err(_) => return entries,
        };
        for file in listing.flatten() {
            if !file.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = file.file_name().to_str() {
                if let Some(key) = self.pattern.match_file(name) {
                    entries.push(ArchiveEntry {
                        path: file.path(),
                        key,
                    });
                }
            }
        }
        entries.sort_by_key(|entry| entry.key);
        entries
    }

    /// Highest sequence index in use for `bucket`, if any. Used to resume
    /// the counter across restarts.
    pub fn max_seq_in_bucket(&self, bucket: chrono::NaiveDateTime) -> Option<u64> {
        self.index()
            .iter()
            .filter(|entry| entry.key.bucket == bucket)
            .map(|entry| entry.key.seq)
            .max()
    }

    /// Delete the oldest archives beyond the configured count, returning the
    /// paths actually deleted. Deletion failures are logged and skipped;
    /// they will be reattempted on the next rotation's sweep.
    pub fn prune(&self) -> Vec<PathBuf> {
        let entries = self.index();
        let mut deleted = Vec::new();
        if entries.len() <= self.max_count {
            return deleted;
        }
        let excess = entries.len() - self.max_count;
        for entry in &entries[..excess] {
            match fs::remove_file(&entry.path) {
                Ok(()) => deleted.push(entry.path.clone()),
                Err(err) => {
                    warn!(path = %entry.path.display(), %err, "failed to prune old archive");
                }
            }
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sweeper(dir: &Path, max_count: usize) -> RetentionSweeper {
        RetentionSweeper::new(
            ArchivePattern::parse("app-%d.%i.log.gz").unwrap(),
            dir,
            max_count,
        )
    }

    #[test]
    fn prunes_oldest_beyond_count() {
        let dir = tempdir().unwrap();
        for name in [
            "app-2024-01-13.0.log.gz",
            "app-2024-01-14.0.log.gz",
            "app-2024-01-14.1.log.gz",
            "app-2024-01-15.0.log.gz",
        ] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let deleted = sweeper(dir.path(), 2).prune();
        let deleted: Vec<_> = deleted
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            deleted,
            vec!["app-2024-01-13.0.log.gz", "app-2024-01-14.0.log.gz"]
        );
        assert!(dir.path().join("app-2024-01-14.1.log.gz").exists());
        assert!(dir.path().join("app-2024-01-15.0.log.gz").exists());
    }

    #[test]
    fn under_the_limit_deletes_nothing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app-2024-01-15.0.log.gz"), b"x").unwrap();
        assert!(sweeper(dir.path(), 5).prune().is_empty());
    }

    #[test]
    fn foreign_files_are_left_alone() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("unrelated.txt"), b"x").unwrap();
        fs::write(dir.path().join("app-2024-01-15.0.log.gz.tmp"), b"x").unwrap();
        for seq in 0..3 {
            fs::write(
                dir.path().join(format!("app-2024-01-15.{seq}.log.gz")),
                b"x",
            )
            .unwrap();
        }

        sweeper(dir.path(), 1).prune();
        assert!(dir.path().join("unrelated.txt").exists());
        assert!(dir.path().join("app-2024-01-15.0.log.gz.tmp").exists());
        assert!(dir.path().join("app-2024-01-15.2.log.gz").exists());
    }

    #[test]
    fn uncompressed_staging_files_count_toward_retention() {
        // An archive whose compression failed stays as a plain file; it is
        // still indexed and pruned by age like any other.
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app-2024-01-13.0.log"), b"x").unwrap();
        fs::write(dir.path().join("app-2024-01-14.0.log.gz"), b"x").unwrap();
        fs::write(dir.path().join("app-2024-01-15.0.log.gz"), b"x").unwrap();

        let deleted = sweeper(dir.path(), 2).prune();
        assert_eq!(deleted.len(), 1);
        assert!(!dir.path().join("app-2024-01-13.0.log").exists());
    }

    #[test]
    fn resumes_sequence_from_existing_archives() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app-2024-01-15.0.log.gz"), b"x").unwrap();
        fs::write(dir.path().join("app-2024-01-15.3.log.gz"), b"x").unwrap();
        fs::write(dir.path().join("app-2024-01-14.9.log.gz"), b"x").unwrap();

        let sweeper = sweeper(dir.path(), 5);
        let bucket = sweeper.pattern.bucket_key("2024-01-15").unwrap();
        assert_eq!(sweeper.max_seq_in_bucket(bucket), Some(3));

        let missing = sweeper.pattern.bucket_key("2024-02-01").unwrap();
        assert_eq!(sweeper.max_seq_in_bucket(missing), None);
    }

    #[test]
    fn missing_directory_yields_empty_index() {
        let dir = tempdir().unwrap();
        let sweeper = RetentionSweeper::new(
            ArchivePattern::parse("archive/app-%d.%i.log.gz").unwrap(),
            dir.path(),
            5,
        );
        assert!(sweeper.index().is_empty());
        assert!(sweeper.prune().is_empty());
    }
}
