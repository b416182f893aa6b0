use {
    chrono::{DateTime, FixedOffset},
    std::{
        fs::{self, File, OpenOptions},
        io::Write as _,
        path::{Path, PathBuf},
    },
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::error::{Error, Result};

/// Owns the open handle of the currently-active log file. Appends are
/// sequential; the rotation coordinator serializes them with trigger checks,
/// so the recorded length always reflects bytes durably handed to the file.
#[derive(Debug)]
pub(crate) struct ActiveFile {
    file: File,
    path: PathBuf,
    len: u64,
    opened_at: DateTime<FixedOffset>,
}

impl ActiveFile {
    /// Open (or create) the active file in append mode, creating parent
    /// directories if needed.
    pub fn open(path: &Path, mode: Option<u32>, now: DateTime<FixedOffset>) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.append(true).create(true);

        let mut opened = options.open(path);
        if opened.is_err() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
                opened = options.open(path);
            }
        }
        let file = opened.map_err(|err| Error::io(path, err))?;
        set_permissions(path, mode)?;
        let len = file.metadata().map_err(|err| Error::io(path, err))?.len();

        Ok(ActiveFile {
            file,
            path: path.to_path_buf(),
            len,
            opened_at: now,
        })
    }

    pub fn append(&mut self, buf: &[u8]) -> Result<usize> {
        let written = self
            .file
            .write(buf)
            .map_err(|err| Error::io(&self.path, err))?;
        self.len += written as u64;
        Ok(written)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush().map_err(|err| Error::io(&self.path, err))
    }

    /// Current byte length of the active file.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// How long this file has been the active one.
    pub fn age_since_open(&self, now: DateTime<FixedOffset>) -> chrono::Duration {
        now.signed_duration_since(self.opened_at)
    }
}

/// Apply the configured Unix file mode, if any. No-op elsewhere.
pub(crate) fn set_permissions(path: &Path, mode: Option<u32>) -> Result<()> {
    if let Some(mode) = mode {
        #[cfg(unix)]
        {
            let perms = fs::Permissions::from_mode(mode);
            fs::set_permissions(path, perms).map_err(|err| Error::io(path, err))?;
        }
        #[cfg(not(unix))]
        {
            let _ = mode;
            tracing::warn!("file permissions are not supported on non-Unix platforms");
        }
    }
    Ok(())
}
