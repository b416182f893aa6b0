use std::{io, path::PathBuf};

/// Errors that can occur when building or operating the rolling engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration. Rejected at construction, before any file I/O
    /// is attempted; never produced at runtime.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A filesystem operation (open/write/rename/delete) failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The archive namer could not find an unused file name within its retry
    /// budget.
    #[error("archive name collision for pattern '{pattern}' after {attempts} attempts")]
    NamingConflict { pattern: String, attempts: u32 },

    /// A rotation could not complete and the engine entered its degraded
    /// state. All subsequent writes return this error until the engine is
    /// reconstructed; writing into a closed or missing file is never
    /// attempted.
    #[error("rotation failed, engine degraded: {0}")]
    RotationFailed(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
