use std::io;
use std::path::PathBuf;

/// Boxed source for collaborator failures (HTTP client, search backends, login).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("both --decremental and --incremental are specified")]
    ConflictingMode,

    #[error("invalid media identifier `{id}`")]
    InvalidIdentifier {
        id: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("cannot list archive directory `{}`", path.display())]
    DirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("transfer of `{url}` failed")]
    Transfer {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("I/O error on `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed media container `{}`: {reason}", path.display())]
    ContainerFormat { path: PathBuf, reason: String },

    #[error("search failed")]
    Search(#[source] BoxError),

    #[error("session: {0}")]
    Session(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn container(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::ContainerFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
