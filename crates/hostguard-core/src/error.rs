use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("malformed {what} at {path}: {source}")]
    Parse {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{context} ({path}): {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no active quarantine record matches {0}")]
    NotFound(String),
    #[error("{path} resolves outside of {root}")]
    BoundaryViolation { path: PathBuf, root: PathBuf },
    #[error("destination already exists: {0}")]
    DestinationOccupied(PathBuf),
    #[error("invalid rule set: {0}")]
    InvalidRules(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        CoreError::Io {
            context,
            path: path.into(),
            source,
        }
    }
}
