// Error taxonomy for the packaging-and-upload pipeline.
//
// Each stage has its own error type; the orchestrator folds them into a
// `DeployError` so the UI only has to render one thing.

use std::io;
use std::path::PathBuf;

/// The source tree could not be enumerated. Aborts packaging before any
/// archive exists.
#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error("source directory {0} does not exist")]
    Missing(PathBuf),

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures while streaming the archive into its sink.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// A source file vanished or became unreadable between walk and read.
    #[error("cannot read source file {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive write failed: {0}")]
    Write(#[from] io::Error),

    #[error("archive write failed: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl ArchiveError {
    /// True when the sink itself failed, as opposed to a source read.
    pub fn is_sink_failure(&self) -> bool {
        !matches!(self, ArchiveError::Source { .. })
    }
}

/// Failures reading or writing the local key/value state.
#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("cannot access token store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("token store {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from the read-only API calls (template, verify, organisations).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("server reported an error")]
    Rejected,

    #[error("invalid auth token: {0}")]
    InvalidToken(String),
}

/// Errors writing a fetched template into the project directory.
#[derive(Debug, thiserror::Error)]
pub enum ScaffoldError {
    #[error("Failed fetching template blueprint from server: {0}")]
    Fetch(#[from] ApiError),

    #[error("template file name {0:?} escapes the project directory")]
    UnsafeName(String),

    #[error("template paths {0:?} and {1:?} cannot both be created")]
    Clash(String, String),

    #[error("template would overwrite existing files: {}", .0.join(", "))]
    Conflicts(Vec<String>),

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Terminal failure of one deploy attempt.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("could not read source directory; remove links and shortcuts and try again.")]
    Filesystem(String),

    #[error("failed zipping package")]
    ArchiveWrite(String),

    #[error("no auth token stored; run `assistant token set` first")]
    MissingToken,

    #[error("failed uploading package")]
    Network(String),

    #[error("failed uploading package")]
    Validation(Vec<String>),
}

impl DeployError {
    /// Detail lines printed under the cause line, one per message.
    pub fn details(&self) -> Vec<String> {
        match self {
            DeployError::Filesystem(detail)
            | DeployError::ArchiveWrite(detail)
            | DeployError::Network(detail) => vec![detail.clone()],
            DeployError::Validation(messages) => messages.clone(),
            DeployError::MissingToken => Vec::new(),
        }
    }
}

impl From<WalkError> for DeployError {
    fn from(err: WalkError) -> Self {
        DeployError::Filesystem(err.to_string())
    }
}

impl From<ArchiveError> for DeployError {
    fn from(err: ArchiveError) -> Self {
        if err.is_sink_failure() {
            DeployError::ArchiveWrite(err.to_string())
        } else {
            DeployError::Filesystem(err.to_string())
        }
    }
}
