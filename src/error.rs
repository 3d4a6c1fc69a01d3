use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Exit code reported for every failure that is not the launched command's own.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("registry authentication failed: {0}")]
    Auth(String),

    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error("no manifest for platform {platform} (available: {})", available.join(", "))]
    UnsupportedPlatform {
        platform: String,
        available: Vec<String>,
    },

    #[error("failed to fetch blob {digest}: {reason}")]
    Fetch { digest: String, reason: String },

    #[error("integrity check failed for {digest}: expected {expected}, got {actual}")]
    Integrity {
        digest: String,
        expected: String,
        actual: String,
    },

    #[error("failed to extract layer {}: {reason}", layer.display())]
    Extraction { layer: PathBuf, reason: String },

    #[error("isolation failed: {0}")]
    Isolation(String),

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' terminated abnormally: {status}")]
    ChildExit {
        command: String,
        status: String,
        code: Option<i32>,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// The process exit code this error maps to.
    ///
    /// Only an abnormal child exit that still carries a code forwards it;
    /// every internal failure collapses to [`EXIT_FAILURE`].
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ChildExit {
                code: Some(code), ..
            } => *code,
            _ => EXIT_FAILURE,
        }
    }
}
