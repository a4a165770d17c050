use std::fmt;
use thiserror::Error;

/// Host platform family, used to pick a script interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Unix => f.write_str("unix"),
            Platform::Windows => f.write_str("windows"),
        }
    }
}

/// Errors that can occur while fetching a single source.
///
/// Everything except `Cancelled` is recorded on the subscription as its
/// last error; the batch itself never fails because of one of these.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Script path resolves outside the scripts directory
    #[error("Invalid script path '{0}': script must be within the scripts directory")]
    InvalidPath(String),
    /// The interpreter for this script type does not exist on the host OS
    #[error("'.{extension}' scripts are not supported on {platform}")]
    UnsupportedPlatform { extension: String, platform: Platform },
    /// Script could not be launched, exited nonzero, or ran out of time
    #[error(
        "Script execution failed: {reason}{}",
        .stderr.as_deref().map(|s| format!(", stderr: {}", s)).unwrap_or_default()
    )]
    ScriptExecutionFailed {
        reason: String,
        stderr: Option<String>,
    },
    /// Document could not be parsed as RSS or Atom
    #[error("Failed to parse feed: {0}")]
    FeedParseFailed(String),
    /// Transport or HTTP-level failure
    #[error("Request failed: {0}")]
    NetworkFetchFailed(String),
    /// Store write failed
    #[error("Failed to persist: {0}")]
    PersistenceFailed(String),
    /// The batch was cancelled before this source finished
    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether this error should be written to the subscription's error field.
    pub fn is_recorded(&self) -> bool {
        !matches!(self, FetchError::Cancelled | FetchError::PersistenceFailed(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::NetworkFetchFailed(err.to_string())
    }
}
