use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpdaterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Release snapshot error: {0}")]
    Snapshot(String),

    #[error("Failed to fetch chart index: {0}")]
    Fetch(String),

    #[error("Failed to parse chart index: {0}")]
    IndexParse(String),

    #[error("Chart '{0}' not found in repository index")]
    ChartNotFound(String),

    #[error("Invalid semantic version '{0}'")]
    InvalidVersion(String),

    #[error("Failed to patch manifests: {0}")]
    Patch(String),

    #[error("Failed to clone repository: {0}")]
    Clone(String),

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Failed to push branch: {0}")]
    Push(String),

    #[error("Pull request API error: {0}")]
    Api(String),

    #[error("Deadline exceeded during {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl UpdaterError {
    /// Errors that end the whole pass instead of a single release.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UpdaterError::Clone(_) | UpdaterError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, UpdaterError>;
