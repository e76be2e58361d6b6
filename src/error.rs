use thiserror::Error;

pub type Result<T, E = ConvertError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ConvertError {
    /// Writer used after close, or the sink went away.
    #[error("Output sink unavailable: {0}")]
    IoState(String),

    /// Unbalanced element nesting. Never expected from correct callers.
    #[error("Structural error: {0}")]
    Structural(String),

    /// A single item is missing a required mapped field.
    #[error("Schema error in item {item}: {reason}")]
    Schema { item: String, reason: String },

    #[error("Job {0} is busy with another batch")]
    Busy(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid state for job {job}: {reason}")]
    InvalidState { job: String, reason: String },

    /// A progress request that names an unknown action or is unreadable.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ConvertError {
    pub fn schema(item: impl Into<String>, reason: impl Into<String>) -> Self {
        ConvertError::Schema {
            item: item.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(job: impl Into<String>, reason: impl Into<String>) -> Self {
        ConvertError::InvalidState {
            job: job.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is confined to one source item.
    pub fn is_item_level(&self) -> bool {
        matches!(self, ConvertError::Schema { .. })
    }

    /// Whether the caller may simply try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConvertError::Busy(_))
    }
}

/// Classifies a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// One source item could not be mapped; the job carried on.
    Item,
    /// The job could not continue (sink, source or state corruption).
    Fatal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Item => write!(f, "Item"),
            FailureKind::Fatal => write!(f, "Fatal"),
        }
    }
}
