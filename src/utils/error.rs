use thiserror::Error;

/// Outcome of a failed image request.
///
/// Cloneable so one failure can be handed to every waiter of the same fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Fetch error for {id}: {message}")]
    Fetch { id: String, message: String },

    #[error("Decode error for {id}: {message}")]
    Decode { id: String, message: String },

    #[error("Not found: {id}")]
    NotFound { id: String },
}

impl LoadError {
    pub fn fetch(id: &str, message: impl Into<String>) -> Self {
        Self::Fetch {
            id: id.to_string(),
            message: message.into(),
        }
    }

    pub fn decode(id: &str, message: impl Into<String>) -> Self {
        Self::Decode {
            id: id.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(id: &str) -> Self {
        Self::NotFound { id: id.to_string() }
    }

    /// Identifier the failure belongs to.
    pub fn identifier(&self) -> &str {
        match self {
            Self::InvalidIdentifier(id) => id,
            Self::Fetch { id, .. } | Self::Decode { id, .. } | Self::NotFound { id } => id,
        }
    }

    /// Whether retrying the same identifier later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier(_) => "invalid-identifier",
            Self::Fetch { .. } => "fetch",
            Self::Decode { .. } => "decode",
            Self::NotFound { .. } => "not-found",
        }
    }
}

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid scaling mode: {0}")]
    InvalidScaling(String),
}

pub type LoadResult<T> = Result<T, LoadError>;
pub type LoaderResult<T> = Result<T, LoaderError>;
