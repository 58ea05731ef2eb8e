use thiserror::Error;

pub type Result<T> = std::result::Result<T, FeedError>;

#[derive(Debug, Error)]
pub enum FeedError {
    /// A lever or variant is structurally invalid (unknown clause, empty case
    /// list with no fallback, unparseable variant document). Never swallowed:
    /// an invalid configuration silently mis-scoring a feed is worse than an
    /// explicit failure.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Corpus executor failure (connectivity, timeout). Not owned by the
    /// engine; propagated unchanged.
    #[error("Corpus error: {0}")]
    Corpus(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FeedError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, FeedError::Configuration(_))
    }
}
