use std::io;

use thiserror::Error;

/// Fatal conditions raised by the engine. Everything else is an anomaly.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("input tree contains no usable entities")]
    EmptyInput,
    #[error("unknown output profile '{0}'")]
    UnknownProfile(String),
    #[error("invalid pattern in rule '{rule}': {source}")]
    Pattern {
        rule: String,
        #[source]
        source: regex::Error,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("failed to decode rules: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sink failure: {0}")]
    Sink(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
