use std::path::PathBuf;

use thiserror::Error;

/// The five error kinds named by this crate's error handling design: a bad catalog
/// or model selection (`Configuration`), a missing or unreadable external resource
/// (`Resource`), a failure inside the running pipeline itself (`Runtime`), wrapped
/// filesystem failures (`Io`), and a violation of a component's own contract
/// (`Contract`).
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("resource unavailable: {0}")]
    Resource(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("contract violation: {0}")]
    Contract(String),
}

impl IndexError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IndexError::Io { path: path.into(), source }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        IndexError::Configuration(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        IndexError::Resource(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        IndexError::Runtime(msg.into())
    }

    pub fn contract(msg: impl Into<String>) -> Self {
        IndexError::Contract(msg.into())
    }

    /// Mirrors the 400/503/500-style classification a future HTTP surface would
    /// use to pick a status code, without this crate depending on one.
    pub fn status_class(&self) -> StatusClass {
        match self {
            IndexError::Configuration(_) | IndexError::Contract(_) => StatusClass::BadRequest,
            IndexError::Resource(_) => StatusClass::ServiceUnavailable,
            IndexError::Runtime(_) | IndexError::Io { .. } => StatusClass::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    BadRequest,
    ServiceUnavailable,
    Internal,
}

pub type Result<T> = std::result::Result<T, IndexError>;
