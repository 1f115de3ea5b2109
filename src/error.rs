//! Error handling for the chartfeed pipeline
//!
//! This module defines the crate error type and a Result alias for use
//! throughout the pipeline. Transport failures carry their own
//! [`TransportError`] so the reconnect policy can classify them.

use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for chartfeed operations
#[derive(Error, Debug)]
pub enum FeedError {
    /// A caller passed inconsistent or out-of-range arguments
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Errors related to configuration loading/saving/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised by the underlying transport
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A wire frame could not be decoded into samples
    #[error("Decode error: {0}")]
    Decode(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FeedError>,
    },
}

impl FeedError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        FeedError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this is an argument error (possibly wrapped in context)
    pub fn is_invalid_argument(&self) -> bool {
        match self {
            FeedError::InvalidArgument(_) => true,
            FeedError::WithContext { source, .. } => source.is_invalid_argument(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Serialization(err.to_string())
    }
}

/// Result type alias for chartfeed operations
pub type Result<T> = std::result::Result<T, FeedError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<FeedError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
