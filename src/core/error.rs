use std::fmt;

use thiserror::Error;

/// Transport-level failure from a [`KeyStore`](crate::traits::KeyStore) backend.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store transport error: {0}")]
    Transport(String),
}

/// Failure from a [`RaceLock`](crate::lock::RaceLock) acquisition or release.
#[derive(Debug, Clone, Error)]
pub enum LockError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error raised by the user-supplied loader function.
///
/// Wraps an arbitrary source error without requiring loaders to depend on
/// this crate's error type; construct with [`LoaderError::new`] for a plain
/// message or [`LoaderError::from_source`] to preserve an underlying cause.
#[derive(Debug)]
pub struct LoaderError {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl LoaderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), source: None }
    }

    pub fn from_source(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self { message: source.to_string(), source: Some(Box::new(source)) }
    }
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LoaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Single public error type for the crate.
///
/// Mirrors the taxonomy in the specification: [`CacheError::ValidationFail`]
/// is raised synchronously at construction, [`CacheError::StoreFail`] and
/// [`CacheError::LockFail`] wrap the two lower layers, [`CacheError::LoaderFail`]
/// carries the user loader's error annotated with the loader name and cache
/// key, and [`CacheError::ParseFail`] covers a cached blob that fails to
/// decode. `BackgroundFail` from the spec has no variant here: per the
/// propagation policy it is never returned to a caller, only logged.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("validation failed: {0}")]
    ValidationFail(String),

    #[error(transparent)]
    StoreFail(#[from] StoreError),

    #[error(transparent)]
    LockFail(#[from] LockError),

    #[error("loader `{name}` failed for key `{key}`: {source}")]
    LoaderFail { name: String, key: String, #[source] source: Box<dyn std::error::Error + Send + Sync> },

    #[error("failed to decode cached entry: {0}")]
    ParseFail(String),
}
