//! Error types for the planning core.

/// Convenience alias used throughout the crate.
pub type FloeResult<T, E = Error> = std::result::Result<T, E>;

/// All errors surfaced by scan planning.
///
/// Builder methods reject bad refinements with [`Error::InvalidArgument`] immediately;
/// [`Error::Validation`] is raised later, when the row filter is actually bound against a schema.
/// Nothing is recovered at this layer except close-time IO failures, which are logged and
/// aggregated with the first one surfaced.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A scan refinement was given an unusable argument, e.g. an unknown snapshot id or a second
    /// snapshot pin.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A name reference could not be resolved against a schema under the active case sensitivity.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Failure reading or closing a manifest through local file IO.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failure reading a manifest through an object store.
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// A task payload (schema, partition spec, residual) or manifest entry failed to
    /// (de)serialize.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// An internal invariant was violated. Fatal; propagated unmodified.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Generic(String),
}

impl Error {
    pub fn invalid_argument(msg: impl ToString) -> Self {
        Self::InvalidArgument(msg.to_string())
    }

    pub fn validation(msg: impl ToString) -> Self {
        Self::Validation(msg.to_string())
    }

    pub fn internal(msg: impl ToString) -> Self {
        Self::Internal(msg.to_string())
    }

    pub fn generic(msg: impl ToString) -> Self {
        Self::Generic(msg.to_string())
    }
}
