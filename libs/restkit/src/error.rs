use std::fmt;

use crate::model::ModelError;
use crate::submit::ChangeSetItemValidationResult;
use crate::value::ConversionError;

/// Unified error type for the query and submission pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A path segment kind has no registered handler.
    #[error("path segment '{segment}' is not implemented")]
    NotImplemented { segment: String },

    /// The pipeline was driven in a way no valid route can produce.
    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("invalid resource path: {0}")]
    InvalidPath(String),

    #[error("invalid request payload: {0}")]
    InvalidPayload(String),

    /// An authorizer denied access. `target` is kept for logs only.
    #[error("access to '{target}' is forbidden")]
    Forbidden { target: String },

    #[error("resource '{resource}' with key {key} was not found")]
    ResourceNotFound { resource: String, key: String },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// One or more Error-severity results were recorded; nothing was submitted.
    #[error(
        "change set validation failed with {} error(s)",
        .0.iter().filter(|r| r.is_error()).count()
    )]
    Validation(Vec<ChangeSetItemValidationResult>),

    #[error("concurrency check failed for '{resource}': {message}")]
    ConcurrencyConflict { resource: String, message: String },

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("the operation was cancelled")]
    Cancelled,

    /// Failure reported by a data provider or change-set store.
    #[error("data provider error: {0:#}")]
    Provider(anyhow::Error),
}

impl Error {
    /// Converts a collaborator failure into a pipeline error.
    ///
    /// An [`AggregateError`] holding exactly one inner error is unwrapped to that
    /// error, and a pipeline [`Error`] raised inside a collaborator is returned as-is.
    pub fn from_provider(err: anyhow::Error) -> Self {
        let err = match err.downcast::<AggregateError>() {
            Ok(aggregate) => aggregate.into_single(),
            Err(other) => other,
        };
        match err.downcast::<Error>() {
            Ok(inner) => inner,
            Err(other) => Error::Provider(other),
        }
    }

    pub fn forbidden(target: impl Into<String>) -> Self {
        Error::Forbidden {
            target: target.into(),
        }
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }

    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Error::InvalidPath(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Error::Forbidden { .. })
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ResourceNotFound { .. })
    }
}

/// Several independent failures raised by one collaborator call.
#[derive(Debug)]
pub struct AggregateError(pub Vec<anyhow::Error>);

impl AggregateError {
    /// Returns the inner error when there is exactly one, otherwise the aggregate itself.
    pub fn into_single(mut self) -> anyhow::Error {
        if self.0.len() == 1
            && let Some(inner) = self.0.pop()
        {
            return inner;
        }
        anyhow::Error::new(self)
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) occurred", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
